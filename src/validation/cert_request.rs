//! Inbound certification requests (ir, cr, kur)

use crate::context::ExchangeContext;
use crate::error::{CmpError, Result};
use crate::message::{BodyType, CertReqMessages, CertReqMsg, PkiMessage, CERT_REQ_ID, X509_VERSION_3};

/// The single entry of a one-request `CertReqMessages`.
pub fn single_request(requests: &CertReqMessages) -> Result<&CertReqMsg> {
    match requests.as_slice() {
        [entry] => Ok(entry),
        _ => Err(CmpError::bad_data_format(format!(
            "Certification request must have one element, found {}",
            requests.len()
        ))),
    }
}

pub fn validate(message: &PkiMessage, ctx: &ExchangeContext) -> Result<()> {
    let (body_type, requests) = match (message.body.body_type(), message.body.cert_requests()) {
        (Some(body_type), Some(requests)) => (body_type, requests),
        _ => {
            return Err(CmpError::system(format!(
                "Certification request validator invoked for {}",
                message.body.label()
            )))
        }
    };

    let request = &single_request(requests)?.cert_req;
    if request.cert_req_id != CERT_REQ_ID {
        return Err(CmpError::bad_data_format(format!(
            "certReqId must be {}, found {}",
            CERT_REQ_ID, request.cert_req_id
        )));
    }

    let template = &request.cert_template;
    if let Some(version) = template.version {
        if version != X509_VERSION_3 {
            return Err(CmpError::bad_cert_template(format!(
                "Certificate template version must be {}, found {}",
                X509_VERSION_3, version
            )));
        }
    }
    if template.subject.is_none() {
        return Err(CmpError::bad_cert_template(
            "Certificate template must carry a subject",
        ));
    }

    ctx.policy.check(body_type, request)
}
