//! Outgoing certification responses (ip, cp, kup, ccp)
//!
//! Run on every assembled response before it leaves the engine.

use super::status::check_status_info;
use crate::context::ExchangeContext;
use crate::error::{CmpError, Result};
use crate::message::{CertOrEncCert, CertResponse, PkiMessage, CERT_REQ_ID};

pub fn validate(message: &PkiMessage, _ctx: &ExchangeContext) -> Result<()> {
    let content = message.body.cert_response().ok_or_else(|| {
        CmpError::system(format!(
            "Certification response validator invoked for {}",
            message.body.label()
        ))
    })?;
    match content.response.as_slice() {
        [response] => check_cert_response(response),
        other => Err(CmpError::bad_data_format(format!(
            "Certification response must have one element, found {}",
            other.len()
        ))),
    }
}

/// Either a certificate with a positive status, or no key pair with a
/// negative status and one failure code.
pub fn check_cert_response(response: &CertResponse) -> Result<()> {
    if response.cert_req_id != CERT_REQ_ID {
        return Err(CmpError::bad_data_format(format!(
            "certReqId must be {}, found {}",
            CERT_REQ_ID, response.cert_req_id
        )));
    }

    match &response.certified_key_pair {
        Some(pair) => {
            if !response.status.status.is_positive() {
                return Err(CmpError::bad_data_format(
                    "certifiedKeyPair present with a negative status",
                ));
            }
            check_status_info(&response.status)?;
            match &pair.cert_or_enc_cert {
                CertOrEncCert::Certificate(cert) if !cert.as_der().is_empty() => Ok(()),
                CertOrEncCert::Certificate(_) => Err(CmpError::bad_data_format(
                    "certifiedKeyPair carries an empty certificate",
                )),
                CertOrEncCert::EncryptedCert(_) => Err(CmpError::bad_data_format(
                    "Encrypted certificates are not supported",
                )),
            }
        }
        None => {
            if response.status.status.is_positive() {
                return Err(CmpError::bad_data_format(format!(
                    "Status {:?} requires a certifiedKeyPair",
                    response.status.status
                )));
            }
            check_status_info(&response.status)
        }
    }
}
