//! certConf, error and pkiConf bodies

use super::status::check_status_info;
use crate::context::ExchangeContext;
use crate::error::{CmpError, Result};
use crate::message::{PkiBody, PkiMessage};

pub fn validate_cert_conf(message: &PkiMessage, _ctx: &ExchangeContext) -> Result<()> {
    let PkiBody::CertConf(statuses) = &message.body else {
        return Err(wrong_body("certConf", message));
    };
    let status = match statuses.as_slice() {
        [status] => status,
        other => {
            return Err(CmpError::bad_data_format(format!(
                "Certificate confirmation must have one element, found {}",
                other.len()
            )))
        }
    };
    match status.cert_hash.as_deref() {
        Some(hash) if !hash.is_empty() => {}
        _ => {
            return Err(CmpError::bad_data_format(
                "Certificate confirmation must carry the certificate hash",
            ))
        }
    }
    match &status.status_info {
        Some(info) => check_status_info(info),
        None => Ok(()),
    }
}

pub fn validate_error(message: &PkiMessage, _ctx: &ExchangeContext) -> Result<()> {
    let PkiBody::Error(content) = &message.body else {
        return Err(wrong_body("error", message));
    };
    if content.pki_status_info.is_none() {
        return Err(CmpError::bad_data_format(
            "Error message must carry a PKIStatusInfo",
        ));
    }
    Ok(())
}

pub fn validate_pki_conf(message: &PkiMessage, _ctx: &ExchangeContext) -> Result<()> {
    match &message.body {
        PkiBody::PkiConf => Ok(()),
        _ => Err(wrong_body("pkiconf", message)),
    }
}

fn wrong_body(expected: &str, message: &PkiMessage) -> CmpError {
    CmpError::system(format!(
        "{} validator invoked for {}",
        expected,
        message.body.label()
    ))
}
