//! Revocation request (rr) and response (rp)

use super::status::check_status_info;
use crate::context::ExchangeContext;
use crate::error::{CmpError, Result};
use crate::message::{PkiBody, PkiMessage};

pub fn validate_request(message: &PkiMessage, _ctx: &ExchangeContext) -> Result<()> {
    let PkiBody::Rr(details) = &message.body else {
        return Err(CmpError::system(format!(
            "rr validator invoked for {}",
            message.body.label()
        )));
    };
    if details.is_empty() {
        return Err(CmpError::bad_data_format(
            "Revocation request must have at least one element",
        ));
    }
    Ok(())
}

pub fn validate_response(message: &PkiMessage, _ctx: &ExchangeContext) -> Result<()> {
    let PkiBody::Rp(content) = &message.body else {
        return Err(CmpError::system(format!(
            "rp validator invoked for {}",
            message.body.label()
        )));
    };
    if content.status.is_empty() {
        return Err(CmpError::bad_data_format(
            "Revocation response must have at least one status",
        ));
    }
    if let Some(rev_certs) = &content.rev_certs {
        if rev_certs.len() != content.status.len() {
            return Err(CmpError::bad_data_format(format!(
                "Revocation response has {} statuses but {} certificate ids",
                content.status.len(),
                rev_certs.len()
            )));
        }
    }
    content.status.iter().try_for_each(check_status_info)
}
