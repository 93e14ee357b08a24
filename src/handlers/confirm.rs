//! certConf and error handlers, both answered with pkiconf

use tracing::{info, warn};

use super::HandlerOutput;
use crate::error::{CmpError, Result};
use crate::message::{hex, PkiBody, PkiMessage, PkiStatusInfo};

/// Acknowledge a certificate confirmation. A client that refuses the
/// certificate is logged; the issued certificate stays as it is.
pub fn handle_cert_conf(request: &PkiMessage) -> Result<HandlerOutput> {
    let PkiBody::CertConf(statuses) = &request.body else {
        return Err(CmpError::system(format!(
            "Confirmation handler invoked for {}",
            request.body.label()
        )));
    };
    for status in statuses {
        let hash = status.cert_hash.as_deref().map(hex).unwrap_or_default();
        match &status.status_info {
            Some(info) if info.status.is_negative() => warn!(
                cert_hash = %hash,
                status = ?info.status,
                failure = ?info.fail_info.and_then(|f| f.single()),
                text = %status_text(info),
                "Client refused issued certificate"
            ),
            _ => info!(cert_hash = %hash, "Client confirmed certificate"),
        }
    }
    Ok(HandlerOutput::new(PkiBody::PkiConf))
}

/// Acknowledge an error report from the client.
pub fn handle_error(request: &PkiMessage) -> Result<HandlerOutput> {
    let PkiBody::Error(content) = &request.body else {
        return Err(CmpError::system(format!(
            "Error handler invoked for {}",
            request.body.label()
        )));
    };
    let (status, text) = match &content.pki_status_info {
        Some(info) => (Some(info.status), status_text(info)),
        None => (None, String::new()),
    };
    warn!(
        status = ?status,
        error_code = ?content.error_code,
        details = ?content.error_details,
        text = %text,
        "Client reported an error"
    );
    Ok(HandlerOutput::new(PkiBody::PkiConf))
}

fn status_text(info: &PkiStatusInfo) -> String {
    info.status_string
        .as_ref()
        .map(|lines| lines.join(" "))
        .unwrap_or_default()
}
