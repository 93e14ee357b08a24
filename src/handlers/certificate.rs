//! Certification (ir/cr) and key update (kur) handlers
//!
//! Both submit an asynchronous request to the backend, wait for it through
//! the polling bridge and answer with the issued certificate. The CA chain,
//! when requested, travels in `extraCerts`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use openssl::pkey::PKey;
use tracing::{debug, info};

use super::HandlerOutput;
use crate::backend::{
    CertificateState, IssuanceBackend, IssuanceRequest, TrackingRef, TransactionState,
};
use crate::context::ExchangeContext;
use crate::error::{CmpError, Result};
use crate::message::encoding::{decode_cert_id_serial, encode_cert_request};
use crate::message::{
    oid, CertOrEncCert, CertRepMessage, CertRequest, CertResponse, CertifiedKeyPair,
    CmpCertificate, Name, PkiBody, PkiMessage, PkiStatusInfo, CERT_REQ_ID,
};
use crate::polling;
use crate::validation::cert_request::single_request;

/// ir -> ip, cr -> cp
pub fn handle_certification(
    backend: &dyn IssuanceBackend,
    request: &PkiMessage,
    ctx: &ExchangeContext,
) -> Result<HandlerOutput> {
    let (requests, initial) = match &request.body {
        PkiBody::Ir(requests) => (requests, true),
        PkiBody::Cr(requests) => (requests, false),
        other => {
            return Err(CmpError::system(format!(
                "Certification handler invoked for {}",
                other.label()
            )))
        }
    };
    let cert_request = &single_request(requests)?.cert_req;

    let tracking = request_issuance(backend, ctx, cert_request)?;
    let (content, chain) = assemble_response(backend, ctx, &tracking, TransactionState::Issued)?;
    let body = if initial {
        PkiBody::Ip(content)
    } else {
        PkiBody::Cp(content)
    };
    Ok(HandlerOutput::with_extra_certs(body, chain))
}

/// kur -> kup
pub fn handle_key_update(
    backend: &dyn IssuanceBackend,
    request: &PkiMessage,
    ctx: &ExchangeContext,
) -> Result<HandlerOutput> {
    let PkiBody::Kur(requests) = &request.body else {
        return Err(CmpError::system(format!(
            "Key update handler invoked for {}",
            request.body.label()
        )));
    };
    let cert_request = &single_request(requests)?.cert_req;

    let tracking = request_rekey(backend, ctx, cert_request)?;
    let (content, chain) = assemble_response(backend, ctx, &tracking, TransactionState::Rekeyed)?;
    Ok(HandlerOutput::with_extra_certs(PkiBody::Kup(content), chain))
}

/// Submit an issuance for `request`; returns without waiting for completion.
pub fn request_issuance(
    backend: &dyn IssuanceBackend,
    ctx: &ExchangeContext,
    request: &CertRequest,
) -> Result<TrackingRef> {
    let subject = request
        .cert_template
        .subject
        .clone()
        .ok_or_else(|| CmpError::bad_cert_template("Certificate template must carry a subject"))?;
    let issuance = issuance_request(request, subject)?;

    let tracking = backend
        .issue(&ctx.authority, &ctx.profile, &issuance)
        .map_err(|e| CmpError::backend("Issuance request was not accepted", e))?;
    info!(tracking_ref = %tracking, subject = %issuance.subject.to_dn_string(), "Issuance requested");
    Ok(tracking)
}

/// Locate the certificate being replaced, check the key actually changes,
/// and submit the rekey.
pub fn request_rekey(
    backend: &dyn IssuanceBackend,
    ctx: &ExchangeContext,
    request: &CertRequest,
) -> Result<TrackingRef> {
    let template = &request.cert_template;
    let new_key_der = template
        .public_key
        .as_deref()
        .ok_or_else(|| CmpError::bad_request("Key update request carries no public key"))?;
    let new_key = PKey::public_key_from_der(new_key_der).map_err(|e| {
        CmpError::bad_data_format(format!("Key update public key could not be parsed: {}", e))
    })?;

    let old_cert_id = request.control(oid::REG_CTRL_OLD_CERT_ID).ok_or_else(|| {
        CmpError::bad_request("Key update request does not identify the certificate to replace")
    })?;
    let serial = decode_cert_id_serial(&old_cert_id.value)?;

    let current = backend
        .lookup_by_serial(&serial)
        .map_err(|e| CmpError::backend(format!("Failed to look up certificate {}", serial), e))?
        .ok_or_else(|| {
            CmpError::bad_request(format!("No certificate with serial number {}", serial))
        })?;
    if current.state != CertificateState::Valid {
        return Err(CmpError::bad_request(format!(
            "Certificate {} is not valid and cannot be updated",
            serial
        )));
    }

    let current_key = PKey::public_key_from_der(&current.public_key).map_err(|e| {
        CmpError::backend(
            format!("Stored public key of certificate {} is unreadable", serial),
            e.into(),
        )
    })?;
    if new_key.public_eq(&current_key) {
        return Err(CmpError::bad_request(
            "Key update must request a public key different from the current one",
        ));
    }

    let subject = template
        .subject
        .clone()
        .ok_or_else(|| CmpError::bad_cert_template("Certificate template must carry a subject"))?;
    let issuance = issuance_request(request, subject)?;

    let tracking = backend
        .rekey(&ctx.authority, &ctx.profile, &current.id, &issuance)
        .map_err(|e| CmpError::backend("Key update request was not accepted", e))?;
    info!(tracking_ref = %tracking, serial = %serial, "Key update requested");
    Ok(tracking)
}

/// Wait for `tracking` to reach `expected` and build the positive response
/// plus the CA chain for `extraCerts`.
pub fn assemble_response(
    backend: &dyn IssuanceBackend,
    ctx: &ExchangeContext,
    tracking: &TrackingRef,
    expected: TransactionState,
) -> Result<(CertRepMessage, Vec<CmpCertificate>)> {
    let entity = polling::await_state(backend, tracking, expected, &ctx.poll, &ctx.cancel)?;
    let certificate_id = entity.certificate.ok_or_else(|| {
        CmpError::system(format!(
            "Transaction {} completed without a certificate",
            tracking
        ))
    })?;

    let record = backend
        .get_certificate(&certificate_id)
        .map_err(|e| CmpError::backend(format!("Failed to load certificate {}", certificate_id), e))?
        .ok_or_else(|| {
            CmpError::system(format!("Issued certificate {} not found", certificate_id))
        })?;
    let issued = record
        .certificate
        .to_x509()
        .map_err(|e| CmpError::backend("Issued certificate could not be parsed", e))?;
    debug!(
        serial = %record.serial,
        not_after = %issued.not_after(),
        "Certificate ready"
    );

    let chain = if ctx.include_ca_chain {
        let chain = backend.get_ca_chain(&certificate_id).map_err(|e| {
            CmpError::backend(format!("Failed to load CA chain of {}", certificate_id), e)
        })?;
        if let Some(invalid) = chain.iter().find(|ca| ca.state != CertificateState::Valid) {
            return Err(CmpError::system(format!(
                "CA certificate {} in the chain is {:?}",
                invalid.id, invalid.state
            )));
        }
        chain.into_iter().map(|ca| ca.certificate).collect()
    } else {
        Vec::new()
    };

    let response = CertResponse {
        cert_req_id: CERT_REQ_ID,
        status: PkiStatusInfo::accepted(),
        certified_key_pair: Some(CertifiedKeyPair {
            cert_or_enc_cert: CertOrEncCert::Certificate(record.certificate),
            private_key: None,
            publication_info: None,
        }),
        rsp_info: None,
    };
    Ok((
        CertRepMessage {
            ca_pubs: None,
            response: vec![response],
        },
        chain,
    ))
}

fn issuance_request(request: &CertRequest, subject: Name) -> Result<IssuanceRequest> {
    let template = &request.cert_template;
    Ok(IssuanceRequest {
        encoded: BASE64.encode(encode_cert_request(request)?),
        subject,
        public_key: template.public_key.clone(),
        validity: template.validity.clone(),
        extensions: template.extensions.clone(),
    })
}
