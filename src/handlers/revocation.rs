//! Revocation handler (rr -> rp)
//!
//! Each `RevDetails` entry is processed on its own. A failing entry produces
//! a `revocationWarning` status with its failure code and processing moves
//! on to the next entry; the response keeps request order.

use tracing::{info, warn};

use super::HandlerOutput;
use crate::backend::{CertificateRecord, CertificateState, IssuanceBackend, RevocationReason};
use crate::context::ExchangeContext;
use crate::error::{guarded, CmpError, FailureInfo, Result};
use crate::message::encoding::decode_enumerated;
use crate::message::{
    oid, CertId, GeneralName, Name, PkiBody, PkiMessage, PkiStatus, PkiStatusInfo, RevDetails,
    RevRepContent, SerialNumber,
};

pub fn handle_revocation(
    backend: &dyn IssuanceBackend,
    request: &PkiMessage,
    ctx: &ExchangeContext,
) -> Result<HandlerOutput> {
    let PkiBody::Rr(details) = &request.body else {
        return Err(CmpError::system(format!(
            "Revocation handler invoked for {}",
            request.body.label()
        )));
    };

    let mut status = Vec::with_capacity(details.len());
    let mut rev_certs = Vec::new();
    for (index, detail) in details.iter().enumerate() {
        let mut located = None;
        let outcome = guarded("revocation entry", || {
            revoke_entry(backend, ctx, detail, &mut located)
        });
        match outcome {
            Ok(()) => status.push(PkiStatusInfo::positive(PkiStatus::RevocationNotification)),
            Err(err) => {
                if err.is_system() {
                    warn!(entry = index, failure = %err.failure_info(), error = ?err, "Revocation entry failed");
                } else {
                    warn!(entry = index, failure = %err.failure_info(), "Revocation entry rejected: {}", err);
                }
                status.push(PkiStatusInfo::negative(
                    PkiStatus::RevocationWarning,
                    err.failure_info(),
                    err.client_message(),
                ));
            }
        }

        // revCerts pairs with status by index, so every entry gets a CertId;
        // an entry without a serial number is answered with serial 0
        let serial = detail
            .cert_details
            .serial_number
            .clone()
            .unwrap_or_else(|| SerialNumber::from_bytes(&[]));
        let issuer = detail
            .cert_details
            .issuer
            .clone()
            .or_else(|| located.map(|record: CertificateRecord| record.issuer))
            .unwrap_or_else(Name::empty);
        rev_certs.push(CertId {
            issuer: GeneralName::DirectoryName(issuer),
            serial_number: serial,
        });
    }

    Ok(HandlerOutput::new(PkiBody::Rp(RevRepContent {
        status,
        rev_certs: Some(rev_certs),
        crls: None,
    })))
}

fn revoke_entry(
    backend: &dyn IssuanceBackend,
    ctx: &ExchangeContext,
    detail: &RevDetails,
    located: &mut Option<CertificateRecord>,
) -> Result<()> {
    let reason = revocation_reason(detail)?;
    let serial = detail
        .cert_details
        .serial_number
        .as_ref()
        .ok_or_else(|| CmpError::bad_request("Revocation entry carries no serial number"))?;

    let record = backend
        .lookup_by_serial(serial)
        .map_err(|e| CmpError::backend(format!("Failed to look up certificate {}", serial), e))?
        .ok_or_else(|| {
            CmpError::bad_request(format!("No certificate with serial number {}", serial))
        })?;
    let record = located.insert(record);

    if let Some(issuer) = &detail.cert_details.issuer {
        if !issuer.matches(&record.issuer) {
            return Err(CmpError::rejected(
                FailureInfo::BadCertId,
                format!(
                    "Certificate {} was not issued by {}",
                    serial,
                    issuer.to_dn_string()
                ),
            ));
        }
    }
    if record.state == CertificateState::Revoked {
        return Err(CmpError::bad_cert_template(format!(
            "Certificate {} is already revoked",
            serial
        )));
    }

    backend
        .revoke(&ctx.authority, &ctx.profile, &record.id, reason)
        .map_err(|e| CmpError::backend(format!("Failed to revoke certificate {}", serial), e))?;
    info!(serial = %serial, reason = ?reason, "Certificate revoked");
    Ok(())
}

fn revocation_reason(detail: &RevDetails) -> Result<RevocationReason> {
    let extension = detail
        .crl_entry_extension(oid::CRL_REASON)
        .ok_or_else(|| CmpError::bad_request("Revocation entry carries no CRL reason"))?;
    let code = decode_enumerated(&extension.extn_value)?;
    RevocationReason::from_code(code)
        .ok_or_else(|| CmpError::bad_request(format!("Unknown CRL reason code {}", code)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CertTemplate, Extension};
    use crate::test_support::{
        certificate_record, context, crl_reason, ec_key, message, revocation_entry, ScriptedBackend,
    };

    fn statuses(output: &HandlerOutput) -> &RevRepContent {
        match &output.body {
            PkiBody::Rp(content) => content,
            other => panic!("expected rp, got {:?}", other),
        }
    }

    #[test]
    fn test_one_bad_entry_does_not_short_circuit() {
        let backend = ScriptedBackend::new();
        let first = certificate_record(&ec_key(), "CN=a", CertificateState::Valid);
        let second = certificate_record(&ec_key(), "CN=b", CertificateState::Revoked);
        let third = certificate_record(&ec_key(), "CN=c", CertificateState::Valid);
        for record in [&first, &second, &third] {
            backend.add_certificate(record.clone());
        }

        let request = message(PkiBody::Rr(vec![
            revocation_entry(&first.serial, Some(1)),
            revocation_entry(&second.serial, Some(1)),
            revocation_entry(&third.serial, Some(4)),
        ]));
        let output = handle_revocation(&backend, &request, &context()).unwrap();
        let content = statuses(&output);

        let kinds: Vec<_> = content.status.iter().map(|s| s.status).collect();
        assert_eq!(
            kinds,
            vec![
                PkiStatus::RevocationNotification,
                PkiStatus::RevocationWarning,
                PkiStatus::RevocationNotification,
            ]
        );
        assert_eq!(
            content.status[1].fail_info.unwrap().single(),
            Some(FailureInfo::BadCertTemplate)
        );

        let rev_certs = content.rev_certs.as_ref().unwrap();
        let serials: Vec<_> = rev_certs.iter().map(|c| c.serial_number.clone()).collect();
        assert_eq!(serials, vec![first.serial, second.serial.clone(), third.serial]);
        assert_eq!(
            rev_certs[1].issuer,
            GeneralName::DirectoryName(second.issuer.clone())
        );
        assert_eq!(backend.calls().len(), 2);
    }

    #[test]
    fn test_entry_failures_are_classified() {
        let backend = ScriptedBackend::new();
        let known = certificate_record(&ec_key(), "CN=a", CertificateState::Valid);
        backend.add_certificate(known.clone());

        let mut wrong_issuer = revocation_entry(&known.serial, Some(0));
        wrong_issuer.cert_details.issuer = Some(Name::parse_dn("CN=Somebody Else").unwrap());

        let mut garbled_reason = revocation_entry(&known.serial, None);
        garbled_reason.crl_entry_details = Some(vec![Extension {
            extn_id: oid::CRL_REASON.to_string(),
            critical: false,
            extn_value: vec![0x02, 0x01, 0x01],
        }]);

        let request = message(PkiBody::Rr(vec![
            revocation_entry(&known.serial, None),
            revocation_entry(&SerialNumber::from_bytes(&[0x42]), Some(1)),
            revocation_entry(&known.serial, Some(7)),
            garbled_reason,
            wrong_issuer,
            RevDetails {
                cert_details: CertTemplate::default(),
                crl_entry_details: Some(vec![crl_reason(1)]),
            },
        ]));
        let output = handle_revocation(&backend, &request, &context()).unwrap();
        let content = statuses(&output);
        let codes: Vec<_> = content
            .status
            .iter()
            .map(|s| s.fail_info.and_then(|f| f.single()))
            .collect();
        assert_eq!(
            codes,
            vec![
                Some(FailureInfo::BadRequest),
                Some(FailureInfo::BadRequest),
                Some(FailureInfo::BadRequest),
                Some(FailureInfo::BadDataFormat),
                Some(FailureInfo::BadCertId),
                Some(FailureInfo::BadRequest),
            ]
        );
        assert!(content
            .status
            .iter()
            .all(|s| s.status == PkiStatus::RevocationWarning));
        let rev_certs = content.rev_certs.as_ref().unwrap();
        assert_eq!(rev_certs.len(), content.status.len());
        assert_eq!(rev_certs[5].serial_number, SerialNumber::from_bytes(&[]));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_entry_without_serial_keeps_cert_ids_aligned() {
        let backend = ScriptedBackend::new();
        let known = certificate_record(&ec_key(), "CN=a", CertificateState::Valid);
        backend.add_certificate(known.clone());

        let request = message(PkiBody::Rr(vec![
            RevDetails {
                cert_details: CertTemplate::default(),
                crl_entry_details: Some(vec![crl_reason(1)]),
            },
            revocation_entry(&known.serial, Some(1)),
        ]));
        let output = handle_revocation(&backend, &request, &context()).unwrap();
        let content = statuses(&output);

        let kinds: Vec<_> = content.status.iter().map(|s| s.status).collect();
        assert_eq!(
            kinds,
            vec![PkiStatus::RevocationWarning, PkiStatus::RevocationNotification]
        );
        let rev_certs = content.rev_certs.as_ref().unwrap();
        assert_eq!(rev_certs.len(), 2);
        assert_eq!(rev_certs[0].serial_number, SerialNumber::from_bytes(&[]));
        assert_eq!(rev_certs[1].serial_number, known.serial);
    }

    #[test]
    fn test_backend_fault_becomes_warning_with_system_failure() {
        let backend = ScriptedBackend::new();
        let known = certificate_record(&ec_key(), "CN=a", CertificateState::Valid);
        backend.add_certificate(known.clone());
        backend.fail_submissions();

        let request = message(PkiBody::Rr(vec![revocation_entry(&known.serial, Some(1))]));
        let output = handle_revocation(&backend, &request, &context()).unwrap();
        let status = &statuses(&output).status[0];
        assert_eq!(status.status, PkiStatus::RevocationWarning);
        assert_eq!(
            status.fail_info.unwrap().single(),
            Some(FailureInfo::SystemFailure)
        );
    }
}
