//! Validation dispatcher and structural validators
//!
//! Every inbound message passes through [`validate`] before anything else
//! looks at it. The dispatcher first compares the header with the protection
//! scheme the exchange expects, then selects one validator per body type with
//! an exhaustive match over [`BodyType`]:
//!
//! | Body | Validator |
//! |------|-----------|
//! | ir, cr, kur | [`cert_request::validate`] |
//! | ip, cp, kup, ccp | [`cert_response::validate`] |
//! | rr / rp | [`revocation::validate_request`] / [`revocation::validate_response`] |
//! | certConf, error, pkiconf | [`confirm`] |
//! | p10cr, pollReq, pollRep, genm, genp, nested | not implemented |
//! | everything else, unknown tags | unsupported |
//!
//! Validators are plain functions of the message and the exchange context;
//! they have no side effects. A panic inside one is reported as
//! `systemFailure`.

pub mod cert_request;
pub mod cert_response;
pub mod confirm;
pub mod revocation;
pub mod status;

use crate::context::{ExchangeContext, ProtectionScheme};
use crate::error::{guarded, CmpError, FailureInfo, Result};
use crate::message::{oid, BodyType, PkiBody, PkiMessage};
use crate::pop::signing_key::resolve_signature_algorithm;

/// Structural validator for one body type.
pub type Validator = fn(&PkiMessage, &ExchangeContext) -> Result<()>;

/// Validate an inbound message against the exchange configuration.
pub fn validate(message: &PkiMessage, ctx: &ExchangeContext) -> Result<()> {
    guarded("validator", || {
        check_protection(message, ctx.protection)?;
        let validator = validator_for(&message.body)?;
        validator(message, ctx)
    })
}

/// Look up the validator for a body.
///
/// # Errors
/// [`CmpError::NotImplemented`] for recognised types this engine does not
/// process, [`CmpError::Unsupported`] for types without a validator and tags
/// outside the enumeration.
pub fn validator_for(body: &PkiBody) -> Result<Validator> {
    let body_type = body
        .body_type()
        .ok_or_else(|| CmpError::Unsupported { body: body.label() })?;
    match body_type {
        BodyType::Ir | BodyType::Cr | BodyType::Kur => Ok(cert_request::validate),
        BodyType::Ip | BodyType::Cp | BodyType::Kup | BodyType::Ccp => {
            Ok(cert_response::validate)
        }
        BodyType::Rr => Ok(revocation::validate_request),
        BodyType::Rp => Ok(revocation::validate_response),
        BodyType::CertConf => Ok(confirm::validate_cert_conf),
        BodyType::Error => Ok(confirm::validate_error),
        BodyType::PkiConf => Ok(confirm::validate_pki_conf),
        BodyType::P10cr
        | BodyType::PollReq
        | BodyType::PollRep
        | BodyType::GenM
        | BodyType::GenP
        | BodyType::Nested => Err(CmpError::NotImplemented { body: body_type }),
        BodyType::Popdecc
        | BodyType::Popdecr
        | BodyType::Krr
        | BodyType::Krp
        | BodyType::Ccr
        | BodyType::Ckuann
        | BodyType::Cann
        | BodyType::Rann
        | BodyType::CrlAnn => Err(CmpError::Unsupported {
            body: body_type.name().to_string(),
        }),
    }
}

/// Compare header protection with the expected scheme. The protection bits
/// themselves are verified by the transport's protection stage.
fn check_protection(message: &PkiMessage, scheme: ProtectionScheme) -> Result<()> {
    if scheme == ProtectionScheme::None {
        return Ok(());
    }
    let alg = message.header.protection_alg.as_ref().ok_or_else(|| {
        CmpError::rejected(
            FailureInfo::BadMessageCheck,
            "Message protection is required but protectionAlg is missing",
        )
    })?;
    if message.protection.is_none() {
        return Err(CmpError::rejected(
            FailureInfo::BadMessageCheck,
            "Message protection is required but missing",
        ));
    }

    let is_mac = alg.algorithm == oid::PASSWORD_BASED_MAC || alg.algorithm == oid::DH_BASED_MAC;
    let is_signature = resolve_signature_algorithm(&alg.algorithm).is_some();
    match scheme {
        ProtectionScheme::Signature if is_signature => Ok(()),
        ProtectionScheme::Signature if is_mac => Err(CmpError::rejected(
            FailureInfo::WrongIntegrity,
            format!("Signature protection expected, found MAC algorithm {}", alg.algorithm),
        )),
        ProtectionScheme::PasswordBasedMac if alg.algorithm == oid::PASSWORD_BASED_MAC => Ok(()),
        ProtectionScheme::PasswordBasedMac if is_signature || is_mac => Err(CmpError::rejected(
            FailureInfo::WrongIntegrity,
            format!(
                "Password-based MAC protection expected, found {}",
                alg.algorithm
            ),
        )),
        _ => Err(CmpError::rejected(
            FailureInfo::BadAlg,
            format!("Unsupported protection algorithm {}", alg.algorithm),
        )),
    }
}
