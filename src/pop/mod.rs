//! Proof-of-possession verification for certification requests
//!
//! Only the signature variant computed directly over the certificate template
//! is accepted. Every other variant is rejected with `badPOP`:
//!
//! - `raVerified`: identity verification is not delegated to a third party
//! - `keyEncipherment`, `keyAgreement`: not implemented
//! - `signature` with a separate `poposkInput`: not implemented
//! - a choice tag the decoder could not map: not supported

pub mod signing_key;

use crate::error::{CmpError, Result};
use crate::message::{PkiMessage, ProofOfPossession};

/// Verify the proof of possession of a certification-family request.
///
/// Calling this for any other body type is a pipeline error and yields
/// `systemFailure`.
pub fn verify_pop(message: &PkiMessage) -> Result<()> {
    let requests = message.body.cert_requests().ok_or_else(|| {
        CmpError::system(format!(
            "Proof of possession requested for {} body",
            message.body.label()
        ))
    })?;
    let entry = requests
        .first()
        .ok_or_else(|| CmpError::bad_pop("Certification request has no entry to prove"))?;

    match &entry.popo {
        None => Err(CmpError::bad_pop("Proof of possession is missing")),
        Some(ProofOfPossession::RaVerified) => Err(CmpError::bad_pop(
            "raVerified proof of possession is not accepted",
        )),
        Some(ProofOfPossession::Signature(popo)) if popo.poposk_input.is_some() => Err(
            CmpError::bad_pop("Signature proof with POPOSigningKeyInput is not implemented"),
        ),
        Some(ProofOfPossession::Signature(popo)) => {
            signing_key::verify_template_signature(&entry.cert_req.cert_template, popo)
        }
        Some(ProofOfPossession::KeyEncipherment(_)) => Err(CmpError::bad_pop(
            "keyEncipherment proof of possession is not implemented",
        )),
        Some(ProofOfPossession::KeyAgreement(_)) => Err(CmpError::bad_pop(
            "keyAgreement proof of possession is not implemented",
        )),
        Some(ProofOfPossession::Unrecognized { tag }) => Err(CmpError::bad_pop(format!(
            "Proof of possession choice [{}] is not supported",
            tag
        ))),
    }
}
