//! Signature-based proof of possession
//!
//! The requester signs the DER encoding of the `CertTemplate` with the
//! private key whose public half is in the template (RFC 4211 Section 4.1,
//! case without `poposkInput`). The signature algorithm comes from the
//! `POPOSigningKey.algorithmIdentifier` and is mapped to a digest and key
//! type through openssl's signature OID table.

use openssl::asn1::Asn1Object;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::PKey;
use openssl::sign::Verifier;

use crate::error::{CmpError, Result};
use crate::message::encoding::encode_cert_template;
use crate::message::{CertTemplate, PopoSigningKey};

/// Digest and key type of a signature algorithm OID.
pub struct SignatureAlgorithm {
    /// `None` for algorithms that hash internally, such as Ed25519.
    pub digest: Option<MessageDigest>,
    pub key_type: Nid,
}

/// Resolve a dotted signature algorithm OID, or `None` if openssl does not
/// know it as a signature algorithm.
pub fn resolve_signature_algorithm(oid: &str) -> Option<SignatureAlgorithm> {
    let nid = Asn1Object::from_str(oid).ok()?.nid();
    if nid == Nid::UNDEF {
        return None;
    }
    let algorithms = nid.signature_algorithms()?;
    let digest = if algorithms.digest == Nid::UNDEF {
        None
    } else {
        Some(MessageDigest::from_nid(algorithms.digest)?)
    };
    Some(SignatureAlgorithm {
        digest,
        key_type: algorithms.pkey,
    })
}

/// Verify `popo.signature` over the DER-encoded `template`.
///
/// # Errors
/// `badPOP` when the template has no usable public key, the algorithm is
/// unknown or does not fit the key, or the signature does not verify.
pub fn verify_template_signature(template: &CertTemplate, popo: &PopoSigningKey) -> Result<()> {
    let spki = template.public_key.as_deref().ok_or_else(|| {
        CmpError::bad_pop("Certificate template carries no public key to verify the proof against")
    })?;
    let public_key = PKey::public_key_from_der(spki).map_err(|e| {
        CmpError::bad_pop(format!("Template public key could not be parsed: {}", e))
    })?;

    let oid = &popo.algorithm_identifier.algorithm;
    let algorithm = resolve_signature_algorithm(oid)
        .ok_or_else(|| CmpError::bad_pop(format!("Unsupported POP signature algorithm {}", oid)))?;
    if Nid::from_raw(public_key.id().as_raw()) != algorithm.key_type {
        return Err(CmpError::bad_pop(format!(
            "POP signature algorithm {} does not match the template key type",
            oid
        )));
    }

    let signed = encode_cert_template(template)?;
    let verified = match algorithm.digest {
        Some(digest) => Verifier::new(digest, &public_key).and_then(|mut verifier| {
            verifier.update(&signed)?;
            verifier.verify(&popo.signature)
        }),
        None => Verifier::new_without_digest(&public_key)
            .and_then(|mut verifier| verifier.verify_oneshot(&popo.signature, &signed)),
    };

    match verified {
        Ok(true) => Ok(()),
        Ok(false) | Err(_) => Err(CmpError::bad_pop(
            "POP signature does not verify against the certificate template",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureInfo;
    use crate::message::{oid, AlgorithmIdentifier, Name, OptionalValidity, TimeEncoding};
    use crate::test_support::{ec_key, sign_template, spki_der};
    use chrono::{TimeZone, Utc};
    use yasna::Tag;

    fn template_for(key: &PKey<openssl::pkey::Private>, subject: &str) -> CertTemplate {
        CertTemplate {
            subject: Some(Name::parse_dn(subject).unwrap()),
            public_key: Some(spki_der(key)),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolves_known_algorithms() {
        let ecdsa = resolve_signature_algorithm(oid::ECDSA_WITH_SHA256).unwrap();
        assert_eq!(ecdsa.key_type, Nid::X9_62_ID_ECPUBLICKEY);
        assert!(ecdsa.digest.is_some());

        let rsa = resolve_signature_algorithm(oid::SHA256_WITH_RSA_ENCRYPTION).unwrap();
        assert_eq!(rsa.key_type, Nid::RSAENCRYPTION);

        let ed25519 = resolve_signature_algorithm(oid::ED25519).unwrap();
        assert!(ed25519.digest.is_none());

        assert!(resolve_signature_algorithm("1.2.3.4.5").is_none());
        assert!(resolve_signature_algorithm("not an oid").is_none());
    }

    #[test]
    fn test_valid_ecdsa_signature_verifies() {
        let key = ec_key();
        let template = template_for(&key, "CN=test");
        let popo = sign_template(&template, &key);
        assert!(verify_template_signature(&template, &popo).is_ok());
    }

    #[test]
    fn test_ed25519_signature_verifies() {
        let key = PKey::generate_ed25519().unwrap();
        let template = template_for(&key, "CN=edwards");
        let signed = encode_cert_template(&template).unwrap();
        let mut signer = openssl::sign::Signer::new_without_digest(&key).unwrap();
        let signature = signer.sign_oneshot_to_vec(&signed).unwrap();
        let popo = PopoSigningKey {
            poposk_input: None,
            algorithm_identifier: AlgorithmIdentifier::new(oid::ED25519),
            signature,
        };
        assert!(verify_template_signature(&template, &popo).is_ok());
    }

    fn utc_time(text: &[u8]) -> Vec<u8> {
        let mut der = vec![0x17, text.len() as u8];
        der.extend_from_slice(text);
        der
    }

    #[test]
    fn test_signature_over_utc_time_validity_verifies() {
        let key = ec_key();
        let spki = spki_der(&key);
        // the requester's own encoding: validity in UTCTime, then publicKey [6]
        let mut public_key = spki.clone();
        public_key[0] = 0xA6;
        let requester_der = yasna::construct_der(|w| {
            w.write_sequence(|seq| {
                seq.next().write_tagged_implicit(Tag::context(4), |w| {
                    w.write_sequence(|validity| {
                        validity.next().write_tagged(Tag::context(0), |w| {
                            w.write_der(&utc_time(b"300102030405Z"))
                        });
                        validity.next().write_tagged(Tag::context(1), |w| {
                            w.write_der(&utc_time(b"310102030405Z"))
                        });
                    })
                });
                seq.next().write_der(&public_key);
            })
        });
        let mut signer = openssl::sign::Signer::new(MessageDigest::sha256(), &key).unwrap();
        signer.update(&requester_der).unwrap();
        let popo = PopoSigningKey {
            poposk_input: None,
            algorithm_identifier: AlgorithmIdentifier::new(oid::ECDSA_WITH_SHA256),
            signature: signer.sign_to_vec().unwrap(),
        };

        let mut template = CertTemplate {
            validity: Some(OptionalValidity {
                not_before: Some(Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap()),
                not_after: Some(Utc.with_ymd_and_hms(2031, 1, 2, 3, 4, 5).unwrap()),
                not_before_encoding: TimeEncoding::UtcTime,
                not_after_encoding: TimeEncoding::UtcTime,
            }),
            public_key: Some(spki),
            ..Default::default()
        };
        assert_eq!(encode_cert_template(&template).unwrap(), requester_der);
        assert!(verify_template_signature(&template, &popo).is_ok());

        // the same instants in GeneralizedTime are different signed bytes
        if let Some(validity) = template.validity.as_mut() {
            validity.not_before_encoding = TimeEncoding::GeneralizedTime;
        }
        let err = verify_template_signature(&template, &popo).unwrap_err();
        assert_eq!(err.failure_info(), FailureInfo::BadPop);
    }

    #[test]
    fn test_signature_over_other_template_is_bad_pop() {
        let key = ec_key();
        let signed_template = template_for(&key, "CN=test");
        let popo = sign_template(&signed_template, &key);

        let presented = template_for(&key, "CN=someone-else");
        let err = verify_template_signature(&presented, &popo).unwrap_err();
        assert_eq!(err.failure_info(), FailureInfo::BadPop);
    }

    #[test]
    fn test_signature_by_other_key_is_bad_pop() {
        let key = ec_key();
        let other = ec_key();
        let template = template_for(&key, "CN=test");
        let popo = sign_template(&template, &other);
        let err = verify_template_signature(&template, &popo).unwrap_err();
        assert_eq!(err.failure_info(), FailureInfo::BadPop);
    }

    #[test]
    fn test_algorithm_must_match_key_type() {
        let key = ec_key();
        let template = template_for(&key, "CN=test");
        let mut popo = sign_template(&template, &key);
        popo.algorithm_identifier = AlgorithmIdentifier::new(oid::SHA256_WITH_RSA_ENCRYPTION);
        let err = verify_template_signature(&template, &popo).unwrap_err();
        assert_eq!(err.failure_info(), FailureInfo::BadPop);
    }

    #[test]
    fn test_missing_public_key_is_bad_pop() {
        let key = ec_key();
        let mut template = template_for(&key, "CN=test");
        let popo = sign_template(&template, &key);
        template.public_key = None;
        let err = verify_template_signature(&template, &popo).unwrap_err();
        assert_eq!(err.failure_info(), FailureInfo::BadPop);
    }
}
