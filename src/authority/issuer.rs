//! End-entity certificate issuance
//!
//! Builds the certificate for an accepted CMP request. Unlike the CA
//! certificates the key pair is the requester's: subject and public key come
//! from the request and no private key is ever generated here.
//!
//! # Certificate Properties
//! - **Key Usage**: digitalSignature, keyEncipherment (critical)
//! - **Basic Constraints**: CA=false (critical)
//! - **Validity**: as requested, clamped to the profile's maximum
//! - **Serial Number**: random 128-bit
//! - **Requested extensions**: only subjectAltName and extendedKeyUsage are copied

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use openssl::asn1::{Asn1Object, Asn1OctetString, Asn1Time};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, KeyUsage, SubjectKeyIdentifier,
};
use openssl::x509::{X509Extension, X509Ref, X509};

use super::ca_builder::{random_serial, X509_VERSION_3};
use crate::backend::IssuanceRequest;
use crate::message::Extension;

/// Requested extensions copied into issued certificates.
const COPIED_EXTENSIONS: [&str; 2] = [
    "2.5.29.17", // subjectAltName
    "2.5.29.37", // extKeyUsage
];

/// Builder for an end-entity certificate signed by the issuing CA.
pub struct EndEntityBuilder<'a> {
    ca_key: &'a PKeyRef<Private>,
    ca_cert: &'a X509Ref,
    max_validity_days: u32,
}

impl<'a> EndEntityBuilder<'a> {
    pub fn new(ca_key: &'a PKeyRef<Private>, ca_cert: &'a X509Ref) -> Self {
        Self {
            ca_key,
            ca_cert,
            max_validity_days: 365,
        }
    }

    /// Upper bound on the issued validity, from the certificate profile.
    pub fn max_validity_days(mut self, days: u32) -> Self {
        self.max_validity_days = days;
        self
    }

    /// Issue a certificate for `request`.
    ///
    /// # Errors
    /// Fails if the request has no public key, carries a name or key openssl
    /// cannot parse, or signing fails.
    pub fn build(&self, request: &IssuanceRequest) -> Result<X509> {
        let public_key_der = request
            .public_key
            .as_deref()
            .ok_or_else(|| anyhow!("Issuance request carries no public key"))?;
        let public_key = PKey::public_key_from_der(public_key_der)
            .context("Failed to parse requested public key")?;
        let subject = request.subject.to_x509_name()?;

        let mut builder =
            X509::builder().map_err(|e| anyhow!("Failed to create X509 builder: {}", e))?;
        builder
            .set_version(X509_VERSION_3)
            .map_err(|e| anyhow!("Failed to set version: {}", e))?;
        builder.set_serial_number(&*random_serial()?)?;
        builder
            .set_subject_name(&subject)
            .map_err(|e| anyhow!("Failed to set subject: {}", e))?;
        builder
            .set_issuer_name(self.ca_cert.subject_name())
            .map_err(|e| anyhow!("Failed to set issuer from issuing CA: {}", e))?;

        let (not_before, not_after) = self.validity(request, Utc::now());
        builder
            .set_not_before(&*Asn1Time::from_unix(not_before.timestamp())?)
            .map_err(|e| anyhow!("Failed to set not_before: {}", e))?;
        builder
            .set_not_after(&*Asn1Time::from_unix(not_after.timestamp())?)
            .map_err(|e| anyhow!("Failed to set not_after: {}", e))?;
        builder
            .set_pubkey(&public_key)
            .map_err(|e| anyhow!("Failed to set public key: {}", e))?;

        let basic_constraints = BasicConstraints::new()
            .critical()
            .build()
            .map_err(|e| anyhow!("Failed to build BasicConstraints: {}", e))?;
        builder
            .append_extension(basic_constraints)
            .map_err(|e| anyhow!("Failed to add BasicConstraints: {}", e))?;

        let key_usage = KeyUsage::new()
            .critical()
            .digital_signature()
            .key_encipherment()
            .build()
            .map_err(|e| anyhow!("Failed to build KeyUsage: {}", e))?;
        builder
            .append_extension(key_usage)
            .map_err(|e| anyhow!("Failed to add KeyUsage: {}", e))?;

        let subject_key_id = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(Some(self.ca_cert), None))
            .map_err(|e| anyhow!("Failed to build SubjectKeyIdentifier: {}", e))?;
        builder
            .append_extension(subject_key_id)
            .map_err(|e| anyhow!("Failed to add SubjectKeyIdentifier: {}", e))?;
        let authority_key_id = AuthorityKeyIdentifier::new()
            .keyid(false)
            .build(&builder.x509v3_context(Some(self.ca_cert), None))
            .map_err(|e| anyhow!("Failed to build AuthorityKeyIdentifier: {}", e))?;
        builder
            .append_extension(authority_key_id)
            .map_err(|e| anyhow!("Failed to add AuthorityKeyIdentifier: {}", e))?;

        for extension in copied_extensions(request.extensions.as_deref())? {
            builder
                .append_extension(extension)
                .map_err(|e| anyhow!("Failed to add requested extension: {}", e))?;
        }

        builder
            .sign(self.ca_key, MessageDigest::sha256())
            .map_err(|e| anyhow!("Failed to sign certificate: {}", e))?;
        Ok(builder.build())
    }

    /// Requested validity, starting no earlier than `now` and lasting at most
    /// the profile maximum. A missing end uses the full profile period.
    fn validity(&self, request: &IssuanceRequest, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let max = Duration::days(i64::from(self.max_validity_days));
        let requested = request.validity.as_ref();
        let not_before = requested
            .and_then(|v| v.not_before)
            .map_or(now, |start| start.max(now));
        let limit = not_before + max;
        let not_after = requested
            .and_then(|v| v.not_after)
            .map_or(limit, |end| end.min(limit));
        (not_before, not_after)
    }
}

fn copied_extensions(requested: Option<&[Extension]>) -> Result<Vec<X509Extension>> {
    requested
        .unwrap_or_default()
        .iter()
        .filter(|ext| COPIED_EXTENSIONS.contains(&ext.extn_id.as_str()))
        .map(|ext| {
            let oid = Asn1Object::from_str(&ext.extn_id)?;
            let value = Asn1OctetString::new_from_bytes(&ext.extn_value)?;
            X509Extension::new_from_der(&oid, ext.critical, &value)
                .with_context(|| format!("Failed to encode requested extension {}", ext.extn_id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::ca_builder::CaBuilder;
    use crate::message::{Name, OptionalValidity};
    use crate::test_support::{ec_key, spki_der};

    fn issuing_ca() -> (PKey<Private>, X509) {
        CaBuilder::new()
            .subject_common_name("Test Issuing CA".to_string())
            .key_size(2048)
            .path_length(0)
            .build()
            .unwrap()
    }

    fn request(validity: Option<OptionalValidity>) -> IssuanceRequest {
        IssuanceRequest {
            encoded: String::new(),
            subject: Name::parse_dn("CN=device-1,O=Example").unwrap(),
            public_key: Some(spki_der(&ec_key())),
            validity,
            extensions: None,
        }
    }

    #[test]
    fn test_issues_for_requested_subject_and_key() {
        let (ca_key, ca_cert) = issuing_ca();
        let request = request(None);
        let cert = EndEntityBuilder::new(&ca_key, &ca_cert).build(&request).unwrap();

        assert!(cert.verify(&ca_key).unwrap());
        assert_eq!(
            Name::from_x509_name(cert.subject_name()).unwrap(),
            request.subject
        );
        assert_eq!(
            cert.public_key().unwrap().public_key_to_der().unwrap(),
            request.public_key.unwrap()
        );
        assert_eq!(
            cert.issuer_name().to_der().unwrap(),
            ca_cert.subject_name().to_der().unwrap()
        );
    }

    #[test]
    fn test_validity_is_clamped_to_profile() {
        let (ca_key, ca_cert) = issuing_ca();
        let builder = EndEntityBuilder::new(&ca_key, &ca_cert).max_validity_days(30);
        let now = Utc::now();

        let long = request(Some(OptionalValidity::new(
            Some(now - Duration::days(5)),
            Some(now + Duration::days(400)),
        )));
        let (start, end) = builder.validity(&long, now);
        assert_eq!(start, now);
        assert_eq!(end, now + Duration::days(30));

        let short = request(Some(OptionalValidity::new(
            None,
            Some(now + Duration::days(3)),
        )));
        assert_eq!(builder.validity(&short, now).1, now + Duration::days(3));
        assert_eq!(builder.validity(&request(None), now).1, now + Duration::days(30));
    }

    #[test]
    fn test_missing_public_key_is_an_error() {
        let (ca_key, ca_cert) = issuing_ca();
        let mut request = request(None);
        request.public_key = None;
        assert!(EndEntityBuilder::new(&ca_key, &ca_cert).build(&request).is_err());
    }

    #[test]
    fn test_only_allowed_extensions_are_copied() {
        let basic_constraints_ca = Extension {
            extn_id: "2.5.29.19".to_string(),
            critical: true,
            extn_value: vec![0x30, 0x03, 0x01, 0x01, 0xff],
        };
        // SEQUENCE { [2] "a.example" }
        let mut san = vec![0x30, 0x0b, 0x82, 0x09];
        san.extend_from_slice(b"a.example");
        let alt_name = Extension {
            extn_id: "2.5.29.17".to_string(),
            critical: false,
            extn_value: san,
        };
        let copied = copied_extensions(Some(&[basic_constraints_ca, alt_name])).unwrap();
        assert_eq!(copied.len(), 1);
    }
}
