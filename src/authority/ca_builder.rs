//! CA certificate generation for the reference authority
//!
//! The authority runs a two-level hierarchy created at bootstrap:
//!
//! ```text
//! Root CA (self-signed, pathlen=1)
//!   └── Issuing CA (signed by Root, pathlen=0)
//!       └── End-entity certificates issued over CMP
//! ```
//!
//! # Certificate Properties
//! - **Key Usage**: keyCertSign, cRLSign, digitalSignature (critical)
//! - **Basic Constraints**: CA=true, critical
//! - **Key**: RSA, 4096-bit unless configured otherwise
//! - **Serial Number**: random 128-bit
//!
//! # Example
//! ```rust,no_run
//! # use anyhow::Result;
//! # use cmp_engine::authority::ca_builder::CaBuilder;
//! # fn example() -> Result<()> {
//! let (root_key, root_cert) = CaBuilder::new()
//!     .subject_common_name("Example Root CA".to_string())
//!     .organization("Example Corporation".to_string())
//!     .country("US".to_string())
//!     .validity_days(3650)
//!     .build()?;
//!
//! let (issuing_key, issuing_cert) = CaBuilder::new()
//!     .subject_common_name("Example Issuing CA".to_string())
//!     .path_length(0)
//!     .signed_by(&root_key, &root_cert)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use anyhow::{anyhow, Result};
use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectKeyIdentifier};
use openssl::x509::{X509Name, X509Ref, X509};

pub(crate) const X509_VERSION_3: i32 = 2;
pub const RSA_KEY_SIZE_DEFAULT: u32 = 4096;
const ROOT_CA_PATH_LENGTH: u32 = 1;

/// Random 128-bit serial number.
pub(crate) fn random_serial() -> Result<Asn1Integer> {
    let mut serial = BigNum::new()?;
    serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
    Ok(serial.to_asn1_integer()?)
}

/// Builder for an RSA key pair and CA certificate.
///
/// Without [`signed_by`](Self::signed_by) the certificate is self-signed and
/// becomes a trust anchor. Only the common name is required; the other
/// distinguished-name fields are added when non-empty.
pub struct CaBuilder<'a> {
    subject_common_name: String,
    organization: String,
    organizational_unit: String,
    locality: String,
    state: String,
    country: String,
    validity_days: u32,
    key_size: u32,
    path_length: u32,
    parent: Option<(&'a PKey<Private>, &'a X509Ref)>,
}

impl<'a> CaBuilder<'a> {
    pub fn new() -> Self {
        Self {
            subject_common_name: String::new(),
            organization: String::new(),
            organizational_unit: String::new(),
            locality: String::new(),
            state: String::new(),
            country: String::new(),
            validity_days: 365,
            key_size: RSA_KEY_SIZE_DEFAULT,
            path_length: ROOT_CA_PATH_LENGTH,
            parent: None,
        }
    }

    pub fn subject_common_name(mut self, cn: String) -> Self {
        self.subject_common_name = cn;
        self
    }

    pub fn organization(mut self, org: String) -> Self {
        self.organization = org;
        self
    }

    pub fn organizational_unit(mut self, ou: String) -> Self {
        self.organizational_unit = ou;
        self
    }

    pub fn locality(mut self, locality: String) -> Self {
        self.locality = locality;
        self
    }

    pub fn state(mut self, state: String) -> Self {
        self.state = state;
        self
    }

    /// Two-letter ISO country code.
    pub fn country(mut self, country: String) -> Self {
        self.country = country;
        self
    }

    pub fn validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    /// RSA modulus size in bits.
    pub fn key_size(mut self, bits: u32) -> Self {
        self.key_size = bits;
        self
    }

    /// Basic constraints path length; 0 means the CA may only sign end entities.
    pub fn path_length(mut self, path_length: u32) -> Self {
        self.path_length = path_length;
        self
    }

    /// Sign with `key`, naming `cert`'s subject as issuer.
    pub fn signed_by(mut self, key: &'a PKey<Private>, cert: &'a X509Ref) -> Self {
        self.parent = Some((key, cert));
        self
    }

    /// Generate the key pair and the signed certificate.
    ///
    /// # Errors
    /// Fails if the common name is empty, a name field is rejected by
    /// openssl, or key generation or signing fails.
    pub fn build(self) -> Result<(PKey<Private>, X509)> {
        if self.subject_common_name.is_empty() {
            return Err(anyhow!("CA common name must not be empty"));
        }
        let rsa = Rsa::generate(self.key_size)
            .map_err(|e| anyhow!("Failed to generate RSA keypair: {}", e))?;
        let private_key =
            PKey::from_rsa(rsa).map_err(|e| anyhow!("Failed to create private key: {}", e))?;

        let mut builder =
            X509::builder().map_err(|e| anyhow!("Failed to create X509 builder: {}", e))?;
        builder
            .set_version(X509_VERSION_3)
            .map_err(|e| anyhow!("Failed to set version: {}", e))?;
        builder.set_serial_number(&*random_serial()?)?;

        let name = self.subject_name()?;
        builder
            .set_subject_name(&name)
            .map_err(|e| anyhow!("Failed to set subject: {}", e))?;
        let issuer = match self.parent {
            Some((_, parent_cert)) => parent_cert.subject_name(),
            None => &*name,
        };
        builder
            .set_issuer_name(issuer)
            .map_err(|e| anyhow!("Failed to set issuer: {}", e))?;

        let not_before = Asn1Time::days_from_now(0)
            .map_err(|e| anyhow!("Failed to create not_before: {}", e))?;
        builder
            .set_not_before(&not_before)
            .map_err(|e| anyhow!("Failed to set not_before: {}", e))?;
        let not_after = Asn1Time::days_from_now(self.validity_days)
            .map_err(|e| anyhow!("Failed to create not_after: {}", e))?;
        builder
            .set_not_after(&not_after)
            .map_err(|e| anyhow!("Failed to set not_after: {}", e))?;

        builder
            .set_pubkey(&private_key)
            .map_err(|e| anyhow!("Failed to set public key: {}", e))?;

        let basic_constraints = BasicConstraints::new()
            .critical()
            .ca()
            .pathlen(self.path_length)
            .build()
            .map_err(|e| anyhow!("Failed to build BasicConstraints: {}", e))?;
        builder
            .append_extension(basic_constraints)
            .map_err(|e| anyhow!("Failed to add BasicConstraints: {}", e))?;

        let key_usage = KeyUsage::new()
            .critical()
            .key_cert_sign()
            .crl_sign()
            .digital_signature()
            .build()
            .map_err(|e| anyhow!("Failed to build KeyUsage: {}", e))?;
        builder
            .append_extension(key_usage)
            .map_err(|e| anyhow!("Failed to add KeyUsage: {}", e))?;

        let subject_key_id = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(None, None))
            .map_err(|e| anyhow!("Failed to build SubjectKeyIdentifier: {}", e))?;
        builder
            .append_extension(subject_key_id)
            .map_err(|e| anyhow!("Failed to add SubjectKeyIdentifier: {}", e))?;

        let signing_key = self.parent.map(|(key, _)| key).unwrap_or(&private_key);
        builder
            .sign(signing_key, MessageDigest::sha256())
            .map_err(|e| anyhow!("Failed to sign certificate: {}", e))?;

        Ok((private_key, builder.build()))
    }

    fn subject_name(&self) -> Result<X509Name> {
        let mut name_builder =
            X509Name::builder().map_err(|e| anyhow!("Failed to create name builder: {}", e))?;
        let fields = [
            (Nid::COMMONNAME, &self.subject_common_name, "CN"),
            (Nid::ORGANIZATIONNAME, &self.organization, "organization"),
            (Nid::ORGANIZATIONALUNITNAME, &self.organizational_unit, "organizational unit"),
            (Nid::LOCALITYNAME, &self.locality, "locality"),
            (Nid::STATEORPROVINCENAME, &self.state, "state/province"),
            (Nid::COUNTRYNAME, &self.country, "country"),
        ];
        for (nid, value, label) in fields {
            if value.is_empty() {
                continue;
            }
            name_builder
                .append_entry_by_nid(nid, value)
                .map_err(|e| anyhow!("Failed to set {}: {}", label, e))?;
        }
        Ok(name_builder.build())
    }
}

impl Default for CaBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_self_signed_ca() {
        let (key, cert) = CaBuilder::new()
            .subject_common_name("Test Root CA".to_string())
            .organization("Example".to_string())
            .key_size(2048)
            .build()
            .unwrap();
        assert!(cert.verify(&key).unwrap());
        assert_eq!(
            cert.subject_name().to_der().unwrap(),
            cert.issuer_name().to_der().unwrap()
        );
        assert_eq!(key.bits(), 2048);
    }

    #[test]
    fn test_issuing_ca_is_signed_by_parent() {
        let (root_key, root_cert) = CaBuilder::new()
            .subject_common_name("Test Root CA".to_string())
            .key_size(2048)
            .build()
            .unwrap();
        let (issuing_key, issuing_cert) = CaBuilder::new()
            .subject_common_name("Test Issuing CA".to_string())
            .key_size(2048)
            .path_length(0)
            .signed_by(&root_key, &root_cert)
            .build()
            .unwrap();

        assert!(issuing_cert.verify(&root_key).unwrap());
        assert!(!issuing_cert.verify(&issuing_key).unwrap());
        assert_eq!(
            issuing_cert.issuer_name().to_der().unwrap(),
            root_cert.subject_name().to_der().unwrap()
        );
    }

    #[test]
    fn test_common_name_required() {
        assert!(CaBuilder::new().key_size(2048).build().is_err());
    }
}
