//! Issuance backend contract
//!
//! The engine never stores certificates or transactions itself. Everything it
//! needs from the certificate authority goes through [`IssuanceBackend`]:
//! asynchronous `issue` / `rekey` submissions that return a [`TrackingRef`],
//! a synchronous `revoke`, and the lookups used by the polling bridge and the
//! handlers.
//!
//! # Transaction Lifecycle
//! ```text
//! Requested ──┬──> Issued
//!             ├──> Rekeyed
//!             ├──> Revoked
//!             └──> Failed
//! ```

use anyhow::{Context, Result};
use openssl::x509::X509Ref;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::message::{hex, CmpCertificate, Extension, Name, OptionalValidity, SerialNumber};

/// Certificate authority the exchange is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthorityRef(pub String);

/// Certificate profile within the authority.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileRef(pub String);

impl fmt::Display for AuthorityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ProfileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle on an asynchronous backend transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackingRef(String);

impl TrackingRef {
    pub fn generate() -> Self {
        TrackingRef(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Certificate identifier: lowercase hex SHA-256 of the certificate DER.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CertificateId(String);

impl CertificateId {
    pub fn from_der(der: &[u8]) -> Self {
        CertificateId(hex(&Sha256::digest(der)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CertificateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    Requested,
    Issued,
    Rekeyed,
    Revoked,
    Failed,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransactionState::Requested)
    }
}

/// Backend-tracked transaction as last read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEntity {
    pub tracking: TrackingRef,
    pub state: TransactionState,
    /// Certificate produced by an issue or rekey transaction.
    pub certificate: Option<CertificateId>,
    /// Backend-side reason for a `Failed` transaction.
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertificateState {
    Valid,
    Revoked,
}

/// A certificate known to the backend together with its lookup keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub id: CertificateId,
    pub serial: SerialNumber,
    pub issuer: Name,
    pub subject: Name,
    pub certificate: CmpCertificate,
    /// `SubjectPublicKeyInfo` DER.
    pub public_key: Vec<u8>,
    pub state: CertificateState,
    pub revocation_reason: Option<RevocationReason>,
}

impl CertificateRecord {
    /// Record for a freshly issued, valid certificate.
    pub fn from_x509(cert: &X509Ref) -> Result<Self> {
        let certificate = CmpCertificate::from_x509(cert)?;
        let public_key = cert
            .public_key()
            .and_then(|key| key.public_key_to_der())
            .context("Failed to extract certificate public key")?;
        Ok(Self {
            id: CertificateId::from_der(certificate.as_der()),
            serial: SerialNumber::from_x509(cert)?,
            issuer: Name::from_x509_name(cert.issuer_name())?,
            subject: Name::from_x509_name(cert.subject_name())?,
            certificate,
            public_key,
            state: CertificateState::Valid,
            revocation_reason: None,
        })
    }
}

/// `CRLReason` codes of RFC 5280 Section 5.3.1 (code 7 is unassigned).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevocationReason {
    Unspecified = 0,
    KeyCompromise = 1,
    CaCompromise = 2,
    AffiliationChanged = 3,
    Superseded = 4,
    CessationOfOperation = 5,
    CertificateHold = 6,
    RemoveFromCrl = 8,
    PrivilegeWithdrawn = 9,
    AaCompromise = 10,
}

impl RevocationReason {
    pub fn from_code(code: i64) -> Option<Self> {
        let reason = match code {
            0 => RevocationReason::Unspecified,
            1 => RevocationReason::KeyCompromise,
            2 => RevocationReason::CaCompromise,
            3 => RevocationReason::AffiliationChanged,
            4 => RevocationReason::Superseded,
            5 => RevocationReason::CessationOfOperation,
            6 => RevocationReason::CertificateHold,
            8 => RevocationReason::RemoveFromCrl,
            9 => RevocationReason::PrivilegeWithdrawn,
            10 => RevocationReason::AaCompromise,
            _ => return None,
        };
        Some(reason)
    }

    pub fn code(self) -> i64 {
        self as i64
    }
}

/// Certification request content handed to `issue` and `rekey`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceRequest {
    /// Base64 of the DER-encoded `CertRequest`.
    pub encoded: String,
    pub subject: Name,
    /// `SubjectPublicKeyInfo` DER.
    pub public_key: Option<Vec<u8>>,
    pub validity: Option<OptionalValidity>,
    pub extensions: Option<Vec<Extension>>,
}

/// Operations the engine consumes from the certificate authority.
///
/// Implementations must be shareable across the per-connection threads of
/// the transport. Read operations return `Ok(None)` for "not found" and
/// reserve `Err` for faults.
pub trait IssuanceBackend: Send + Sync {
    /// Submit an issuance; completion is observed through [`get_entity`](Self::get_entity).
    fn issue(
        &self,
        authority: &AuthorityRef,
        profile: &ProfileRef,
        request: &IssuanceRequest,
    ) -> Result<TrackingRef>;

    /// Submit a key update replacing `certificate`.
    fn rekey(
        &self,
        authority: &AuthorityRef,
        profile: &ProfileRef,
        certificate: &CertificateId,
        request: &IssuanceRequest,
    ) -> Result<TrackingRef>;

    /// Revoke `certificate`; completes before returning.
    fn revoke(
        &self,
        authority: &AuthorityRef,
        profile: &ProfileRef,
        certificate: &CertificateId,
        reason: RevocationReason,
    ) -> Result<()>;

    /// Latest state of a transaction, read without any caching.
    fn get_entity(&self, tracking: &TrackingRef) -> Result<Option<TransactionEntity>>;

    fn lookup_by_serial(&self, serial: &SerialNumber) -> Result<Option<CertificateRecord>>;

    fn get_certificate(&self, id: &CertificateId) -> Result<Option<CertificateRecord>>;

    /// CA certificates above `id`, issuing CA first.
    fn get_ca_chain(&self, id: &CertificateId) -> Result<Vec<CertificateRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_requested_is_pending() {
        assert!(!TransactionState::Requested.is_terminal());
        for state in [
            TransactionState::Issued,
            TransactionState::Rekeyed,
            TransactionState::Revoked,
            TransactionState::Failed,
        ] {
            assert!(state.is_terminal());
        }
    }

    #[test]
    fn test_revocation_reason_codes() {
        assert_eq!(
            RevocationReason::from_code(1),
            Some(RevocationReason::KeyCompromise)
        );
        assert_eq!(RevocationReason::from_code(7), None);
        assert_eq!(RevocationReason::from_code(11), None);
        assert_eq!(RevocationReason::AaCompromise.code(), 10);
    }

    #[test]
    fn test_certificate_id_is_sha256_hex() {
        let id = CertificateId::from_der(b"abc");
        assert_eq!(
            id.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
