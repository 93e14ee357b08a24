//! Revocation request and response types (RFC 4210 Sections 5.3.9, 5.3.10)

use serde::{Deserialize, Serialize};

use super::crmf::CertTemplate;
use super::status::PkiStatusInfo;
use super::{Extension, GeneralName, SerialNumber};

/// `RevReqContent ::= SEQUENCE OF RevDetails`
pub type RevReqContent = Vec<RevDetails>;

/// ```text
/// RevDetails ::= SEQUENCE {
///     certDetails         CertTemplate,
///     crlEntryDetails     Extensions OPTIONAL }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevDetails {
    pub cert_details: CertTemplate,
    pub crl_entry_details: Option<Vec<Extension>>,
}

impl RevDetails {
    pub fn crl_entry_extension(&self, oid: &str) -> Option<&Extension> {
        self.crl_entry_details
            .as_ref()?
            .iter()
            .find(|e| e.extn_id == oid)
    }
}

/// ```text
/// RevRepContent ::= SEQUENCE {
///     status       SEQUENCE SIZE (1..MAX) OF PKIStatusInfo,
///     revCerts [0] SEQUENCE SIZE (1..MAX) OF CertId OPTIONAL,
///     crls     [1] SEQUENCE SIZE (1..MAX) OF CertificateList OPTIONAL }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevRepContent {
    pub status: Vec<PkiStatusInfo>,
    pub rev_certs: Option<Vec<CertId>>,
    pub crls: Option<Vec<Vec<u8>>>,
}

/// `CertId ::= SEQUENCE { issuer GeneralName, serialNumber INTEGER }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertId {
    pub issuer: GeneralName,
    pub serial_number: SerialNumber,
}
