//! Certification response types (RFC 4210 Section 5.3.4)

use serde::{Deserialize, Serialize};

use super::status::PkiStatusInfo;
use super::CmpCertificate;

/// ```text
/// CertRepMessage ::= SEQUENCE {
///     caPubs    [1] SEQUENCE SIZE (1..MAX) OF CMPCertificate OPTIONAL,
///     response      SEQUENCE OF CertResponse }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertRepMessage {
    pub ca_pubs: Option<Vec<CmpCertificate>>,
    pub response: Vec<CertResponse>,
}

/// One outcome per request id: either a certified key pair with a positive
/// status, or no key pair with a negative status and one failure code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertResponse {
    pub cert_req_id: i64,
    pub status: PkiStatusInfo,
    pub certified_key_pair: Option<CertifiedKeyPair>,
    pub rsp_info: Option<Vec<u8>>,
}

/// ```text
/// CertifiedKeyPair ::= SEQUENCE {
///     certOrEncCert       CertOrEncCert,
///     privateKey      [0] EncryptedValue      OPTIONAL,
///     publicationInfo [1] PKIPublicationInfo  OPTIONAL }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertifiedKeyPair {
    pub cert_or_enc_cert: CertOrEncCert,
    pub private_key: Option<Vec<u8>>,
    pub publication_info: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertOrEncCert {
    Certificate(CmpCertificate),
    /// `EncryptedValue`, as DER.
    EncryptedCert(Vec<u8>),
}

impl CertifiedKeyPair {
    pub fn certificate(&self) -> Option<&CmpCertificate> {
        match &self.cert_or_enc_cert {
            CertOrEncCert::Certificate(cert) => Some(cert),
            CertOrEncCert::EncryptedCert(_) => None,
        }
    }
}
