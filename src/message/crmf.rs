//! Certificate Request Message Format types (RFC 4211)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AlgorithmIdentifier, AttributeTypeAndValue, Extension, GeneralName, Name, SerialNumber};

/// `CertReqMessages ::= SEQUENCE SIZE (1..MAX) OF CertReqMsg`
pub type CertReqMessages = Vec<CertReqMsg>;

/// ```text
/// CertReqMsg ::= SEQUENCE {
///     certReq   CertRequest,
///     popo      ProofOfPossession  OPTIONAL,
///     regInfo   SEQUENCE SIZE(1..MAX) OF AttributeTypeAndValue OPTIONAL }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertReqMsg {
    pub cert_req: CertRequest,
    pub popo: Option<ProofOfPossession>,
    pub reg_info: Option<Vec<AttributeTypeAndValue>>,
}

/// ```text
/// CertRequest ::= SEQUENCE {
///     certReqId     INTEGER,
///     certTemplate  CertTemplate,
///     controls      Controls OPTIONAL }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertRequest {
    pub cert_req_id: i64,
    pub cert_template: CertTemplate,
    pub controls: Option<Vec<AttributeTypeAndValue>>,
}

impl CertRequest {
    /// First control with the given OID.
    pub fn control(&self, oid: &str) -> Option<&AttributeTypeAndValue> {
        self.controls.as_ref()?.iter().find(|c| c.oid == oid)
    }
}

/// Selected fields of the certificate to be issued.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertTemplate {
    pub version: Option<i64>,
    pub serial_number: Option<SerialNumber>,
    pub signing_alg: Option<AlgorithmIdentifier>,
    pub issuer: Option<Name>,
    pub validity: Option<OptionalValidity>,
    pub subject: Option<Name>,
    /// `SubjectPublicKeyInfo` DER.
    pub public_key: Option<Vec<u8>>,
    pub issuer_uid: Option<UniqueIdentifier>,
    pub subject_uid: Option<UniqueIdentifier>,
    pub extensions: Option<Vec<Extension>>,
}

impl CertTemplate {
    pub fn extension(&self, oid: &str) -> Option<&Extension> {
        self.extensions.as_ref()?.iter().find(|e| e.extn_id == oid)
    }
}

/// `UniqueIdentifier ::= BIT STRING`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueIdentifier {
    pub bytes: Vec<u8>,
    /// Padding bits in the last byte, 0 to 7.
    #[serde(default)]
    pub unused_bits: u8,
}

/// Which `Time` alternative a validity bound is encoded as.
///
/// The template DER is re-encoded for POP verification, so a bound must be
/// written back in the alternative the requester signed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeEncoding {
    /// UTCTime through 2049, GeneralizedTime from 2050 (RFC 5280 Section 4.1.2.5).
    #[default]
    Rfc5280,
    UtcTime,
    GeneralizedTime,
}

/// `OptionalValidity`; at least one bound should be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionalValidity {
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub not_before_encoding: TimeEncoding,
    #[serde(default)]
    pub not_after_encoding: TimeEncoding,
}

impl OptionalValidity {
    pub fn new(not_before: Option<DateTime<Utc>>, not_after: Option<DateTime<Utc>>) -> Self {
        Self {
            not_before,
            not_after,
            ..Default::default()
        }
    }
}

/// ```text
/// ProofOfPossession ::= CHOICE {
///     raVerified        [0] NULL,
///     signature         [1] POPOSigningKey,
///     keyEncipherment   [2] POPOPrivKey,
///     keyAgreement      [3] POPOPrivKey }
/// ```
///
/// `Unrecognized` holds a choice tag the decoder could not map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofOfPossession {
    RaVerified,
    Signature(PopoSigningKey),
    KeyEncipherment(PopoPrivKey),
    KeyAgreement(PopoPrivKey),
    Unrecognized { tag: u32 },
}

/// ```text
/// POPOSigningKey ::= SEQUENCE {
///     poposkInput           [0] POPOSigningKeyInput OPTIONAL,
///     algorithmIdentifier   AlgorithmIdentifier,
///     signature             BIT STRING }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopoSigningKey {
    pub poposk_input: Option<PopoSigningKeyInput>,
    pub algorithm_identifier: AlgorithmIdentifier,
    pub signature: Vec<u8>,
}

/// Separate signed input, used when the template carries no subject or key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopoSigningKeyInput {
    pub sender: Option<GeneralName>,
    pub public_mac: Option<Vec<u8>>,
    pub public_key: Vec<u8>,
}

/// `POPOPrivKey` alternatives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PopoPrivKey {
    ThisMessage(Vec<u8>),
    SubsequentMessage(SubsequentMessage),
    DhMac(Vec<u8>),
    AgreeMac(Vec<u8>),
    EncryptedKey(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubsequentMessage {
    EncrCert = 0,
    ChallengeResp = 1,
}
