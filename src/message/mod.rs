//! Parsed PKIMessage structures (RFC 4210 / RFC 4211)
//!
//! These types are the output of the wire decoder and the input of the
//! message encoder. Fields holding values this engine never interprets
//! (names, public keys, certificates, extension values) stay DER-encoded and
//! are handed to openssl when they need to be looked at.
//!
//! ```text
//! PKIMessage ::= SEQUENCE {
//!     header           PKIHeader,
//!     body             PKIBody,
//!     protection   [0] PKIProtection OPTIONAL,
//!     extraCerts   [1] SEQUENCE SIZE (1..MAX) OF CMPCertificate OPTIONAL }
//! ```

pub mod body;
pub mod crmf;
pub mod encoding;
pub mod header;
pub mod response;
pub mod rev;
pub mod status;

pub use body::{BodyType, InfoTypeAndValue, PkiBody};
pub use crmf::{
    CertReqMessages, CertReqMsg, CertRequest, CertTemplate, OptionalValidity, PopoPrivKey,
    PopoSigningKey, PopoSigningKeyInput, ProofOfPossession, TimeEncoding, UniqueIdentifier,
};
pub use header::{PkiHeader, Pvno};
pub use response::{CertOrEncCert, CertRepMessage, CertResponse, CertifiedKeyPair};
pub use rev::{CertId, RevDetails, RevRepContent, RevReqContent};
pub use status::{CertConfirmContent, CertStatus, ErrorMsgContent, PkiStatus, PkiStatusInfo};

use anyhow::{anyhow, Context, Result};
use openssl::x509::{X509Name, X509NameRef, X509Ref, X509};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Object identifiers the engine looks for.
pub mod oid {
    /// `id-ce-cRLReasons`, carried in `RevDetails.crlEntryDetails`.
    pub const CRL_REASON: &str = "2.5.29.21";
    /// `id-regCtrl-oldCertID`, names the certificate a key update replaces.
    pub const REG_CTRL_OLD_CERT_ID: &str = "1.3.6.1.5.5.7.5.1.5";
    /// `id-PasswordBasedMac` protection.
    pub const PASSWORD_BASED_MAC: &str = "1.2.840.113533.7.66.13";
    /// `id-DHBasedMac` protection.
    pub const DH_BASED_MAC: &str = "1.2.840.113533.7.66.30";
    pub const SHA256_WITH_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.11";
    pub const ECDSA_WITH_SHA256: &str = "1.2.840.10045.4.3.2";
    pub const ED25519: &str = "1.3.101.112";
}

/// Fixed `certReqId` of the single-request profile.
pub const CERT_REQ_ID: i64 = 0;

/// X.509 v3, the only template version accepted.
pub const X509_VERSION_3: i64 = 2;

/// A complete protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkiMessage {
    pub header: PkiHeader,
    pub body: PkiBody,
    /// `PKIProtection` bit string contents.
    pub protection: Option<Vec<u8>>,
    pub extra_certs: Option<Vec<CmpCertificate>>,
}

impl PkiMessage {
    pub fn transaction_id(&self) -> Option<&[u8]> {
        self.header.transaction_id.as_deref()
    }

    /// Transaction id rendered for logs.
    pub fn transaction_label(&self) -> String {
        match self.transaction_id() {
            Some(id) => hex(id),
            None => "-".to_string(),
        }
    }
}

/// An X.501 `Name`, kept as its DER encoding.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Name(Vec<u8>);

impl Name {
    pub fn from_der(der: Vec<u8>) -> Self {
        Name(der)
    }

    /// The empty RDN sequence.
    pub fn empty() -> Self {
        Name(vec![0x30, 0x00])
    }

    pub fn as_der(&self) -> &[u8] {
        &self.0
    }

    /// Equality under openssl's canonical name comparison, so differing
    /// string types or case in attribute values still match.
    pub fn matches(&self, other: &Name) -> bool {
        if self.0 == other.0 {
            return true;
        }
        match (self.to_x509_name(), other.to_x509_name()) {
            (Ok(left), Ok(right)) => matches!(
                left.try_cmp(&right),
                Ok(std::cmp::Ordering::Equal)
            ),
            _ => false,
        }
    }

    pub fn from_x509_name(name: &X509NameRef) -> Result<Self> {
        Ok(Name(
            name.to_der().context("Failed to DER-encode X.509 name")?,
        ))
    }

    /// Build a name from `KEY=value` pairs separated by commas, e.g. `CN=test,O=Example`.
    pub fn parse_dn(dn: &str) -> Result<Self> {
        let mut builder = X509Name::builder().context("Failed to create name builder")?;
        for part in dn.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| anyhow!("Malformed name component '{}'", part))?;
            builder
                .append_entry_by_text(key.trim(), value.trim())
                .map_err(|e| anyhow!("Failed to add {} to name: {}", key, e))?;
        }
        Self::from_x509_name(&builder.build())
    }

    pub fn to_x509_name(&self) -> Result<X509Name> {
        X509Name::from_der(&self.0).context("Failed to parse DER-encoded name")
    }

    /// One-line rendering such as `CN=test, O=Example`.
    pub fn to_dn_string(&self) -> String {
        let name = match self.to_x509_name() {
            Ok(name) => name,
            Err(_) => return format!("<unparseable name {}>", hex(&self.0)),
        };
        name.entries()
            .map(|entry| {
                let key = entry.object().nid().short_name().unwrap_or("?");
                let value = entry
                    .data()
                    .as_utf8()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|_| "<invalid>".to_string());
                format!("{}={}", key, value)
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", self.to_dn_string())
    }
}

/// `GeneralName`, reduced to the forms CMP headers carry in practice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeneralName {
    DirectoryName(Name),
    Rfc822Name(String),
    DnsName(String),
    Uri(String),
    /// Any other alternative, as DER.
    Other(Vec<u8>),
}

/// `AlgorithmIdentifier` with the OID in dotted form and raw parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmIdentifier {
    pub algorithm: String,
    pub parameters: Option<Vec<u8>>,
}

impl AlgorithmIdentifier {
    pub fn new(algorithm: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            parameters: None,
        }
    }
}

/// X.509 `Extension`; `extn_value` is the content of the OCTET STRING.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub extn_id: String,
    pub critical: bool,
    pub extn_value: Vec<u8>,
}

/// CRMF control or registration attribute; `value` is the DER of the attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeTypeAndValue {
    pub oid: String,
    pub value: Vec<u8>,
}

/// Certificate serial number as a big-endian unsigned magnitude without leading zeros.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SerialNumber(Vec<u8>);

impl SerialNumber {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        SerialNumber(bytes[start..].to_vec())
    }

    pub fn from_x509(cert: &X509Ref) -> Result<Self> {
        let bn = cert
            .serial_number()
            .to_bn()
            .context("Failed to read certificate serial number")?;
        Ok(Self::from_bytes(&bn.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("00");
        }
        f.write_str(&hex(&self.0))
    }
}

impl fmt::Debug for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SerialNumber({})", self)
    }
}

/// `CMPCertificate`, kept as DER.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmpCertificate(Vec<u8>);

impl CmpCertificate {
    pub fn from_der(der: Vec<u8>) -> Self {
        CmpCertificate(der)
    }

    pub fn from_x509(cert: &X509Ref) -> Result<Self> {
        Ok(CmpCertificate(
            cert.to_der().context("Failed to DER-encode certificate")?,
        ))
    }

    pub fn to_x509(&self) -> Result<X509> {
        X509::from_der(&self.0).context("Failed to parse DER-encoded certificate")
    }

    pub fn as_der(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for CmpCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CmpCertificate({} bytes)", self.0.len())
    }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
