//! `PKIBody` (RFC 4210 Section 5.1.2)
//!
//! ```text
//! PKIBody ::= CHOICE {
//!     ir [0] CertReqMessages,      ip [1] CertRepMessage,
//!     cr [2] CertReqMessages,      cp [3] CertRepMessage,
//!     p10cr [4] CertificationRequest,
//!     popdecc [5] POPODecKeyChallContent, popdecr [6] POPODecKeyRespContent,
//!     kur [7] CertReqMessages,     kup [8] CertRepMessage,
//!     krr [9] CertReqMessages,     krp [10] KeyRecRepContent,
//!     rr [11] RevReqContent,       rp [12] RevRepContent,
//!     ccr [13] CertReqMessages,    ccp [14] CertRepMessage,
//!     ckuann [15], cann [16], rann [17], crlann [18],
//!     pkiconf [19] PKIConfirmContent, nested [20] NestedMessageContent,
//!     genm [21] GenMsgContent,     genp [22] GenRepContent,
//!     error [23] ErrorMsgContent,  certConf [24] CertConfirmContent,
//!     pollReq [25] PollReqContent, pollRep [26] PollRepContent }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use super::crmf::CertReqMessages;
use super::response::CertRepMessage;
use super::rev::{RevRepContent, RevReqContent};
use super::status::{CertConfirmContent, ErrorMsgContent};
use super::PkiMessage;

/// The body-type tags of the `PKIBody` choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BodyType {
    Ir = 0,
    Ip = 1,
    Cr = 2,
    Cp = 3,
    P10cr = 4,
    Popdecc = 5,
    Popdecr = 6,
    Kur = 7,
    Kup = 8,
    Krr = 9,
    Krp = 10,
    Rr = 11,
    Rp = 12,
    Ccr = 13,
    Ccp = 14,
    Ckuann = 15,
    Cann = 16,
    Rann = 17,
    CrlAnn = 18,
    PkiConf = 19,
    Nested = 20,
    GenM = 21,
    GenP = 22,
    Error = 23,
    CertConf = 24,
    PollReq = 25,
    PollRep = 26,
}

impl BodyType {
    pub fn tag(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            BodyType::Ir => "ir",
            BodyType::Ip => "ip",
            BodyType::Cr => "cr",
            BodyType::Cp => "cp",
            BodyType::P10cr => "p10cr",
            BodyType::Popdecc => "popdecc",
            BodyType::Popdecr => "popdecr",
            BodyType::Kur => "kur",
            BodyType::Kup => "kup",
            BodyType::Krr => "krr",
            BodyType::Krp => "krp",
            BodyType::Rr => "rr",
            BodyType::Rp => "rp",
            BodyType::Ccr => "ccr",
            BodyType::Ccp => "ccp",
            BodyType::Ckuann => "ckuann",
            BodyType::Cann => "cann",
            BodyType::Rann => "rann",
            BodyType::CrlAnn => "crlann",
            BodyType::PkiConf => "pkiconf",
            BodyType::Nested => "nested",
            BodyType::GenM => "genm",
            BodyType::GenP => "genp",
            BodyType::Error => "error",
            BodyType::CertConf => "certConf",
            BodyType::PollReq => "pollReq",
            BodyType::PollRep => "pollRep",
        }
    }

    /// Certification-family requests that carry `CertReqMessages`.
    pub fn is_certification_request(self) -> bool {
        matches!(
            self,
            BodyType::Ir | BodyType::Cr | BodyType::Kur | BodyType::Krr | BodyType::Ccr
        )
    }
}

impl fmt::Display for BodyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `InfoTypeAndValue` of general messages and `generalInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoTypeAndValue {
    pub info_type: String,
    pub info_value: Option<Vec<u8>>,
}

/// Message payload keyed by body type.
///
/// Types this engine processes are fully structured; the rest keep their DER
/// content. `Unknown` holds a tag the decoder found outside the choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PkiBody {
    Ir(CertReqMessages),
    Ip(CertRepMessage),
    Cr(CertReqMessages),
    Cp(CertRepMessage),
    P10cr(Vec<u8>),
    Popdecc(Vec<u8>),
    Popdecr(Vec<u8>),
    Kur(CertReqMessages),
    Kup(CertRepMessage),
    Krr(CertReqMessages),
    Krp(Vec<u8>),
    Rr(RevReqContent),
    Rp(RevRepContent),
    Ccr(CertReqMessages),
    Ccp(CertRepMessage),
    Ckuann(Vec<u8>),
    Cann(Vec<u8>),
    Rann(Vec<u8>),
    CrlAnn(Vec<u8>),
    PkiConf,
    Nested(Vec<PkiMessage>),
    GenM(Vec<InfoTypeAndValue>),
    GenP(Vec<InfoTypeAndValue>),
    Error(ErrorMsgContent),
    CertConf(CertConfirmContent),
    PollReq(Vec<u8>),
    PollRep(Vec<u8>),
    Unknown { tag: u32, content: Vec<u8> },
}

impl PkiBody {
    /// Body-type tag, or `None` for a tag outside the enumeration.
    pub fn body_type(&self) -> Option<BodyType> {
        let body_type = match self {
            PkiBody::Ir(_) => BodyType::Ir,
            PkiBody::Ip(_) => BodyType::Ip,
            PkiBody::Cr(_) => BodyType::Cr,
            PkiBody::Cp(_) => BodyType::Cp,
            PkiBody::P10cr(_) => BodyType::P10cr,
            PkiBody::Popdecc(_) => BodyType::Popdecc,
            PkiBody::Popdecr(_) => BodyType::Popdecr,
            PkiBody::Kur(_) => BodyType::Kur,
            PkiBody::Kup(_) => BodyType::Kup,
            PkiBody::Krr(_) => BodyType::Krr,
            PkiBody::Krp(_) => BodyType::Krp,
            PkiBody::Rr(_) => BodyType::Rr,
            PkiBody::Rp(_) => BodyType::Rp,
            PkiBody::Ccr(_) => BodyType::Ccr,
            PkiBody::Ccp(_) => BodyType::Ccp,
            PkiBody::Ckuann(_) => BodyType::Ckuann,
            PkiBody::Cann(_) => BodyType::Cann,
            PkiBody::Rann(_) => BodyType::Rann,
            PkiBody::CrlAnn(_) => BodyType::CrlAnn,
            PkiBody::PkiConf => BodyType::PkiConf,
            PkiBody::Nested(_) => BodyType::Nested,
            PkiBody::GenM(_) => BodyType::GenM,
            PkiBody::GenP(_) => BodyType::GenP,
            PkiBody::Error(_) => BodyType::Error,
            PkiBody::CertConf(_) => BodyType::CertConf,
            PkiBody::PollReq(_) => BodyType::PollReq,
            PkiBody::PollRep(_) => BodyType::PollRep,
            PkiBody::Unknown { .. } => return None,
        };
        Some(body_type)
    }

    /// Name for logs; unknown tags render as `tag N`.
    pub fn label(&self) -> String {
        match self {
            PkiBody::Unknown { tag, .. } => format!("tag {}", tag),
            known => known
                .body_type()
                .map(|t| t.name().to_string())
                .unwrap_or_default(),
        }
    }

    /// Request entries of a certification-family body.
    pub fn cert_requests(&self) -> Option<&CertReqMessages> {
        match self {
            PkiBody::Ir(reqs)
            | PkiBody::Cr(reqs)
            | PkiBody::Kur(reqs)
            | PkiBody::Krr(reqs)
            | PkiBody::Ccr(reqs) => Some(reqs),
            _ => None,
        }
    }

    /// Response content of a certification-family response body.
    pub fn cert_response(&self) -> Option<&CertRepMessage> {
        match self {
            PkiBody::Ip(rep) | PkiBody::Cp(rep) | PkiBody::Kup(rep) | PkiBody::Ccp(rep) => {
                Some(rep)
            }
            _ => None,
        }
    }
}
