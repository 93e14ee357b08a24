//! Status-related types (RFC 4210 Sections 5.2.3, 5.2.18, 5.2.21)

use serde::{Deserialize, Serialize};

use crate::error::{FailureInfo, PkiFailureInfo};

/// ```text
/// PKIStatus ::= INTEGER {
///     accepted (0), grantedWithMods (1), rejection (2), waiting (3),
///     revocationWarning (4), revocationNotification (5), keyUpdateWarning (6) }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PkiStatus {
    Accepted = 0,
    GrantedWithMods = 1,
    Rejection = 2,
    Waiting = 3,
    RevocationWarning = 4,
    RevocationNotification = 5,
    KeyUpdateWarning = 6,
}

impl PkiStatus {
    /// Negative statuses must carry exactly one failure code; positive ones none.
    pub fn is_negative(self) -> bool {
        matches!(self, PkiStatus::Rejection | PkiStatus::RevocationWarning)
    }

    pub fn is_positive(self) -> bool {
        !self.is_negative()
    }
}

/// ```text
/// PKIStatusInfo ::= SEQUENCE {
///     status        PKIStatus,
///     statusString  PKIFreeText     OPTIONAL,
///     failInfo      PKIFailureInfo  OPTIONAL }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkiStatusInfo {
    pub status: PkiStatus,
    pub status_string: Option<Vec<String>>,
    pub fail_info: Option<PkiFailureInfo>,
}

impl PkiStatusInfo {
    pub fn accepted() -> Self {
        Self::positive(PkiStatus::Accepted)
    }

    pub fn positive(status: PkiStatus) -> Self {
        Self {
            status,
            status_string: None,
            fail_info: None,
        }
    }

    pub fn rejection(failure: FailureInfo, text: impl Into<String>) -> Self {
        Self::negative(PkiStatus::Rejection, failure, text)
    }

    pub fn negative(status: PkiStatus, failure: FailureInfo, text: impl Into<String>) -> Self {
        Self {
            status,
            status_string: Some(vec![text.into()]),
            fail_info: Some(PkiFailureInfo::from(failure)),
        }
    }
}

/// ```text
/// ErrorMsgContent ::= SEQUENCE {
///     pKIStatusInfo   PKIStatusInfo,
///     errorCode       INTEGER      OPTIONAL,
///     errorDetails    PKIFreeText  OPTIONAL }
/// ```
///
/// `pki_status_info` is mandatory on the wire; the decoder leaves it empty
/// when it is missing so validation can reject the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMsgContent {
    pub pki_status_info: Option<PkiStatusInfo>,
    pub error_code: Option<i64>,
    pub error_details: Option<Vec<String>>,
}

/// `CertConfirmContent ::= SEQUENCE OF CertStatus`
pub type CertConfirmContent = Vec<CertStatus>;

/// ```text
/// CertStatus ::= SEQUENCE {
///     certHash    OCTET STRING,
///     certReqId   INTEGER,
///     statusInfo  PKIStatusInfo OPTIONAL }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertStatus {
    pub cert_hash: Option<Vec<u8>>,
    pub cert_req_id: i64,
    pub status_info: Option<PkiStatusInfo>,
}
