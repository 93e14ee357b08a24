//! Failure classification for CMP message processing
//!
//! Every rejected message is answered with exactly one code from [`FailureInfo`],
//! the fixed `PKIFailureInfo` vocabulary of RFC 4210 Section 5.2.3. Internal
//! faults are collapsed onto `systemFailure` so that nothing about the backend
//! leaks to the client; the original cause is kept on the error value for
//! server-side logging only.
//!
//! # Error Hierarchy
//!
//! - [`CmpError::Rejected`]: protocol failure with a specific code, safe to return
//! - [`CmpError::NotImplemented`]: recognised body type this engine does not process
//! - [`CmpError::Unsupported`]: body type without a handler, or a tag outside the enumeration
//! - [`CmpError::System`]: backend fault, timeout, cancellation or panic

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::message::BodyType;

/// Result alias used by validators, the POP verifier and handlers.
pub type Result<T> = std::result::Result<T, CmpError>;

/// Text sent to clients in place of the detail of a system failure.
pub const SYSTEM_FAILURE_TEXT: &str = "The request could not be handled due to a system failure";

/// The `PKIFailureInfo` bit positions of RFC 4210 Section 5.2.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureInfo {
    BadAlg = 0,
    BadMessageCheck = 1,
    BadRequest = 2,
    BadTime = 3,
    BadCertId = 4,
    BadDataFormat = 5,
    WrongAuthority = 6,
    IncorrectData = 7,
    MissingTimeStamp = 8,
    #[serde(rename = "badPOP")]
    BadPop = 9,
    CertRevoked = 10,
    CertConfirmed = 11,
    WrongIntegrity = 12,
    BadRecipientNonce = 13,
    TimeNotAvailable = 14,
    UnacceptedPolicy = 15,
    UnacceptedExtension = 16,
    AddInfoNotAvailable = 17,
    BadSenderNonce = 18,
    BadCertTemplate = 19,
    SignerNotTrusted = 20,
    TransactionIdInUse = 21,
    UnsupportedVersion = 22,
    NotAuthorized = 23,
    SystemUnavail = 24,
    SystemFailure = 25,
    DuplicateCertReq = 26,
}

impl FailureInfo {
    const ALL: [FailureInfo; 27] = [
        FailureInfo::BadAlg,
        FailureInfo::BadMessageCheck,
        FailureInfo::BadRequest,
        FailureInfo::BadTime,
        FailureInfo::BadCertId,
        FailureInfo::BadDataFormat,
        FailureInfo::WrongAuthority,
        FailureInfo::IncorrectData,
        FailureInfo::MissingTimeStamp,
        FailureInfo::BadPop,
        FailureInfo::CertRevoked,
        FailureInfo::CertConfirmed,
        FailureInfo::WrongIntegrity,
        FailureInfo::BadRecipientNonce,
        FailureInfo::TimeNotAvailable,
        FailureInfo::UnacceptedPolicy,
        FailureInfo::UnacceptedExtension,
        FailureInfo::AddInfoNotAvailable,
        FailureInfo::BadSenderNonce,
        FailureInfo::BadCertTemplate,
        FailureInfo::SignerNotTrusted,
        FailureInfo::TransactionIdInUse,
        FailureInfo::UnsupportedVersion,
        FailureInfo::NotAuthorized,
        FailureInfo::SystemUnavail,
        FailureInfo::SystemFailure,
        FailureInfo::DuplicateCertReq,
    ];

    /// Wire-level bit position of this code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Look a code up by its bit position.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// RFC 4210 name of the code, e.g. `badPOP`.
    pub fn name(self) -> &'static str {
        match self {
            FailureInfo::BadAlg => "badAlg",
            FailureInfo::BadMessageCheck => "badMessageCheck",
            FailureInfo::BadRequest => "badRequest",
            FailureInfo::BadTime => "badTime",
            FailureInfo::BadCertId => "badCertId",
            FailureInfo::BadDataFormat => "badDataFormat",
            FailureInfo::WrongAuthority => "wrongAuthority",
            FailureInfo::IncorrectData => "incorrectData",
            FailureInfo::MissingTimeStamp => "missingTimeStamp",
            FailureInfo::BadPop => "badPOP",
            FailureInfo::CertRevoked => "certRevoked",
            FailureInfo::CertConfirmed => "certConfirmed",
            FailureInfo::WrongIntegrity => "wrongIntegrity",
            FailureInfo::BadRecipientNonce => "badRecipientNonce",
            FailureInfo::TimeNotAvailable => "timeNotAvailable",
            FailureInfo::UnacceptedPolicy => "unacceptedPolicy",
            FailureInfo::UnacceptedExtension => "unacceptedExtension",
            FailureInfo::AddInfoNotAvailable => "addInfoNotAvailable",
            FailureInfo::BadSenderNonce => "badSenderNonce",
            FailureInfo::BadCertTemplate => "badCertTemplate",
            FailureInfo::SignerNotTrusted => "signerNotTrusted",
            FailureInfo::TransactionIdInUse => "transactionIdInUse",
            FailureInfo::UnsupportedVersion => "unsupportedVersion",
            FailureInfo::NotAuthorized => "notAuthorized",
            FailureInfo::SystemUnavail => "systemUnavail",
            FailureInfo::SystemFailure => "systemFailure",
            FailureInfo::DuplicateCertReq => "duplicateCertReq",
        }
    }
}

impl fmt::Display for FailureInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `PKIFailureInfo ::= BIT STRING`, held as a set of [`FailureInfo`] bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PkiFailureInfo(u32);

impl PkiFailureInfo {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn with(mut self, info: FailureInfo) -> Self {
        self.0 |= 1 << info.code();
        self
    }

    pub fn contains(&self, info: FailureInfo) -> bool {
        self.0 & (1 << info.code()) != 0
    }

    /// Number of failure codes set.
    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// The single code carried, if exactly one bit is set.
    pub fn single(&self) -> Option<FailureInfo> {
        if self.len() != 1 {
            return None;
        }
        FailureInfo::from_code(self.0.trailing_zeros() as u8)
    }

    pub fn iter(&self) -> impl Iterator<Item = FailureInfo> + '_ {
        FailureInfo::ALL
            .iter()
            .copied()
            .filter(move |info| self.contains(*info))
    }
}

impl From<FailureInfo> for PkiFailureInfo {
    fn from(info: FailureInfo) -> Self {
        PkiFailureInfo::empty().with(info)
    }
}

/// Classified outcome of a failed validation or handler step.
#[derive(Debug, Error)]
pub enum CmpError {
    /// Structurally or semantically invalid input, or a supported-but-rejected feature.
    #[error("{failure}: {message}")]
    Rejected {
        failure: FailureInfo,
        message: String,
    },

    /// Body type is part of RFC 4210 but deliberately not processed here.
    #[error("{body} messages are not implemented")]
    NotImplemented { body: BodyType },

    /// Body type has no handler in this engine or lies outside the enumeration.
    #[error("unsupported message body: {body}")]
    Unsupported { body: String },

    /// Internal fault. `message` and `source` are for server-side logs only.
    #[error("system failure: {message}")]
    System {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },
}

impl CmpError {
    pub fn rejected(failure: FailureInfo, message: impl Into<String>) -> Self {
        CmpError::Rejected {
            failure,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::rejected(FailureInfo::BadRequest, message)
    }

    pub fn bad_data_format(message: impl Into<String>) -> Self {
        Self::rejected(FailureInfo::BadDataFormat, message)
    }

    pub fn bad_cert_template(message: impl Into<String>) -> Self {
        Self::rejected(FailureInfo::BadCertTemplate, message)
    }

    pub fn bad_pop(message: impl Into<String>) -> Self {
        Self::rejected(FailureInfo::BadPop, message)
    }

    pub fn system(message: impl Into<String>) -> Self {
        CmpError::System {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a backend error, keeping the cause chain for logging.
    pub fn backend(message: impl Into<String>, source: anyhow::Error) -> Self {
        CmpError::System {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The single wire code this error is reported with.
    pub fn failure_info(&self) -> FailureInfo {
        match self {
            CmpError::Rejected { failure, .. } => *failure,
            CmpError::NotImplemented { .. } | CmpError::Unsupported { .. } => {
                FailureInfo::BadRequest
            }
            CmpError::System { .. } => FailureInfo::SystemFailure,
        }
    }

    /// Text that may be returned to the client.
    pub fn client_message(&self) -> String {
        match self {
            CmpError::System { .. } => SYSTEM_FAILURE_TEXT.to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, CmpError::System { .. })
    }
}

impl From<anyhow::Error> for CmpError {
    fn from(err: anyhow::Error) -> Self {
        CmpError::backend("backend operation failed", err)
    }
}

/// Run `step`, turning a panic into a `systemFailure` that names the stage.
pub(crate) fn guarded<T>(stage: &str, step: impl FnOnce() -> Result<T>) -> Result<T> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(step)) {
        Ok(result) => result,
        Err(payload) => Err(CmpError::system(format!(
            "{} panicked: {}",
            stage,
            panic_message(payload.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
