//! `PKIHeader` (RFC 4210 Section 5.1.1)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::body::InfoTypeAndValue;
use super::{AlgorithmIdentifier, GeneralName};

/// `pvno INTEGER { cmp1999(1), cmp2000(2) }`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pvno {
    Cmp1999 = 1,
    Cmp2000 = 2,
}

/// Routing and correlation data of a message.
///
/// `transaction_id` correlates every message of one exchange and is echoed
/// unchanged in each response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkiHeader {
    pub pvno: Pvno,
    pub sender: GeneralName,
    pub recipient: GeneralName,
    pub message_time: Option<DateTime<Utc>>,
    pub protection_alg: Option<AlgorithmIdentifier>,
    pub sender_kid: Option<Vec<u8>>,
    pub recip_kid: Option<Vec<u8>>,
    pub transaction_id: Option<Vec<u8>>,
    pub sender_nonce: Option<Vec<u8>>,
    pub recip_nonce: Option<Vec<u8>>,
    pub free_text: Option<Vec<String>>,
    pub general_info: Option<Vec<InfoTypeAndValue>>,
}

impl PkiHeader {
    /// Header with only the mandatory fields set.
    pub fn new(sender: GeneralName, recipient: GeneralName) -> Self {
        Self {
            pvno: Pvno::Cmp2000,
            sender,
            recipient,
            message_time: None,
            protection_alg: None,
            sender_kid: None,
            recip_kid: None,
            transaction_id: None,
            sender_nonce: None,
            recip_nonce: None,
            free_text: None,
            general_info: None,
        }
    }
}
