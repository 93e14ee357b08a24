//! Outgoing message construction
//!
//! [`MessageBuilder`] is the only place responses are put together. The
//! response header is derived from the request header:
//!
//! | Response field | Source |
//! |----------------|--------|
//! | `pvno` | request `pvno` |
//! | `sender` / `recipient` | request `recipient` / `sender` |
//! | `transactionID` | request `transactionID`, unchanged |
//! | `senderNonce` | fresh 16 random bytes |
//! | `recipNonce` | request `senderNonce` |
//! | `senderKID` / `recipKID` | request `recipKID` / `senderKID` |
//! | `protectionAlg` | absent; responses are sent unprotected |
//! | `messageTime` | now |

use chrono::Utc;
use uuid::Uuid;

use crate::context::ExchangeContext;
use crate::error::CmpError;
use crate::message::{
    CmpCertificate, ErrorMsgContent, PkiBody, PkiHeader, PkiMessage, PkiStatusInfo,
};

pub struct MessageBuilder;

impl MessageBuilder {
    /// Wrap `body` in a response to `request`. `extra_certs` is attached
    /// only when non-empty.
    pub fn response(
        request: &PkiMessage,
        _ctx: &ExchangeContext,
        body: PkiBody,
        extra_certs: Vec<CmpCertificate>,
    ) -> PkiMessage {
        PkiMessage {
            header: Self::response_header(&request.header),
            body,
            protection: None,
            extra_certs: if extra_certs.is_empty() {
                None
            } else {
                Some(extra_certs)
            },
        }
    }

    /// `error` body reporting `err` with a single failure code and client-safe text.
    pub fn error(request: &PkiMessage, ctx: &ExchangeContext, err: &CmpError) -> PkiMessage {
        let content = ErrorMsgContent {
            pki_status_info: Some(PkiStatusInfo::rejection(
                err.failure_info(),
                err.client_message(),
            )),
            error_code: None,
            error_details: None,
        };
        Self::response(request, ctx, PkiBody::Error(content), Vec::new())
    }

    fn response_header(request: &PkiHeader) -> PkiHeader {
        PkiHeader {
            pvno: request.pvno,
            sender: request.recipient.clone(),
            recipient: request.sender.clone(),
            message_time: Some(Utc::now()),
            // no protection is computed, so none may be advertised
            protection_alg: None,
            sender_kid: request.recip_kid.clone(),
            recip_kid: request.sender_kid.clone(),
            transaction_id: request.transaction_id.clone(),
            sender_nonce: Some(fresh_nonce()),
            recip_nonce: request.sender_nonce.clone(),
            free_text: None,
            general_info: None,
        }
    }
}

/// 128 bits from the system random source.
pub fn fresh_nonce() -> Vec<u8> {
    Uuid::new_v4().as_bytes().to_vec()
}
