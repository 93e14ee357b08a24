//! CMP Engine - Certificate Management Protocol message processing
//!
//! Validates inbound CMP (RFC 4210 / RFC 4211) messages, verifies
//! proof-of-possession, performs the requested PKI operation against an
//! issuance backend and builds the protocol response.
//!
//! # Overview
//!
//! ```text
//! transport ──> validation ──> pop ──> handlers ──> polling ──> builder ──> transport
//!                  │                      │            │
//!               context              IssuanceBackend ◄─┘
//! ```
//!
//! Supported bodies: `ir`, `cr`, `kur`, `rr`, `certConf`, `pkiConf` and
//! `error`. Every other body type fails closed with `badRequest`.
//!
//! # Failure Classification
//!
//! Every failure is a [`error::CmpError`]:
//! - **Protocol failures** carry one [`error::FailureInfo`] and a message that
//!   is safe to return to the client.
//! - **System failures** (backend faults, timeouts, panics) are answered with
//!   `systemFailure` and a fixed text; the cause is only logged.
//!
//! # Architecture
//!
//! - [`message`]: Parsed PKIMessage structures and the DER encodings POP needs
//! - [`validation`]: Protection pre-check and per-body structural validators
//! - [`pop`]: Proof-of-possession verification
//! - [`handlers`]: [`handlers::CmpEngine`] pipeline and the body handlers
//! - [`polling`]: Bounded wait for asynchronous backend transactions
//! - [`builder`]: Response and error message assembly
//! - [`backend`]: The [`backend::IssuanceBackend`] contract
//! - [`authority`]: In-memory openssl certificate authority implementing it
//! - [`protocol`] / [`external_interface`]: Framing and Unix-socket transport
//! - [`configs`]: TOML configuration
//!
//! # Example Usage
//!
//! ```no_run
//! use cmp_engine::authority::{AuthoritySettings, MemoryAuthority};
//! use cmp_engine::configs::AppConfig;
//! use cmp_engine::handlers::CmpEngine;
//! use std::sync::Arc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let authority = MemoryAuthority::bootstrap(AuthoritySettings::from_config(&config))?;
//!     let engine = CmpEngine::new(Arc::new(authority));
//!     # let request: cmp_engine::message::PkiMessage = unimplemented!();
//!     let response = engine.process(&request, &config.exchange_context());
//!     println!("{}", response.body.label());
//!     Ok(())
//! }
//! ```

pub mod authority;
pub mod backend;
pub mod builder;
pub mod configs;
pub mod context;
pub mod error;
pub mod external_interface;
pub mod handlers;
pub mod message;
pub mod polling;
pub mod pop;
pub mod protocol;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_support;
