//! Request pipeline and per-body handlers
//!
//! [`CmpEngine::process`] runs one inbound message through the whole
//! pipeline and always produces a response message:
//!
//! ```text
//! validate ──> proof of possession (ir/cr/kur) ──> handler ──> validate response
//!     │                    │                          │               │
//!     └────────────────────┴─────── CmpError ─────────┴───────────────┴──> error body
//! ```
//!
//! | Request | Handler | Response |
//! |---------|---------|----------|
//! | ir / cr | [`certificate::handle_certification`] | ip / cp |
//! | kur | [`certificate::handle_key_update`] | kup |
//! | rr | [`revocation::handle_revocation`] | rp |
//! | certConf | [`confirm::handle_cert_conf`] | pkiconf |
//! | error | [`confirm::handle_error`] | pkiconf |

pub mod certificate;
pub mod confirm;
pub mod revocation;

use std::sync::Arc;
use tracing::{error, info, info_span, warn};

use crate::backend::IssuanceBackend;
use crate::builder::MessageBuilder;
use crate::context::ExchangeContext;
use crate::error::{guarded, CmpError, Result};
use crate::message::{BodyType, CmpCertificate, PkiBody, PkiMessage};
use crate::pop;
use crate::validation;

/// Body and extra certificates produced by a handler.
#[derive(Debug)]
pub struct HandlerOutput {
    pub body: PkiBody,
    pub extra_certs: Vec<CmpCertificate>,
}

impl HandlerOutput {
    pub fn new(body: PkiBody) -> Self {
        Self {
            body,
            extra_certs: Vec::new(),
        }
    }

    pub fn with_extra_certs(body: PkiBody, extra_certs: Vec<CmpCertificate>) -> Self {
        Self { body, extra_certs }
    }
}

/// Processes CMP messages against one issuance backend.
///
/// Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct CmpEngine {
    backend: Arc<dyn IssuanceBackend>,
}

impl CmpEngine {
    pub fn new(backend: Arc<dyn IssuanceBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &dyn IssuanceBackend {
        self.backend.as_ref()
    }

    /// Process `request` and return the response. Failures are answered with
    /// an `error` body; the transaction id always matches the request's.
    pub fn process(&self, request: &PkiMessage, ctx: &ExchangeContext) -> PkiMessage {
        let span = info_span!(
            "cmp_exchange",
            transaction_id = %request.transaction_label(),
            body = %request.body.label()
        );
        let _entered = span.enter();

        match self.try_process(request, ctx) {
            Ok(response) => {
                info!(response = %response.body.label(), "Exchange completed");
                response
            }
            Err(err) => {
                log_failure(&err);
                MessageBuilder::error(request, ctx, &err)
            }
        }
    }

    /// Pipeline without the conversion of failures into an `error` body.
    pub fn try_process(&self, request: &PkiMessage, ctx: &ExchangeContext) -> Result<PkiMessage> {
        validation::validate(request, ctx)?;

        if matches!(
            request.body.body_type(),
            Some(BodyType::Ir | BodyType::Cr | BodyType::Kur)
        ) {
            guarded("proof-of-possession verifier", || pop::verify_pop(request))?;
        }

        let output = guarded("handler", || self.handle(request, ctx))?;
        let response = MessageBuilder::response(request, ctx, output.body, output.extra_certs);
        validate_outgoing(&response, ctx)?;
        Ok(response)
    }

    fn handle(&self, request: &PkiMessage, ctx: &ExchangeContext) -> Result<HandlerOutput> {
        let backend = self.backend.as_ref();
        match &request.body {
            PkiBody::Ir(_) | PkiBody::Cr(_) => {
                certificate::handle_certification(backend, request, ctx)
            }
            PkiBody::Kur(_) => certificate::handle_key_update(backend, request, ctx),
            PkiBody::Rr(_) => revocation::handle_revocation(backend, request, ctx),
            PkiBody::CertConf(_) => confirm::handle_cert_conf(request),
            PkiBody::Error(_) => confirm::handle_error(request),
            other => Err(CmpError::Unsupported { body: other.label() }),
        }
    }
}

/// Assembled certification and revocation responses must pass their own
/// validators; a violation is an internal fault.
fn validate_outgoing(response: &PkiMessage, ctx: &ExchangeContext) -> Result<()> {
    let check = match &response.body {
        PkiBody::Ip(_) | PkiBody::Cp(_) | PkiBody::Kup(_) | PkiBody::Rp(_) => {
            validation::validator_for(&response.body)
        }
        _ => return Ok(()),
    };
    check
        .and_then(|validator| validator(response, ctx))
        .map_err(|e| CmpError::system(format!("Assembled response failed validation: {}", e)))
}

fn log_failure(err: &CmpError) {
    if err.is_system() {
        let cause = std::error::Error::source(err)
            .map(|source| format!("{:#}", DisplayChain(source)))
            .unwrap_or_default();
        error!(failure = %err.failure_info(), cause = %cause, "{}", err);
    } else {
        warn!(failure = %err.failure_info(), "Request rejected: {}", err);
    }
}

/// Renders an error followed by its sources, separated by `: `.
struct DisplayChain<'a>(&'a (dyn std::error::Error + 'static));

impl std::fmt::Display for DisplayChain<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(next) = source {
            write!(f, ": {}", next)?;
            source = next.source();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureInfo;
    use crate::message::{CertStatus, PkiStatus};
    use crate::test_support::{
        cert_request_message, context, ec_key, error_info, message, ScriptedBackend,
    };

    fn engine(backend: &Arc<ScriptedBackend>) -> CmpEngine {
        CmpEngine::new(backend.clone())
    }

    #[test]
    fn test_every_response_echoes_transaction_id() {
        let backend = Arc::new(ScriptedBackend::new());
        let engine = engine(&backend);
        let key = ec_key();
        let requests = vec![
            cert_request_message(BodyType::Ir, "CN=test", &key),
            message(PkiBody::CertConf(vec![])),
            message(PkiBody::GenM(vec![])),
            message(PkiBody::Unknown {
                tag: 99,
                content: vec![],
            }),
            message(PkiBody::PkiConf),
        ];
        for request in requests {
            let response = engine.process(&request, &context());
            assert_eq!(
                response.header.transaction_id, request.header.transaction_id,
                "{}",
                request.body.label()
            );
        }
    }

    #[test]
    fn test_cert_conf_without_entries_never_reaches_handler() {
        let backend = Arc::new(ScriptedBackend::new());
        let response = engine(&backend).process(&message(PkiBody::CertConf(vec![])), &context());
        let info = error_info(&response);
        assert_eq!(info.fail_info.unwrap().single(), Some(FailureInfo::BadDataFormat));
        assert!(info.status_string.as_ref().unwrap()[0].contains("must have one element"));
        assert_eq!(backend.call_count(), 0);
    }

    #[test]
    fn test_cert_conf_is_acknowledged() {
        let backend = Arc::new(ScriptedBackend::new());
        let request = message(PkiBody::CertConf(vec![CertStatus {
            cert_hash: Some(vec![1; 32]),
            cert_req_id: 0,
            status_info: None,
        }]));
        let response = engine(&backend).process(&request, &context());
        assert_eq!(response.body, PkiBody::PkiConf);
    }

    #[test]
    fn test_bad_pop_stops_before_backend() {
        let backend = Arc::new(ScriptedBackend::new());
        let key = ec_key();
        let other = ec_key();
        let mut request = cert_request_message(BodyType::Ir, "CN=test", &key);
        let forged = cert_request_message(BodyType::Ir, "CN=test", &other);
        if let (PkiBody::Ir(reqs), PkiBody::Ir(forged)) = (&mut request.body, &forged.body) {
            reqs[0].popo = forged[0].popo.clone();
        }
        let response = engine(&backend).process(&request, &context());
        assert_eq!(
            error_info(&response).fail_info.unwrap().single(),
            Some(FailureInfo::BadPop)
        );
        assert_eq!(backend.call_count(), 0);
    }

    #[test]
    fn test_inbound_pkiconf_is_unsupported() {
        let backend = Arc::new(ScriptedBackend::new());
        let err = engine(&backend)
            .try_process(&message(PkiBody::PkiConf), &context())
            .unwrap_err();
        assert!(matches!(err, CmpError::Unsupported { .. }));
    }

    #[test]
    fn test_backend_fault_is_reported_without_detail() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.fail_submissions();
        let key = ec_key();
        let response = engine(&backend).process(
            &cert_request_message(BodyType::Cr, "CN=test", &key),
            &context(),
        );
        let info = error_info(&response);
        assert_eq!(info.status, PkiStatus::Rejection);
        assert_eq!(info.fail_info.unwrap().single(), Some(FailureInfo::SystemFailure));
        assert!(!info.status_string.as_ref().unwrap()[0].contains("scripted"));
    }
}
