//! Per-exchange configuration
//!
//! An [`ExchangeContext`] is built once per inbound message from the server
//! configuration and is read-only from then on. It tells the validators which
//! protection scheme to expect, which authority and profile the request is
//! scoped to, and carries the policy hook, the polling policy and the
//! exchange's cancellation token.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::backend::{AuthorityRef, ProfileRef};
use crate::error::{CmpError, Result};
use crate::message::{BodyType, CertRequest};
use crate::polling::{CancellationToken, PollPolicy};

/// Message protection the server expects on inbound messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionScheme {
    #[default]
    None,
    Signature,
    PasswordBasedMac,
}

/// Backend-specific policy applied to a certification request once it is
/// structurally valid.
pub trait TemplatePolicy: Send + Sync {
    fn check(&self, body: BodyType, request: &CertRequest) -> Result<()>;
}

/// Policy that accepts every structurally valid request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl TemplatePolicy for AcceptAll {
    fn check(&self, _body: BodyType, _request: &CertRequest) -> Result<()> {
        Ok(())
    }
}

/// Profile limits on the requested template.
#[derive(Debug, Clone, Default)]
pub struct ProfilePolicy {
    pub require_public_key: bool,
    pub max_validity_days: Option<u32>,
}

impl TemplatePolicy for ProfilePolicy {
    fn check(&self, _body: BodyType, request: &CertRequest) -> Result<()> {
        let template = &request.cert_template;
        if self.require_public_key && template.public_key.is_none() {
            return Err(CmpError::bad_cert_template(
                "Certificate template must carry a public key",
            ));
        }

        let Some(validity) = &template.validity else {
            return Ok(());
        };
        let not_before = validity.not_before.unwrap_or_else(Utc::now);
        if let Some(not_after) = validity.not_after {
            if not_after <= not_before {
                return Err(CmpError::bad_cert_template(
                    "Requested validity ends before it starts",
                ));
            }
            if let Some(max_days) = self.max_validity_days {
                let requested = not_after - not_before;
                if requested > chrono::Duration::days(i64::from(max_days)) {
                    return Err(CmpError::bad_cert_template(format!(
                        "Requested validity of {} days exceeds the profile limit of {} days",
                        requested.num_days(),
                        max_days
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Immutable configuration for one request/response exchange.
#[derive(Clone)]
pub struct ExchangeContext {
    pub protection: ProtectionScheme,
    pub authority: AuthorityRef,
    pub profile: ProfileRef,
    pub policy: Arc<dyn TemplatePolicy>,
    pub poll: PollPolicy,
    /// Attach the issuing CA chain as extra certificates on ip/cp/kup.
    pub include_ca_chain: bool,
    pub cancel: CancellationToken,
}

impl ExchangeContext {
    pub fn new(authority: AuthorityRef, profile: ProfileRef) -> Self {
        Self {
            protection: ProtectionScheme::None,
            authority,
            profile,
            policy: Arc::new(AcceptAll),
            poll: PollPolicy::default(),
            include_ca_chain: true,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_protection(mut self, protection: ProtectionScheme) -> Self {
        self.protection = protection;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn TemplatePolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_ca_chain(mut self, include: bool) -> Self {
        self.include_ca_chain = include;
        self
    }

    /// Same configuration with its own cancellation token.
    pub fn for_new_exchange(&self) -> Self {
        Self {
            cancel: CancellationToken::new(),
            ..self.clone()
        }
    }
}

impl fmt::Debug for ExchangeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeContext")
            .field("protection", &self.protection)
            .field("authority", &self.authority)
            .field("profile", &self.profile)
            .field("poll", &self.poll)
            .field("include_ca_chain", &self.include_ca_chain)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureInfo;
    use crate::message::{CertTemplate, OptionalValidity};

    fn request(template: CertTemplate) -> CertRequest {
        CertRequest {
            cert_req_id: 0,
            cert_template: template,
            controls: None,
        }
    }

    #[test]
    fn test_profile_policy_requires_public_key() {
        let policy = ProfilePolicy {
            require_public_key: true,
            max_validity_days: None,
        };
        let err = policy
            .check(BodyType::Ir, &request(CertTemplate::default()))
            .unwrap_err();
        assert_eq!(err.failure_info(), FailureInfo::BadCertTemplate);

        let relaxed = ProfilePolicy::default();
        assert!(relaxed
            .check(BodyType::Ir, &request(CertTemplate::default()))
            .is_ok());
    }

    #[test]
    fn test_profile_policy_limits_validity() {
        let policy = ProfilePolicy {
            require_public_key: false,
            max_validity_days: Some(30),
        };
        let now = Utc::now();
        let short = CertTemplate {
            validity: Some(OptionalValidity::new(
                Some(now),
                Some(now + chrono::Duration::days(10)),
            )),
            ..Default::default()
        };
        let long = CertTemplate {
            validity: Some(OptionalValidity::new(
                Some(now),
                Some(now + chrono::Duration::days(400)),
            )),
            ..Default::default()
        };
        let inverted = CertTemplate {
            validity: Some(OptionalValidity::new(
                Some(now),
                Some(now - chrono::Duration::days(1)),
            )),
            ..Default::default()
        };
        assert!(policy.check(BodyType::Cr, &request(short)).is_ok());
        assert_eq!(
            policy
                .check(BodyType::Cr, &request(long))
                .unwrap_err()
                .failure_info(),
            FailureInfo::BadCertTemplate
        );
        assert!(policy.check(BodyType::Cr, &request(inverted)).is_err());
    }

    #[test]
    fn test_new_exchange_gets_fresh_token() {
        let ctx = ExchangeContext::new(
            AuthorityRef("default".into()),
            ProfileRef("end-entity".into()),
        );
        let next = ctx.for_new_exchange();
        ctx.cancel.cancel();
        assert!(!next.cancel.is_cancelled());
    }
}
