//! Polling bridge between the asynchronous backend and the synchronous protocol
//!
//! `issue` and `rekey` only return a tracking reference. A CMP response has to
//! carry the certificate, so the handler waits here until the tracked
//! transaction reaches a terminal state. This is the only place in the request
//! pipeline that blocks.
//!
//! The first read happens immediately; later reads are spaced by
//! [`PollPolicy::interval`] until [`PollPolicy::timeout`] has elapsed. Waiting
//! is done on a [`CancellationToken`], so cancelling wakes a sleeping poller at
//! once.

use anyhow::Result;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::backend::{IssuanceBackend, TrackingRef, TransactionEntity, TransactionState};
use crate::error::CmpError;

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Bounded wait: overall deadline plus a fixed pause between re-reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_POLL_TIMEOUT,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Cooperative cancellation shared between an exchange and whoever may abort it.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel and wake every waiter.
    pub fn cancel(&self) {
        let (flag, signal) = &*self.inner;
        *lock_flag(flag) = true;
        signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *lock_flag(&self.inner.0)
    }

    /// Sleep for up to `timeout`; returns `true` if cancelled meanwhile.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (flag, signal) = &*self.inner;
        let guard = lock_flag(flag);
        match signal.wait_timeout_while(guard, timeout, |cancelled| !*cancelled) {
            Ok((cancelled, _)) => *cancelled,
            Err(poisoned) => *poisoned.into_inner().0,
        }
    }
}

// The flag is a plain bool, so a poisoned lock still holds a meaningful value.
fn lock_flag(flag: &Mutex<bool>) -> MutexGuard<'_, bool> {
    flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// How a bounded wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The transaction reached a terminal state (not necessarily the expected one).
    Terminal(TransactionEntity),
    TimedOut,
    NotFound,
    Cancelled,
}

/// Re-read `tracking` until it is terminal, the deadline passes, it disappears
/// or `cancel` fires. Backend read errors are returned as-is.
pub fn poll_until_terminal(
    backend: &dyn IssuanceBackend,
    tracking: &TrackingRef,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<PollOutcome> {
    let deadline = Instant::now() + policy.timeout;
    let mut attempts = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Ok(PollOutcome::Cancelled);
        }
        attempts += 1;
        match backend.get_entity(tracking)? {
            None => return Ok(PollOutcome::NotFound),
            Some(entity) if entity.state.is_terminal() => {
                debug!(tracking_ref = %tracking, attempts, state = ?entity.state, "Transaction reached terminal state");
                return Ok(PollOutcome::Terminal(entity));
            }
            Some(_) => {}
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(PollOutcome::TimedOut);
        }
        let pause = policy.interval.min(deadline - now);
        if cancel.wait(pause) {
            return Ok(PollOutcome::Cancelled);
        }
    }
}

/// Wait for `tracking` to reach `expected` and classify every other ending.
///
/// # Errors
/// - not found: `badDataFormat`
/// - timeout, cancellation, backend error or another terminal state: `systemFailure`
pub fn await_state(
    backend: &dyn IssuanceBackend,
    tracking: &TrackingRef,
    expected: TransactionState,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> crate::error::Result<TransactionEntity> {
    let outcome = poll_until_terminal(backend, tracking, policy, cancel).map_err(|e| {
        CmpError::backend(format!("Failed to read transaction {}", tracking), e)
    })?;
    match outcome {
        PollOutcome::Terminal(entity) if entity.state == expected => Ok(entity),
        PollOutcome::Terminal(entity) => Err(CmpError::system(format!(
            "Transaction {} ended in state {:?} instead of {:?}: {}",
            tracking,
            entity.state,
            expected,
            entity.failure.as_deref().unwrap_or("no reason given")
        ))),
        PollOutcome::TimedOut => {
            warn!(tracking_ref = %tracking, timeout_ms = policy.timeout.as_millis() as u64, "Timed out waiting for transaction");
            Err(CmpError::system(format!(
                "Transaction {} did not complete within {:?}",
                tracking, policy.timeout
            )))
        }
        PollOutcome::NotFound => Err(CmpError::bad_data_format(format!(
            "Transaction {} was not found",
            tracking
        ))),
        PollOutcome::Cancelled => Err(CmpError::system(format!(
            "Waiting for transaction {} was cancelled",
            tracking
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureInfo;
    use crate::test_support::ScriptedBackend;
    use std::thread;

    fn quick_policy(timeout_ms: u64) -> PollPolicy {
        PollPolicy {
            timeout: Duration::from_millis(timeout_ms),
            interval: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_returns_as_soon_as_terminal() {
        let backend = ScriptedBackend::new();
        backend.script_states(&[
            Some(TransactionState::Requested),
            Some(TransactionState::Requested),
            Some(TransactionState::Issued),
        ]);
        let tracking = TrackingRef::generate();

        let started = Instant::now();
        let entity = await_state(
            &backend,
            &tracking,
            TransactionState::Issued,
            &quick_policy(5_000),
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(entity.state, TransactionState::Issued);
        assert_eq!(backend.entity_reads(), 3);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_first_read_is_immediate() {
        let backend = ScriptedBackend::new();
        backend.script_states(&[Some(TransactionState::Issued)]);
        let policy = PollPolicy {
            timeout: Duration::from_secs(30),
            interval: Duration::from_secs(30),
        };
        let started = Instant::now();
        let outcome = poll_until_terminal(
            &backend,
            &TrackingRef::generate(),
            &policy,
            &CancellationToken::new(),
        )
        .unwrap();
        assert!(matches!(outcome, PollOutcome::Terminal(_)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_timeout_is_system_failure() {
        let backend = ScriptedBackend::new();
        backend.script_states(&[Some(TransactionState::Requested)]);
        let err = await_state(
            &backend,
            &TrackingRef::generate(),
            TransactionState::Issued,
            &quick_policy(40),
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert_eq!(err.failure_info(), FailureInfo::SystemFailure);
        assert!(backend.entity_reads() > 1);
    }

    #[test]
    fn test_not_found_is_bad_data_format() {
        let backend = ScriptedBackend::new();
        backend.script_states(&[None]);
        let err = await_state(
            &backend,
            &TrackingRef::generate(),
            TransactionState::Issued,
            &quick_policy(1_000),
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert_eq!(err.failure_info(), FailureInfo::BadDataFormat);
    }

    #[test]
    fn test_unexpected_terminal_state_stops_polling() {
        let backend = ScriptedBackend::new();
        backend.script_states(&[Some(TransactionState::Failed)]);
        let err = await_state(
            &backend,
            &TrackingRef::generate(),
            TransactionState::Issued,
            &quick_policy(1_000),
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(err.is_system());
        assert_eq!(backend.entity_reads(), 1);
    }

    #[test]
    fn test_cancellation_wakes_sleeping_poller() {
        let backend = ScriptedBackend::new();
        backend.script_states(&[Some(TransactionState::Requested)]);
        let cancel = CancellationToken::new();
        let policy = PollPolicy {
            timeout: Duration::from_secs(30),
            interval: Duration::from_secs(10),
        };

        let canceller = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            canceller.cancel();
        });

        let started = Instant::now();
        let outcome =
            poll_until_terminal(&backend, &TrackingRef::generate(), &policy, &cancel).unwrap();
        handle.join().unwrap();

        assert_eq!(outcome, PollOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_backend_error_is_system_failure() {
        let backend = ScriptedBackend::new();
        backend.fail_entity_reads();
        let err = await_state(
            &backend,
            &TrackingRef::generate(),
            TransactionState::Issued,
            &quick_policy(1_000),
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(err.is_system());
    }
}
