//! In-memory certificate and transaction store
//!
//! Holds every certificate the authority knows about (its own CA certificates
//! included), indexed by [`CertificateId`] and by serial number, together with
//! the link to the issuing certificate, and the state of every asynchronous
//! transaction by tracking reference. Completed transactions are kept for a
//! retention period and dropped when a later transaction is opened.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::backend::{
    CertificateId, CertificateRecord, CertificateState, RevocationReason, TrackingRef,
    TransactionEntity, TransactionState,
};
use crate::message::SerialNumber;

struct StoredCertificate {
    record: CertificateRecord,
    /// `None` for a self-signed trust anchor.
    issuer: Option<CertificateId>,
}

struct StoredTransaction {
    entity: TransactionEntity,
    /// Set once the transaction reaches a terminal state.
    completed_at: Option<Instant>,
}

#[derive(Default)]
struct StoreState {
    certificates: HashMap<CertificateId, StoredCertificate>,
    by_serial: HashMap<SerialNumber, CertificateId>,
    transactions: HashMap<TrackingRef, StoredTransaction>,
}

pub const DEFAULT_TRANSACTION_RETENTION: Duration = Duration::from_secs(600);

pub struct CertificateStore {
    state: Mutex<StoreState>,
    transaction_retention: Duration,
}

impl Default for CertificateStore {
    fn default() -> Self {
        Self::with_transaction_retention(DEFAULT_TRANSACTION_RETENTION)
    }
}

impl CertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that forgets completed transactions `retention` after completion.
    pub fn with_transaction_retention(retention: Duration) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            transaction_retention: retention,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("Certificate store lock poisoned"))
    }

    /// Add a certificate issued by `issuer` (`None` for a trust anchor).
    ///
    /// # Errors
    /// The serial number is already in use, or `issuer` is unknown.
    pub fn insert(&self, record: CertificateRecord, issuer: Option<&CertificateId>) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(existing) = state.by_serial.get(&record.serial) {
            return Err(anyhow!(
                "Serial number {} already assigned to certificate {}",
                record.serial,
                existing
            ));
        }
        if let Some(issuer) = issuer {
            if !state.certificates.contains_key(issuer) {
                return Err(anyhow!("Issuing certificate {} is not stored", issuer));
            }
        }
        state
            .by_serial
            .insert(record.serial.clone(), record.id.clone());
        state.certificates.insert(
            record.id.clone(),
            StoredCertificate {
                record,
                issuer: issuer.cloned(),
            },
        );
        Ok(())
    }

    pub fn get(&self, id: &CertificateId) -> Result<Option<CertificateRecord>> {
        Ok(self
            .lock()?
            .certificates
            .get(id)
            .map(|stored| stored.record.clone()))
    }

    pub fn find_by_serial(&self, serial: &SerialNumber) -> Result<Option<CertificateRecord>> {
        let state = self.lock()?;
        Ok(state
            .by_serial
            .get(serial)
            .and_then(|id| state.certificates.get(id))
            .map(|stored| stored.record.clone()))
    }

    /// Issuers of `id` up to the trust anchor, nearest first.
    pub fn chain(&self, id: &CertificateId) -> Result<Vec<CertificateRecord>> {
        let state = self.lock()?;
        let mut current = state
            .certificates
            .get(id)
            .ok_or_else(|| anyhow!("Certificate {} is not stored", id))?;
        let mut chain = Vec::new();
        while let Some(issuer_id) = &current.issuer {
            current = state
                .certificates
                .get(issuer_id)
                .ok_or_else(|| anyhow!("Issuing certificate {} is not stored", issuer_id))?;
            chain.push(current.record.clone());
            if chain.len() > state.certificates.len() {
                return Err(anyhow!("Issuer links of {} form a cycle", id));
            }
        }
        Ok(chain)
    }

    /// Mark a certificate revoked.
    ///
    /// # Errors
    /// The certificate is unknown or already revoked.
    pub fn revoke(&self, id: &CertificateId, reason: RevocationReason) -> Result<()> {
        let mut state = self.lock()?;
        let stored = state
            .certificates
            .get_mut(id)
            .ok_or_else(|| anyhow!("Certificate {} is not stored", id))?;
        if stored.record.state == CertificateState::Revoked {
            return Err(anyhow!("Certificate {} is already revoked", id));
        }
        stored.record.state = CertificateState::Revoked;
        stored.record.revocation_reason = Some(reason);
        Ok(())
    }

    /// Register a new transaction in the `Requested` state, dropping
    /// transactions that completed longer than the retention period ago.
    pub fn open_transaction(&self, tracking: &TrackingRef) -> Result<()> {
        let entity = TransactionEntity {
            tracking: tracking.clone(),
            state: TransactionState::Requested,
            certificate: None,
            failure: None,
        };
        let retention = self.transaction_retention;
        let mut state = self.lock()?;
        let before = state.transactions.len();
        state.transactions.retain(|_, stored| {
            stored
                .completed_at
                .map_or(true, |completed| completed.elapsed() < retention)
        });
        let expired = before - state.transactions.len();
        if expired > 0 {
            debug!(expired, "Dropped completed transactions");
        }
        state.transactions.insert(
            tracking.clone(),
            StoredTransaction {
                entity,
                completed_at: None,
            },
        );
        Ok(())
    }

    /// Move a transaction to a terminal state.
    pub fn complete_transaction(
        &self,
        tracking: &TrackingRef,
        outcome: std::result::Result<(TransactionState, CertificateId), String>,
    ) -> Result<()> {
        let mut state = self.lock()?;
        let stored = state
            .transactions
            .get_mut(tracking)
            .ok_or_else(|| anyhow!("Transaction {} is not known", tracking))?;
        if stored.entity.state.is_terminal() {
            return Err(anyhow!("Transaction {} already completed", tracking));
        }
        stored.completed_at = Some(Instant::now());
        let entity = &mut stored.entity;
        match outcome {
            Ok((terminal, certificate)) => {
                entity.state = terminal;
                entity.certificate = Some(certificate);
            }
            Err(failure) => {
                entity.state = TransactionState::Failed;
                entity.failure = Some(failure);
            }
        }
        Ok(())
    }

    pub fn transaction(&self, tracking: &TrackingRef) -> Result<Option<TransactionEntity>> {
        Ok(self
            .lock()?
            .transactions
            .get(tracking)
            .map(|stored| stored.entity.clone()))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.certificates.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Re-verify every stored certificate's signature against its issuer's
    /// public key (its own for trust anchors). Returns `false` on the first
    /// certificate that does not verify.
    pub fn validate(&self) -> Result<bool> {
        let state = self.lock()?;
        for (id, stored) in &state.certificates {
            let signer = match &stored.issuer {
                Some(issuer_id) => state
                    .certificates
                    .get(issuer_id)
                    .ok_or_else(|| anyhow!("Issuing certificate {} is not stored", issuer_id))?,
                None => stored,
            };
            let certificate = stored.record.certificate.to_x509()?;
            let issuer_key = signer
                .record
                .certificate
                .to_x509()?
                .public_key()
                .context("Failed to extract issuer public key")?;
            let valid = certificate
                .verify(&issuer_key)
                .with_context(|| format!("Failed to verify certificate {}", id))?;
            if !valid {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
