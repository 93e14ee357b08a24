//! In-memory reference certificate authority
//!
//! [`MemoryAuthority`] implements [`IssuanceBackend`] on top of openssl:
//!
//! ```text
//! issue / rekey ──> job queue ──> worker thread ──> EndEntityBuilder ──> CertificateStore
//!       │                                                                     ▲
//!       └──── TrackingRef (Requested) ──── get_entity polls ──────────────────┘
//! revoke ─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Issuance and key update complete asynchronously on a worker thread,
//! optionally after an artificial delay, so the engine's polling bridge sees
//! the same `Requested -> Issued` lifecycle a remote CA would produce.
//! Revocation completes synchronously.
//!
//! The issuing CA's private key is held as DER inside a [`secrecy::Secret`]
//! and turned back into a `PKey` only for the duration of one signing
//! operation.

pub mod ca_builder;
pub mod issuer;
pub mod store;

use anyhow::{anyhow, Context, Result};
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use secrecy::{ExposeSecret, Secret, Zeroize};
use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::backend::{
    AuthorityRef, CertificateId, CertificateRecord, CertificateState, IssuanceBackend,
    IssuanceRequest, ProfileRef, RevocationReason, TrackingRef, TransactionEntity,
    TransactionState,
};
use crate::configs::{AppConfig, CaConfig};
use crate::message::SerialNumber;
use ca_builder::CaBuilder;
use issuer::EndEntityBuilder;
use store::CertificateStore;

/// Issuing CA private key as DER, zeroized on drop.
struct SigningKeyDer {
    der_bytes: Vec<u8>,
}

impl Zeroize for SigningKeyDer {
    fn zeroize(&mut self) {
        self.der_bytes.zeroize();
    }
}

impl fmt::Debug for SigningKeyDer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyDer")
            .field("der_bytes", &"<redacted>")
            .finish()
    }
}

/// The CA that signs end-entity certificates.
struct IssuingCa {
    key: Secret<SigningKeyDer>,
    certificate: X509,
    id: CertificateId,
}

impl IssuingCa {
    fn new(key: PKey<Private>, certificate: X509, id: CertificateId) -> Result<Self> {
        let der_bytes = key
            .private_key_to_der()
            .context("Failed to convert CA private key to DER")?;
        Ok(Self {
            key: Secret::new(SigningKeyDer { der_bytes }),
            certificate,
            id,
        })
    }

    fn issue(&self, request: &IssuanceRequest, validity_days: u32) -> Result<X509> {
        let key = PKey::private_key_from_der(&self.key.expose_secret().der_bytes)
            .context("Failed to reconstruct CA private key from secure storage")?;
        EndEntityBuilder::new(&key, &self.certificate)
            .max_validity_days(validity_days)
            .build(request)
    }
}

struct IssueJob {
    tracking: TrackingRef,
    request: IssuanceRequest,
    validity_days: u32,
    /// Certificate being replaced by a key update.
    replaces: Option<CertificateId>,
}

/// Settings for [`MemoryAuthority::bootstrap`].
#[derive(Debug, Clone)]
pub struct AuthoritySettings {
    pub name: AuthorityRef,
    /// Profile name -> maximum validity in days.
    pub profiles: HashMap<String, u32>,
    pub issue_delay: Duration,
    pub transaction_retention: Duration,
    pub root_ca: CaConfig,
    pub issuing_ca: CaConfig,
}

impl AuthoritySettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            name: AuthorityRef(config.cmp.authority.clone()),
            profiles: config.authority.profiles.clone(),
            issue_delay: Duration::from_millis(config.authority.issue_delay_ms),
            transaction_retention: Duration::from_secs(config.authority.transaction_retention_secs),
            root_ca: config.root_ca.clone(),
            issuing_ca: config.issuing_ca.clone(),
        }
    }
}

/// Reference issuance backend with a root and an issuing CA held in memory.
pub struct MemoryAuthority {
    name: AuthorityRef,
    profiles: HashMap<String, u32>,
    store: Arc<CertificateStore>,
    issuing_ca: Arc<IssuingCa>,
    root_id: CertificateId,
    jobs: Mutex<Option<Sender<IssueJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryAuthority {
    /// Create the CA hierarchy and start the issuance worker.
    pub fn bootstrap(settings: AuthoritySettings) -> Result<Self> {
        if settings.profiles.is_empty() {
            return Err(anyhow!("Authority {} has no certificate profiles", settings.name));
        }
        let (root_key, root_cert) = ca_builder_for(&settings.root_ca)
            .path_length(1)
            .build()
            .context("Failed to generate root CA")?;
        let (issuing_key, issuing_cert) = ca_builder_for(&settings.issuing_ca)
            .path_length(0)
            .signed_by(&root_key, &root_cert)
            .build()
            .context("Failed to generate issuing CA")?;
        drop(root_key);

        let store = Arc::new(CertificateStore::with_transaction_retention(
            settings.transaction_retention,
        ));
        let root = CertificateRecord::from_x509(&root_cert)?;
        let issuing = CertificateRecord::from_x509(&issuing_cert)?;
        store.insert(root.clone(), None)?;
        store.insert(issuing.clone(), Some(&root.id))?;
        info!(
            authority = %settings.name,
            root_serial = %root.serial,
            issuing_serial = %issuing.serial,
            "Certificate authority hierarchy created"
        );

        let issuing_ca = Arc::new(IssuingCa::new(issuing_key, issuing_cert, issuing.id)?);
        let (sender, receiver) = mpsc::channel();
        let worker = {
            let store = Arc::clone(&store);
            let issuing_ca = Arc::clone(&issuing_ca);
            let delay = settings.issue_delay;
            thread::Builder::new()
                .name("authority-worker".to_string())
                .spawn(move || run_worker(receiver, store, issuing_ca, delay))
                .context("Failed to start authority worker thread")?
        };

        Ok(Self {
            name: settings.name,
            profiles: settings.profiles,
            store,
            issuing_ca,
            root_id: root.id,
            jobs: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn store(&self) -> &CertificateStore {
        &self.store
    }

    pub fn root_certificate(&self) -> Result<CertificateRecord> {
        self.store
            .get(&self.root_id)?
            .ok_or_else(|| anyhow!("Root CA certificate missing from store"))
    }

    pub fn issuing_certificate(&self) -> Result<CertificateRecord> {
        self.store
            .get(&self.issuing_ca.id)?
            .ok_or_else(|| anyhow!("Issuing CA certificate missing from store"))
    }

    /// Check the authority and profile references and return the profile's validity.
    fn resolve(&self, authority: &AuthorityRef, profile: &ProfileRef) -> Result<u32> {
        if authority != &self.name {
            return Err(anyhow!("Unknown certificate authority '{}'", authority));
        }
        self.profiles
            .get(&profile.0)
            .copied()
            .ok_or_else(|| anyhow!("Unknown certificate profile '{}' on {}", profile, authority))
    }

    fn submit(&self, job: IssueJob) -> Result<TrackingRef> {
        let tracking = job.tracking.clone();
        self.store.open_transaction(&tracking)?;
        let jobs = self
            .jobs
            .lock()
            .map_err(|_| anyhow!("Authority job queue lock poisoned"))?;
        let sent = jobs
            .as_ref()
            .ok_or_else(|| anyhow!("Authority is shut down"))
            .and_then(|sender| {
                sender
                    .send(job)
                    .map_err(|_| anyhow!("Authority worker is not running"))
            });
        if let Err(e) = sent {
            self.store
                .complete_transaction(&tracking, Err(e.to_string()))?;
            return Err(e);
        }
        Ok(tracking)
    }
}

fn ca_builder_for<'a>(config: &CaConfig) -> CaBuilder<'a> {
    CaBuilder::new()
        .subject_common_name(config.common_name.clone())
        .organization(config.organization.clone())
        .organizational_unit(config.organizational_unit.clone())
        .locality(config.locality.clone())
        .state(config.state.clone())
        .country(config.country.clone())
        .key_size(config.key_size)
        .validity_days(config.validity_days)
}

fn run_worker(
    jobs: Receiver<IssueJob>,
    store: Arc<CertificateStore>,
    issuing_ca: Arc<IssuingCa>,
    delay: Duration,
) {
    for job in jobs {
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        let outcome = complete_job(&store, &issuing_ca, &job);
        let result = match outcome {
            Ok((state, id)) => {
                debug!(tracking_ref = %job.tracking, certificate = %id, "Transaction completed");
                store.complete_transaction(&job.tracking, Ok((state, id)))
            }
            Err(e) => {
                warn!(tracking_ref = %job.tracking, error = %format!("{:#}", e), "Transaction failed");
                store.complete_transaction(&job.tracking, Err(format!("{:#}", e)))
            }
        };
        if let Err(e) = result {
            error!(tracking_ref = %job.tracking, error = %format!("{:#}", e), "Failed to record transaction outcome");
        }
    }
    debug!("Authority worker stopped");
}

fn complete_job(
    store: &CertificateStore,
    issuing_ca: &IssuingCa,
    job: &IssueJob,
) -> Result<(TransactionState, CertificateId)> {
    if let Some(replaced) = &job.replaces {
        let current = store
            .get(replaced)?
            .ok_or_else(|| anyhow!("Certificate {} to update is not stored", replaced))?;
        if current.state != CertificateState::Valid {
            return Err(anyhow!("Certificate {} is no longer valid", replaced));
        }
    }
    let certificate = issuing_ca.issue(&job.request, job.validity_days)?;
    let record = CertificateRecord::from_x509(&certificate)?;
    let id = record.id.clone();
    info!(
        tracking_ref = %job.tracking,
        serial = %record.serial,
        subject = %record.subject.to_dn_string(),
        "Certificate issued"
    );
    store.insert(record, Some(&issuing_ca.id))?;
    let state = match job.replaces {
        Some(_) => TransactionState::Rekeyed,
        None => TransactionState::Issued,
    };
    Ok((state, id))
}

impl IssuanceBackend for MemoryAuthority {
    fn issue(
        &self,
        authority: &AuthorityRef,
        profile: &ProfileRef,
        request: &IssuanceRequest,
    ) -> Result<TrackingRef> {
        let validity_days = self.resolve(authority, profile)?;
        self.submit(IssueJob {
            tracking: TrackingRef::generate(),
            request: request.clone(),
            validity_days,
            replaces: None,
        })
    }

    fn rekey(
        &self,
        authority: &AuthorityRef,
        profile: &ProfileRef,
        certificate: &CertificateId,
        request: &IssuanceRequest,
    ) -> Result<TrackingRef> {
        let validity_days = self.resolve(authority, profile)?;
        if self.store.get(certificate)?.is_none() {
            return Err(anyhow!("Certificate {} is not stored", certificate));
        }
        self.submit(IssueJob {
            tracking: TrackingRef::generate(),
            request: request.clone(),
            validity_days,
            replaces: Some(certificate.clone()),
        })
    }

    fn revoke(
        &self,
        authority: &AuthorityRef,
        profile: &ProfileRef,
        certificate: &CertificateId,
        reason: RevocationReason,
    ) -> Result<()> {
        self.resolve(authority, profile)?;
        self.store.revoke(certificate, reason)?;
        info!(certificate = %certificate, reason = ?reason, "Certificate revoked by authority");
        Ok(())
    }

    fn get_entity(&self, tracking: &TrackingRef) -> Result<Option<TransactionEntity>> {
        self.store.transaction(tracking)
    }

    fn lookup_by_serial(&self, serial: &SerialNumber) -> Result<Option<CertificateRecord>> {
        self.store.find_by_serial(serial)
    }

    fn get_certificate(&self, id: &CertificateId) -> Result<Option<CertificateRecord>> {
        self.store.get(id)
    }

    fn get_ca_chain(&self, id: &CertificateId) -> Result<Vec<CertificateRecord>> {
        self.store.chain(id)
    }
}

impl Drop for MemoryAuthority {
    fn drop(&mut self) {
        // closing the queue ends the worker loop
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.take();
        }
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                if handle.join().is_err() {
                    error!("Authority worker panicked");
                }
            }
        }
    }
}

impl fmt::Debug for MemoryAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAuthority")
            .field("name", &self.name)
            .field("profiles", &self.profiles)
            .field("issuing_ca", &self.issuing_ca.id)
            .field("signing_key", &"<securely stored>")
            .finish()
    }
}
