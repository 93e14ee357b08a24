//! Fixtures shared by the unit tests

use anyhow::anyhow;
use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;
use openssl::x509::X509;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use yasna::Tag;

use crate::backend::{
    AuthorityRef, CertificateId, CertificateRecord, CertificateState, IssuanceBackend,
    IssuanceRequest, ProfileRef, RevocationReason, TrackingRef, TransactionEntity,
    TransactionState,
};
use crate::builder::fresh_nonce;
use crate::context::ExchangeContext;
use crate::message::encoding::encode_cert_template;
use crate::message::{
    oid, AlgorithmIdentifier, AttributeTypeAndValue, BodyType, CertReqMsg, CertRequest,
    CertTemplate, Extension, GeneralName, Name, PkiBody, PkiHeader, PkiMessage, PkiStatusInfo,
    PopoSigningKey, ProofOfPossession, RevDetails, SerialNumber, CERT_REQ_ID,
};
use crate::polling::PollPolicy;

pub fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

pub fn spki_der(key: &PKey<Private>) -> Vec<u8> {
    key.public_key_to_der().unwrap()
}

/// ECDSA-with-SHA256 proof over the template DER.
pub fn sign_template(template: &CertTemplate, key: &PKey<Private>) -> PopoSigningKey {
    let der = encode_cert_template(template).unwrap();
    let mut signer = Signer::new(MessageDigest::sha256(), key).unwrap();
    signer.update(&der).unwrap();
    PopoSigningKey {
        poposk_input: None,
        algorithm_identifier: AlgorithmIdentifier::new(oid::ECDSA_WITH_SHA256),
        signature: signer.sign_to_vec().unwrap(),
    }
}

fn directory_name(dn: &str) -> GeneralName {
    GeneralName::DirectoryName(Name::parse_dn(dn).unwrap())
}

/// Unprotected message from `CN=client` to `CN=ca` with a fresh transaction id.
pub fn message(body: PkiBody) -> PkiMessage {
    let mut header = PkiHeader::new(directory_name("CN=client"), directory_name("CN=ca"));
    header.transaction_id = Some(fresh_nonce());
    header.sender_nonce = Some(fresh_nonce());
    PkiMessage {
        header,
        body,
        protection: None,
        extra_certs: None,
    }
}

fn signed_entry(template: CertTemplate, key: &PKey<Private>, controls: Option<Vec<AttributeTypeAndValue>>) -> CertReqMsg {
    let popo = sign_template(&template, key);
    CertReqMsg {
        cert_req: CertRequest {
            cert_req_id: CERT_REQ_ID,
            cert_template: template,
            controls,
        },
        popo: Some(ProofOfPossession::Signature(popo)),
        reg_info: None,
    }
}

/// ir, cr or kur with one entry for `subject` and a valid signature proof.
pub fn cert_request_message(body_type: BodyType, subject: &str, key: &PKey<Private>) -> PkiMessage {
    let template = CertTemplate {
        subject: Some(Name::parse_dn(subject).unwrap()),
        public_key: Some(spki_der(key)),
        ..Default::default()
    };
    let entries = vec![signed_entry(template, key, None)];
    let body = match body_type {
        BodyType::Ir => PkiBody::Ir(entries),
        BodyType::Cr => PkiBody::Cr(entries),
        BodyType::Kur => PkiBody::Kur(entries),
        other => panic!("{} is not a certification request", other.name()),
    };
    message(body)
}

/// kur for `key` replacing the certificate with serial `old_serial`.
pub fn kur_message(subject: &str, key: &PKey<Private>, old_serial: &SerialNumber) -> PkiMessage {
    let template = CertTemplate {
        subject: Some(Name::parse_dn(subject).unwrap()),
        public_key: Some(spki_der(key)),
        ..Default::default()
    };
    let control = AttributeTypeAndValue {
        oid: oid::REG_CTRL_OLD_CERT_ID.to_string(),
        value: cert_id_der(&Name::empty(), old_serial),
    };
    message(PkiBody::Kur(vec![signed_entry(template, key, Some(vec![control]))]))
}

/// `CertId` with a directoryName issuer.
pub fn cert_id_der(issuer: &Name, serial: &SerialNumber) -> Vec<u8> {
    yasna::construct_der(|writer| {
        writer.write_sequence(|seq| {
            seq.next()
                .write_tagged(Tag::context(4), |w| w.write_der(issuer.as_der()));
            seq.next().write_bigint_bytes(serial.as_bytes(), true);
        })
    })
}

pub fn context() -> ExchangeContext {
    ExchangeContext::new(
        AuthorityRef("test-ca".to_string()),
        ProfileRef("default".to_string()),
    )
    .with_poll_policy(PollPolicy {
        timeout: Duration::from_secs(2),
        interval: Duration::from_millis(5),
    })
}

/// Status info of an `error` response.
pub fn error_info(response: &PkiMessage) -> &PkiStatusInfo {
    match &response.body {
        PkiBody::Error(content) => content.pki_status_info.as_ref().unwrap(),
        other => panic!("expected error body, got {:?}", other),
    }
}

pub fn crl_reason(code: i64) -> Extension {
    Extension {
        extn_id: oid::CRL_REASON.to_string(),
        critical: false,
        extn_value: yasna::construct_der(|w| w.write_enum(code)),
    }
}

pub fn revocation_entry(serial: &SerialNumber, reason: Option<i64>) -> RevDetails {
    RevDetails {
        cert_details: CertTemplate {
            serial_number: Some(serial.clone()),
            ..Default::default()
        },
        crl_entry_details: reason.map(|code| vec![crl_reason(code)]),
    }
}

/// Self-signed certificate for `key` named `cn`, as a backend record.
pub fn certificate_record(key: &PKey<Private>, cn: &str, state: CertificateState) -> CertificateRecord {
    let name = Name::parse_dn(cn).unwrap().to_x509_name().unwrap();
    let mut serial = BigNum::new().unwrap();
    serial.rand(127, MsbOption::MAYBE_ZERO, false).unwrap();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&Asn1Integer::from_bn(&serial).unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(30).unwrap())
        .unwrap();
    builder.sign(key, MessageDigest::sha256()).unwrap();

    let mut record = CertificateRecord::from_x509(&builder.build()).unwrap();
    record.state = state;
    record
}

/// In-memory backend whose transaction states are scripted by the test.
///
/// `get_entity` walks the scripted states in order and keeps returning the
/// last one; with no script it reports the transaction as unknown. Every
/// submission that succeeds is recorded in [`calls`](Self::calls).
#[derive(Default)]
pub struct ScriptedBackend {
    states: Mutex<VecDeque<Option<TransactionState>>>,
    issued: Mutex<Option<CertificateId>>,
    certificates: Mutex<Vec<CertificateRecord>>,
    chain: Mutex<Vec<CertificateRecord>>,
    issuances: Mutex<Vec<IssuanceRequest>>,
    calls: Mutex<Vec<String>>,
    invocations: AtomicUsize,
    entity_reads: AtomicUsize,
    fail_submissions: AtomicBool,
    fail_entity_reads: AtomicBool,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_states(&self, states: &[Option<TransactionState>]) {
        *self.states.lock().unwrap() = states.iter().copied().collect();
    }

    pub fn add_certificate(&self, record: CertificateRecord) {
        self.certificates.lock().unwrap().push(record);
    }

    /// Certificate reported by every transaction entity.
    pub fn set_issued(&self, id: CertificateId) {
        *self.issued.lock().unwrap() = Some(id);
    }

    pub fn set_chain(&self, chain: Vec<CertificateRecord>) {
        *self.chain.lock().unwrap() = chain;
    }

    pub fn fail_submissions(&self) {
        self.fail_submissions.store(true, Ordering::SeqCst);
    }

    pub fn fail_entity_reads(&self) {
        self.fail_entity_reads.store(true, Ordering::SeqCst);
    }

    pub fn entity_reads(&self) -> usize {
        self.entity_reads.load(Ordering::SeqCst)
    }

    /// Number of trait methods invoked, reads included.
    pub fn call_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_issuance(&self) -> Option<IssuanceRequest> {
        self.issuances.lock().unwrap().last().cloned()
    }

    fn invoked(&self) {
        self.invocations.fetch_add(1, Ordering::SeqCst);
    }

    fn submit(&self, call: String, request: Option<&IssuanceRequest>) -> anyhow::Result<()> {
        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(anyhow!("scripted backend refused {}", call));
        }
        if let Some(request) = request {
            self.issuances.lock().unwrap().push(request.clone());
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

impl IssuanceBackend for ScriptedBackend {
    fn issue(
        &self,
        _authority: &AuthorityRef,
        _profile: &ProfileRef,
        request: &IssuanceRequest,
    ) -> anyhow::Result<TrackingRef> {
        self.invoked();
        self.submit("issue".to_string(), Some(request))?;
        Ok(TrackingRef::generate())
    }

    fn rekey(
        &self,
        _authority: &AuthorityRef,
        _profile: &ProfileRef,
        certificate: &CertificateId,
        request: &IssuanceRequest,
    ) -> anyhow::Result<TrackingRef> {
        self.invoked();
        self.submit(format!("rekey {}", certificate), Some(request))?;
        Ok(TrackingRef::generate())
    }

    fn revoke(
        &self,
        _authority: &AuthorityRef,
        _profile: &ProfileRef,
        certificate: &CertificateId,
        reason: RevocationReason,
    ) -> anyhow::Result<()> {
        self.invoked();
        self.submit(format!("revoke {}", certificate), None)?;
        if let Some(record) = self
            .certificates
            .lock()
            .unwrap()
            .iter_mut()
            .find(|record| &record.id == certificate)
        {
            record.state = CertificateState::Revoked;
            record.revocation_reason = Some(reason);
        }
        Ok(())
    }

    fn get_entity(&self, tracking: &TrackingRef) -> anyhow::Result<Option<TransactionEntity>> {
        self.invoked();
        self.entity_reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_entity_reads.load(Ordering::SeqCst) {
            return Err(anyhow!("scripted entity read failure"));
        }
        let state = {
            let mut states = self.states.lock().unwrap();
            if states.len() > 1 {
                states.pop_front().flatten()
            } else {
                states.front().copied().flatten()
            }
        };
        Ok(state.map(|state| TransactionEntity {
            tracking: tracking.clone(),
            state,
            certificate: self.issued.lock().unwrap().clone(),
            failure: (state == TransactionState::Failed).then(|| "scripted failure".to_string()),
        }))
    }

    fn lookup_by_serial(&self, serial: &SerialNumber) -> anyhow::Result<Option<CertificateRecord>> {
        self.invoked();
        Ok(self
            .certificates
            .lock()
            .unwrap()
            .iter()
            .find(|record| &record.serial == serial)
            .cloned())
    }

    fn get_certificate(&self, id: &CertificateId) -> anyhow::Result<Option<CertificateRecord>> {
        self.invoked();
        Ok(self
            .certificates
            .lock()
            .unwrap()
            .iter()
            .find(|record| &record.id == id)
            .cloned())
    }

    fn get_ca_chain(&self, _id: &CertificateId) -> anyhow::Result<Vec<CertificateRecord>> {
        self.invoked();
        Ok(self.chain.lock().unwrap().clone())
    }
}
