//! Shared fixtures: a temp workspace with keys, redactor, and token.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use redline::crypto::{self, CustodyError, DataKey, KeyCustodian, LocalCustodian};
use redline::gateway::{CapabilityToken, Gateway};
use redline::ingest::Preprocessor;
use redline::plan::PlanGenerator;
use redline::redaction::{FieldHasher, RedactionRuleset, Redactor};
use serde_json::{json, Value};
use tempfile::TempDir;

pub const HASH_KEY: &[u8] = b"fixture-hash-key-0123456789";
pub const TOKEN: &str = "fixture-capability-token";
pub const SOURCE_IP: &str = "192.168.100.55";

/// Temp directory tree plus a fresh keypair.
pub struct Workspace {
    pub dir: TempDir,
    pub inbox: PathBuf,
    pub sanitized: PathBuf,
    pub plans: PathBuf,
    pub quarantine: PathBuf,
    pub custodian: Arc<LocalCustodian>,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().to_path_buf();
        for sub in ["inbox", "sanitized", "plans", "quarantine"] {
            std::fs::create_dir_all(root.join(sub)).expect("mkdir");
        }
        Self {
            inbox: root.join("inbox"),
            sanitized: root.join("sanitized"),
            plans: root.join("plans"),
            quarantine: root.join("quarantine"),
            custodian: Arc::new(LocalCustodian::generate()),
            dir,
        }
    }

    pub fn redactor(&self) -> Arc<Redactor> {
        Arc::new(Redactor::new(
            RedactionRuleset::builtin().expect("builtin ruleset"),
            FieldHasher::new(HASH_KEY).expect("hash key"),
            24,
        ))
    }

    pub fn preprocessor(&self) -> Preprocessor {
        Preprocessor::new(self.custodian.clone(), self.redactor(), &self.sanitized)
    }

    pub fn planner(&self) -> PlanGenerator {
        let public = LocalCustodian::public_only(self.custodian.public_key());
        PlanGenerator::new(Arc::new(public), &self.plans)
    }

    pub fn gateway_with(&self, custodian: Arc<dyn KeyCustodian>) -> Gateway {
        Gateway::new(
            custodian,
            &self.plans,
            CapabilityToken::new(TOKEN).expect("token"),
        )
    }

    pub fn gateway(&self) -> Gateway {
        self.gateway_with(self.custodian.clone())
    }

    /// Encrypt a finding to its envelope JSON.
    pub async fn seal(&self, finding: &Value) -> Vec<u8> {
        let plaintext = serde_json::to_vec(finding).expect("encode finding");
        crypto::encrypt(&plaintext, self.custodian.as_ref())
            .await
            .expect("encrypt")
            .to_json()
            .expect("envelope json")
    }

    /// Seal a finding into `inbox/<name>.enc`.
    pub async fn drop_in_inbox(&self, name: &str, finding: &Value) -> PathBuf {
        let path = self.inbox.join(format!("{name}.enc"));
        std::fs::write(&path, self.seal(finding).await).expect("write envelope");
        path
    }

    /// Ingest and plan a finding, returning its scan id.
    pub async fn ingest_and_plan(&self, finding: &Value) -> String {
        let record = self
            .preprocessor()
            .process_bytes(&self.seal(finding).await)
            .await
            .expect("ingest");
        self.planner().generate(&record).await.expect("plan");
        record.scan_id
    }
}

/// A finding carrying the usual sensitive fields.
pub fn finding(scan_id: &str, severities: &[&str]) -> Value {
    let findings: Vec<Value> = severities
        .iter()
        .enumerate()
        .map(|(i, severity)| {
            json!({
                "eventId": format!("evt-{i}"),
                "severity": severity,
                "ip": SOURCE_IP,
                "user": "svc-backup",
                "processPath": "/usr/local/bin/updater --from 192.168.100.55",
                "rawPayload": "POST /upload HTTP/1.1 Host: 192.168.100.55 X-Trace: abc"
            })
        })
        .collect();
    json!({ "scanId": scan_id, "host": "edge-02", "findings": findings })
}

/// Delegating custodian that counts unwrap calls.
pub struct CountingCustodian {
    inner: Arc<LocalCustodian>,
    unwraps: AtomicUsize,
}

impl CountingCustodian {
    pub fn new(inner: Arc<LocalCustodian>) -> Self {
        Self {
            inner,
            unwraps: AtomicUsize::new(0),
        }
    }

    pub fn unwraps(&self) -> usize {
        self.unwraps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyCustodian for CountingCustodian {
    async fn wrap(&self, data_key: &DataKey) -> Result<Vec<u8>, CustodyError> {
        self.inner.wrap(data_key).await
    }

    async fn unwrap(&self, wrapped: &[u8]) -> Result<DataKey, CustodyError> {
        self.unwraps.fetch_add(1, Ordering::SeqCst);
        self.inner.unwrap(wrapped).await
    }
}

/// Custodian whose unwrap panics, standing in for a crashing KMS client.
pub struct PanickingCustodian;

#[async_trait]
impl KeyCustodian for PanickingCustodian {
    async fn wrap(&self, _data_key: &DataKey) -> Result<Vec<u8>, CustodyError> {
        Err(CustodyError::Unavailable("wrap not supported".to_owned()))
    }

    async fn unwrap(&self, _wrapped: &[u8]) -> Result<DataKey, CustodyError> {
        panic!("custodian crashed");
    }
}
