//! Remediation plans derived from sanitized records.
//!
//! Derivation sits behind [`PlanModel`]; [`RuleTable`] is the default.
//! Plans only ever touch disk encrypted, one artifact per scan id.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::artifacts;
use crate::crypto::{self, EnvelopeError, KeyCustodian};
use crate::record::{SanitizedRecord, Severity};

/// Step priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    /// Do now.
    High,
    /// Do soon.
    Medium,
    /// Do eventually.
    Low,
}

/// One remediation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    /// What to do.
    pub step: String,
    /// How urgently.
    pub priority: Priority,
}

impl PlanStep {
    fn new(step: &str, priority: Priority) -> Self {
        Self {
            step: step.to_owned(),
            priority,
        }
    }
}

/// A remediation plan for one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// Scan the plan was derived from.
    pub scan_id: String,
    /// Generation time.
    pub generated_at: DateTime<Utc>,
    /// Ordered steps.
    pub steps: Vec<PlanStep>,
    /// Free-form notes. Never contains record content.
    pub notes: String,
}

/// Turns a sanitized record into remediation steps.
///
/// Implementations see only redacted data and must be deterministic for a
/// given record.
pub trait PlanModel: Send + Sync {
    /// Short identifier recorded in plan notes.
    fn name(&self) -> &str;

    /// Derive steps for `record`.
    fn derive(&self, record: &SanitizedRecord) -> Vec<PlanStep>;
}

/// Fixed severity rule table.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleTable;

impl PlanModel for RuleTable {
    fn name(&self) -> &str {
        "rule-table/v1"
    }

    fn derive(&self, record: &SanitizedRecord) -> Vec<PlanStep> {
        if record.findings.iter().any(|f| f.severity == Severity::Critical) {
            vec![
                PlanStep::new("Isolate host", Priority::High),
                PlanStep::new("Collect forensic artifacts", Priority::High),
                PlanStep::new("Hash & submit suspicious binaries", Priority::Medium),
            ]
        } else {
            vec![PlanStep::new("Investigate and monitor", Priority::Medium)]
        }
    }
}

/// Plan generation failures.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// The sanitized record could not be read or parsed.
    #[error("invalid sanitized record {path}: {reason}")]
    InvalidRecord {
        /// Record file.
        path: PathBuf,
        /// Parse or read failure.
        reason: String,
    },

    /// The record's scan id cannot name an artifact.
    #[error("scan id is not usable as an artifact name")]
    InvalidScanId,

    /// Encrypting the plan failed.
    #[error("plan encryption failed: {0}")]
    Encryption(#[from] EnvelopeError),

    /// Writing the plan artifact failed.
    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),
}

/// Outcome of a plan generation run.
#[derive(Debug, Default)]
pub struct PlanReport {
    /// Scan ids with a fresh plan.
    pub generated: Vec<String>,
    /// Records that could not be planned, with the error message.
    pub failed: Vec<(PathBuf, String)>,
}

/// Derives, encrypts, and persists plans.
#[derive(Clone)]
pub struct PlanGenerator {
    custodian: Arc<dyn KeyCustodian>,
    model: Arc<dyn PlanModel>,
    plans_dir: PathBuf,
}

impl PlanGenerator {
    /// Create a generator using the default [`RuleTable`].
    pub fn new(custodian: Arc<dyn KeyCustodian>, plans_dir: impl Into<PathBuf>) -> Self {
        Self::with_model(custodian, Arc::new(RuleTable), plans_dir)
    }

    /// Create a generator with a custom model.
    pub fn with_model(
        custodian: Arc<dyn KeyCustodian>,
        model: Arc<dyn PlanModel>,
        plans_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            custodian,
            model,
            plans_dir: plans_dir.into(),
        }
    }

    /// Build the plaintext plan for one record.
    pub fn build(&self, record: &SanitizedRecord) -> Plan {
        let steps = self.model.derive(record);
        Plan {
            scan_id: record.scan_id.clone(),
            generated_at: Utc::now(),
            steps,
            notes: format!(
                "Derived by {} from {} finding(s), {} critical.",
                self.model.name(),
                record.findings.len(),
                record.critical_count()
            ),
        }
    }

    /// Build, encrypt, and write `<scanId>.plan.enc`, replacing any previous plan.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError`] if the scan id is unusable, encryption fails,
    /// or the artifact cannot be written.
    pub async fn generate(&self, record: &SanitizedRecord) -> Result<PathBuf, PlanError> {
        if !artifacts::is_valid_scan_id(&record.scan_id) {
            return Err(PlanError::InvalidScanId);
        }
        let plan = self.build(record);
        let plaintext = zeroize::Zeroizing::new(
            serde_json::to_vec(&plan).map_err(|e| PlanError::Storage(e.into()))?,
        );
        let envelope = crypto::encrypt(&plaintext, self.custodian.as_ref()).await?;
        let body = envelope.to_json()?;

        let path = artifacts::plan_path(&self.plans_dir, &record.scan_id);
        artifacts::write_atomic(&path, &body)
            .await
            .map_err(PlanError::Storage)?;

        info!(
            scan_id = %record.scan_id,
            steps = plan.steps.len(),
            model = self.model.name(),
            "plan generated"
        );
        Ok(path)
    }

    /// Generate a plan from a sanitized record file.
    ///
    /// Returns the scan id from inside the record, which names the plan
    /// regardless of the record's file name.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::InvalidRecord`] if the file cannot be read or
    /// parsed, otherwise as [`PlanGenerator::generate`].
    pub async fn generate_from_file(&self, path: &Path) -> Result<String, PlanError> {
        let invalid = |reason: String| PlanError::InvalidRecord {
            path: path.to_path_buf(),
            reason,
        };
        let bytes = tokio::fs::read(path).await.map_err(|e| invalid(e.to_string()))?;
        let record = SanitizedRecord::from_json(&bytes).map_err(|e| invalid(e.to_string()))?;
        self.generate(&record).await?;
        Ok(record.scan_id)
    }

    /// Generate plans for the given record files, isolating failures.
    pub async fn generate_files(&self, paths: Vec<PathBuf>) -> PlanReport {
        let tasks: Vec<_> = paths
            .into_iter()
            .map(|path| {
                let generator = self.clone();
                let task_path = path.clone();
                let handle =
                    tokio::spawn(async move { generator.generate_from_file(&task_path).await });
                (path, handle)
            })
            .collect();

        let mut report = PlanReport::default();
        for (path, handle) in tasks {
            match handle.await {
                Ok(Ok(scan_id)) => report.generated.push(scan_id),
                Ok(Err(e)) => {
                    warn!(record = %path.display(), error = %e, "plan generation failed");
                    report.failed.push((path, e.to_string()));
                }
                Err(e) => {
                    error!(record = %path.display(), error = %e, "plan task panicked");
                    report.failed.push((path, format!("plan task failed: {e}")));
                }
            }
        }
        report.generated.sort();
        report
    }

    /// Generate plans for every record in `sanitized_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the directory cannot be listed.
    pub async fn generate_all(&self, sanitized_dir: &Path) -> anyhow::Result<PlanReport> {
        let paths = artifacts::list_with_suffix(sanitized_dir, ".json").await?;
        let report = self.generate_files(paths).await;
        info!(
            generated = report.generated.len(),
            failed = report.failed.len(),
            "plan run finished"
        );
        Ok(report)
    }
}
