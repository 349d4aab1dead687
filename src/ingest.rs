//! Ingest preprocessor: encrypted finding in, sanitized record out.
//!
//! Each artifact is handled on its own. A cryptographic or schema failure
//! will not fix itself on retry, so the artifact is quarantined and the
//! rest of the batch carries on.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::artifacts::{self, FINDING_EXTENSION};
use crate::crypto::{self, EnvelopeError, EnvelopeMessage, KeyCustodian};
use crate::record::{SanitizedRecord, ScanReport};
use crate::redaction::{RedactionError, Redactor};

/// Per-artifact ingestion failures.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Envelope could not be opened: wrong key, tampering, or corruption.
    #[error("decryption failed: {0}")]
    DecryptionFailed(#[source] EnvelopeError),

    /// Decrypted payload does not match the finding schema.
    #[error("malformed finding: {0}")]
    MalformedFinding(String),

    /// Redaction rejected the record.
    #[error(transparent)]
    Redaction(#[from] RedactionError),

    /// Reading the artifact or writing the record failed.
    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),
}

impl IngestError {
    /// Error class name used in logs and quarantine notes.
    pub fn class(&self) -> &'static str {
        match self {
            Self::DecryptionFailed(_) => "DecryptionFailed",
            Self::MalformedFinding(_) => "MalformedFindingError",
            Self::Redaction(_) => "RedactionError",
            Self::Storage(_) => "StorageError",
        }
    }

    /// Whether the artifact should be set aside instead of retried.
    pub fn should_quarantine(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}

/// Outcome of one batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Scan ids sanitized successfully.
    pub succeeded: Vec<String>,
    /// Artifacts moved to quarantine.
    pub quarantined: Vec<PathBuf>,
    /// Artifacts left in place after a transient failure.
    pub failed: Vec<PathBuf>,
}

/// Decrypts, validates, redacts, and persists findings.
#[derive(Clone)]
pub struct Preprocessor {
    custodian: Arc<dyn KeyCustodian>,
    redactor: Arc<Redactor>,
    sanitized_dir: PathBuf,
}

impl Preprocessor {
    /// Create a preprocessor writing into `sanitized_dir`.
    pub fn new(
        custodian: Arc<dyn KeyCustodian>,
        redactor: Arc<Redactor>,
        sanitized_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            custodian,
            redactor,
            sanitized_dir: sanitized_dir.into(),
        }
    }

    /// Decrypt and redact an envelope without persisting anything.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] for decryption, schema, or redaction failures.
    pub async fn sanitize(&self, envelope_json: &[u8]) -> Result<SanitizedRecord, IngestError> {
        let envelope =
            EnvelopeMessage::from_json(envelope_json).map_err(IngestError::DecryptionFailed)?;
        let plaintext = crypto::decrypt(&envelope, self.custodian.as_ref())
            .await
            .map_err(IngestError::DecryptionFailed)?;

        let report = ScanReport::from_slice(&plaintext)
            .map_err(|e| IngestError::MalformedFinding(e.to_string()))?;
        drop(plaintext);

        if !artifacts::is_valid_scan_id(&report.scan_id) {
            return Err(IngestError::MalformedFinding(
                "$.scanId: not usable as an artifact name".to_owned(),
            ));
        }

        let (scan_id, body) = report.into_parts();
        let redacted = self.redactor.redact_value(Value::Object(body))?;
        SanitizedRecord::assemble(scan_id, redacted, self.redactor.ruleset().digest())
            .map_err(|e| IngestError::MalformedFinding(e.to_string()))
    }

    /// Sanitize an envelope and write `<scanId>.json` atomically.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] on any failure; nothing is written in that case.
    pub async fn process_bytes(&self, envelope_json: &[u8]) -> Result<SanitizedRecord, IngestError> {
        let record = self.sanitize(envelope_json).await?;
        let body = record
            .to_json()
            .map_err(|e| IngestError::Storage(anyhow::Error::new(e)))?;
        let path = artifacts::sanitized_path(&self.sanitized_dir, &record.scan_id);
        artifacts::write_atomic(&path, &body)
            .await
            .map_err(IngestError::Storage)?;

        info!(
            scan_id = %record.scan_id,
            findings = record.findings.len(),
            critical = record.critical_count(),
            "finding sanitized"
        );
        Ok(record)
    }

    /// Process one artifact file.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] on any failure.
    pub async fn process(&self, artifact: &Path) -> Result<SanitizedRecord, IngestError> {
        let bytes = tokio::fs::read(artifact).await.map_err(|e| {
            IngestError::Storage(anyhow::anyhow!("failed to read {}: {e}", artifact.display()))
        })?;
        debug!(artifact = %artifact.display(), "processing artifact");
        self.process_bytes(&bytes).await
    }

    /// Process the given artifacts concurrently, quarantining failures.
    ///
    /// One artifact's failure never aborts its siblings.
    pub async fn process_artifacts(&self, paths: Vec<PathBuf>, quarantine_dir: &Path) -> BatchReport {
        let tasks: Vec<_> = paths
            .into_iter()
            .map(|path| {
                let worker = self.clone();
                let task_path = path.clone();
                let handle = tokio::spawn(async move { worker.process(&task_path).await });
                (path, handle)
            })
            .collect();

        let mut report = BatchReport::default();
        for (path, handle) in tasks {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!(artifact = %path.display(), error = %e, "ingest task panicked");
                    report.failed.push(path);
                    continue;
                }
            };
            match result {
                Ok(record) => report.succeeded.push(record.scan_id),
                Err(e) if e.should_quarantine() => {
                    warn!(artifact = %path.display(), class = e.class(), error = %e, "ingest failed");
                    match artifacts::quarantine(&path, quarantine_dir, e.class(), &e.to_string()).await {
                        Ok(target) => report.quarantined.push(target),
                        Err(qe) => {
                            error!(artifact = %path.display(), error = %qe, "quarantine failed");
                            report.failed.push(path);
                        }
                    }
                }
                Err(e) => {
                    warn!(artifact = %path.display(), class = e.class(), error = %e, "ingest failed, left for retry");
                    report.failed.push(path);
                }
            }
        }
        report.succeeded.sort();
        report
    }

    /// Process every `*.enc` artifact in `inbox`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the inbox cannot be listed.
    pub async fn process_batch(&self, inbox: &Path, quarantine_dir: &Path) -> anyhow::Result<BatchReport> {
        let suffix = format!(".{FINDING_EXTENSION}");
        let paths = artifacts::list_with_suffix(inbox, &suffix).await?;
        info!(inbox = %inbox.display(), artifacts = paths.len(), "ingest batch started");
        let report = self.process_artifacts(paths, quarantine_dir).await;
        info!(
            succeeded = report.succeeded.len(),
            quarantined = report.quarantined.len(),
            failed = report.failed.len(),
            "ingest batch finished"
        );
        Ok(report)
    }
}
