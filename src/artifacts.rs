//! Artifact naming and crash-safe persistence.
//!
//! Every output is keyed by scan id and written through [`write_atomic`],
//! so readers see either the previous file or the complete new one. Two
//! runs racing on the same scan id resolve as last writer wins.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

/// Extension of encrypted findings waiting in the inbox.
pub const FINDING_EXTENSION: &str = "enc";

/// Suffix of encrypted plan artifacts.
pub const PLAN_SUFFIX: &str = ".plan.enc";

/// Longest accepted scan id.
pub const MAX_SCAN_ID_LEN: usize = 128;

/// Whether `scan_id` is safe to use as a file name stem.
pub fn is_valid_scan_id(scan_id: &str) -> bool {
    !scan_id.is_empty()
        && scan_id.len() <= MAX_SCAN_ID_LEN
        && scan_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Path of the sanitized record for a scan.
pub fn sanitized_path(dir: &Path, scan_id: &str) -> PathBuf {
    dir.join(format!("{scan_id}.json"))
}

/// Path of the encrypted plan for a scan.
pub fn plan_path(dir: &Path, scan_id: &str) -> PathBuf {
    dir.join(format!("{scan_id}{PLAN_SUFFIX}"))
}

/// Write `bytes` to `path` via a temp file in the same directory and a rename.
///
/// # Errors
///
/// Returns an error if the directory cannot be created, the temp file cannot
/// be written, or the rename fails.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("{} has no parent directory", path.display()))?;
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("{} has no file name", path.display()))?;
    // Unique per writer so concurrent runs never share a temp file.
    let tmp_path = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    if let Err(e) = write_and_sync(&tmp_path, bytes).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e).with_context(|| format!("failed to rename into {}", path.display()));
    }

    debug!(path = %path.display(), "artifact written");
    Ok(())
}

async fn write_and_sync(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    file.sync_all()
        .await
        .with_context(|| format!("failed to sync {}", path.display()))?;
    Ok(())
}

/// Reason note written next to a quarantined artifact.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QuarantineNote<'a> {
    class: &'a str,
    message: &'a str,
    quarantined_at: String,
}

/// Move a failing artifact into `quarantine_dir` with a reason note.
///
/// `message` must already be free of plaintext.
///
/// # Errors
///
/// Returns an error if the artifact cannot be moved or the note written.
pub async fn quarantine(
    artifact: &Path,
    quarantine_dir: &Path,
    class: &str,
    message: &str,
) -> anyhow::Result<PathBuf> {
    tokio::fs::create_dir_all(quarantine_dir)
        .await
        .with_context(|| format!("failed to create {}", quarantine_dir.display()))?;

    let file_name = artifact
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("{} has no file name", artifact.display()))?;
    let target = quarantine_dir.join(file_name);
    tokio::fs::rename(artifact, &target)
        .await
        .with_context(|| format!("failed to quarantine {}", artifact.display()))?;

    let note = QuarantineNote {
        class,
        message,
        quarantined_at: Utc::now().to_rfc3339(),
    };
    let mut note_path = target.clone().into_os_string();
    note_path.push(".reason.json");
    let body = serde_json::to_vec_pretty(&note).context("failed to serialize quarantine note")?;
    write_atomic(Path::new(&note_path), &body).await?;

    warn!(
        artifact = %target.display(),
        class,
        "artifact quarantined"
    );
    Ok(target)
}

/// List files in `dir` whose names end with `suffix`, sorted.
///
/// A missing directory yields an empty list.
///
/// # Errors
///
/// Returns an error if the directory exists but cannot be read.
pub async fn list_with_suffix(dir: &Path, suffix: &str) -> anyhow::Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", dir.display())),
    };

    let mut paths = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed to read {}", dir.display()))?
    {
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(suffix) && !n.starts_with('.'));
        if matches && entry.file_type().await.is_ok_and(|t| t.is_file()) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
