//! Secret loading from the runtime `.env` file.
//!
//! Holds the gateway capability token and the redaction hash key. Values
//! never appear in `Debug` output and are fed to the redactor so they cannot
//! leak into sanitized records.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing::debug;

/// Runtime credentials loaded from the `.env` file.
#[derive(Clone, Default)]
pub struct Credentials {
    vars: BTreeMap<String, String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("keys", &self.vars.keys().collect::<Vec<_>>())
            .field("values", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    /// Build credentials from a key-value map.
    pub fn from_map(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    /// Returns a credential value for a key, if present and non-empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Returns a required credential or an error when missing.
    ///
    /// # Errors
    ///
    /// Returns an error when the key does not exist in loaded credentials.
    pub fn require(&self, key: &str) -> anyhow::Result<String> {
        self.get(key)
            .map(str::to_owned)
            .ok_or_else(|| anyhow::anyhow!("missing required credential: {key}"))
    }

    /// Returns all non-empty credential values for redaction purposes.
    pub fn known_secrets(&self) -> Vec<String> {
        self.vars
            .values()
            .filter(|value| !value.trim().is_empty())
            .cloned()
            .collect()
    }

    /// Fill keys absent from the file using `env`, for the named keys only.
    pub fn with_fallback(mut self, keys: &[&str], env: impl Fn(&str) -> Option<String>) -> Self {
        for key in keys {
            if self.get(key).is_none() {
                if let Some(value) = env(key) {
                    debug!(key, "credential taken from process environment");
                    self.vars.insert((*key).to_owned(), value);
                }
            }
        }
        self
    }
}

/// Load credentials from a specific `.env` path.
///
/// # Errors
///
/// Returns an error if the file does not exist, permissions are too broad,
/// or parsing fails.
pub fn load_credentials(path: &Path) -> anyhow::Result<Credentials> {
    if !path.exists() {
        return Err(anyhow::anyhow!(
            "credentials file does not exist: {}",
            path.display()
        ));
    }

    validate_private_permissions(path)?;

    let mut vars = BTreeMap::new();
    let iter = dotenvy::from_path_iter(path)
        .with_context(|| format!("failed to read credentials at {}", path.display()))?;

    for item in iter {
        let (key, value) = item.with_context(|| {
            format!(
                "failed to parse key-value entry in credentials file {}",
                path.display()
            )
        })?;
        vars.insert(key, value);
    }

    Ok(Credentials { vars })
}

/// Load credentials if the file exists, otherwise start empty.
///
/// # Errors
///
/// Returns an error if the file exists but is invalid.
pub fn load_optional_credentials(path: &Path) -> anyhow::Result<Credentials> {
    if path.exists() {
        load_credentials(path)
    } else {
        debug!(path = %path.display(), "no credentials file, relying on environment");
        Ok(Credentials::default())
    }
}

/// Set private (0600) permissions on a file when supported.
///
/// # Errors
///
/// Returns an error if permissions cannot be updated.
pub fn enforce_private_file_permissions(path: &Path) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

/// Reject files readable by group or others.
///
/// # Errors
///
/// Returns an error if metadata cannot be read or the mode is broader than 0600.
#[cfg(unix)]
pub fn validate_private_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path)
        .with_context(|| format!("failed to inspect secret file {}", path.display()))?;
    let mode = metadata.permissions().mode() & 0o777;

    if mode & 0o077 != 0 {
        return Err(anyhow::anyhow!(
            "secret file {} must be 0600, found {:o}",
            path.display(),
            mode
        ));
    }

    Ok(())
}

/// Reject files readable by group or others. No-op off Unix.
///
/// # Errors
///
/// Returns an error if the file cannot be inspected.
#[cfg(not(unix))]
pub fn validate_private_permissions(path: &Path) -> anyhow::Result<()> {
    fs::metadata(path)
        .with_context(|| format!("failed to inspect secret file {}", path.display()))?;
    Ok(())
}
