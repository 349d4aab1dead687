//! Configuration loading.
//!
//! Reads `redline.toml` from the runtime root. Every section has defaults,
//! so a missing or empty file is valid.
//!
//! Precedence: env vars > config file > defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Environment variable naming the runtime root directory.
pub const ROOT_ENV: &str = "REDLINE_ROOT";

/// Config file name inside the runtime root.
pub const CONFIG_FILE: &str = "redline.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Artifact directory layout.
    pub paths: PathsConfig,
    /// Redaction settings.
    pub redaction: RedactionConfig,
    /// Decryption gateway settings.
    pub gateway: GatewayConfig,
    /// Keyed hashing settings.
    pub hashing: HashingConfig,
}

/// Directory layout. Relative entries resolve against `root`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Runtime root. Empty means `~/.redline`.
    pub root: Option<PathBuf>,
    /// Encrypted findings awaiting ingestion.
    pub inbox: PathBuf,
    /// Sanitized records, one per scan.
    pub sanitized: PathBuf,
    /// Encrypted plans, one per scan.
    pub plans: PathBuf,
    /// Artifacts set aside after a non-retryable failure.
    pub quarantine: PathBuf,
    /// Custodian key files.
    pub keys: PathBuf,
    /// Rotated JSON logs.
    pub logs: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: None,
            inbox: PathBuf::from("inbox"),
            sanitized: PathBuf::from("sanitized"),
            plans: PathBuf::from("plans"),
            quarantine: PathBuf::from("quarantine"),
            keys: PathBuf::from("keys"),
            logs: PathBuf::from("logs"),
        }
    }
}

/// Redaction engine settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedactionConfig {
    /// Ruleset JSON file. `None` uses the built-in ruleset.
    pub ruleset: Option<PathBuf>,
    /// Upper bound on plaintext kept by truncate-and-hash fields.
    pub excerpt_chars: usize,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            ruleset: None,
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

/// Gateway settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Listen address for `serve`.
    pub bind: SocketAddr,
    /// Credential key holding the shared capability token.
    pub token_env: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            token_env: "REDLINE_GATEWAY_TOKEN".to_owned(),
        }
    }
}

/// Keyed hashing settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HashingConfig {
    /// Credential key holding the HMAC key for field hashing.
    pub key_env: String,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            key_env: "REDLINE_HASH_KEY".to_owned(),
        }
    }
}

fn default_excerpt_chars() -> usize {
    24
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8088))
}

/// Fully resolved runtime paths.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    /// Runtime root.
    pub root: PathBuf,
    /// `redline.toml`.
    pub config_toml: PathBuf,
    /// `.env` with the token and hash key.
    pub env_file: PathBuf,
    /// Encrypted findings awaiting ingestion.
    pub inbox: PathBuf,
    /// Sanitized records.
    pub sanitized: PathBuf,
    /// Encrypted plans.
    pub plans: PathBuf,
    /// Quarantined artifacts.
    pub quarantine: PathBuf,
    /// Custodian key files.
    pub keys: PathBuf,
    /// Log directory.
    pub logs: PathBuf,
}

impl RuntimePaths {
    /// Create every artifact directory.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    pub fn ensure_dirs(&self) -> anyhow::Result<()> {
        for dir in [
            &self.root,
            &self.inbox,
            &self.sanitized,
            &self.plans,
            &self.quarantine,
            &self.keys,
            &self.logs,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

impl Config {
    /// Apply environment overrides through a resolver.
    ///
    /// Takes a resolver function so tests never mutate the process env.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("REDLINE_GATEWAY_BIND") {
            match v.parse() {
                Ok(addr) => self.gateway.bind = addr,
                Err(_) => tracing::warn!(
                    var = "REDLINE_GATEWAY_BIND",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("REDLINE_RULESET") {
            self.redaction.ruleset = Some(PathBuf::from(v));
        }
    }

    /// Resolve all artifact directories against `root`.
    pub fn runtime_paths(&self, root: &Path) -> RuntimePaths {
        let root = self.paths.root.clone().unwrap_or_else(|| root.to_owned());
        let resolve = |p: &Path| {
            if p.is_absolute() {
                p.to_owned()
            } else {
                root.join(p)
            }
        };
        RuntimePaths {
            config_toml: root.join(CONFIG_FILE),
            env_file: root.join(".env"),
            inbox: resolve(&self.paths.inbox),
            sanitized: resolve(&self.paths.sanitized),
            plans: resolve(&self.paths.plans),
            quarantine: resolve(&self.paths.quarantine),
            keys: resolve(&self.paths.keys),
            logs: resolve(&self.paths.logs),
            root,
        }
    }

    /// Resolve the configured ruleset path against `root`.
    pub fn ruleset_path(&self, root: &Path) -> Option<PathBuf> {
        self.redaction.ruleset.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                root.join(p)
            }
        })
    }
}

/// Parse a config file. A missing file yields defaults.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config_file(path: &Path) -> anyhow::Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            tracing::debug!(path = %path.display(), "loading config from file");
            toml::from_str(&contents)
                .with_context(|| format!("failed to parse config at {}", path.display()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(anyhow::anyhow!(
            "failed to read config at {}: {e}",
            path.display()
        )),
    }
}

/// Resolve the runtime root: `$REDLINE_ROOT`, else `~/.redline`.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn root_dir() -> anyhow::Result<PathBuf> {
    root_dir_with(|key| std::env::var(key).ok())
}

/// Resolve the runtime root using a custom env resolver.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn root_dir_with(env: impl Fn(&str) -> Option<String>) -> anyhow::Result<PathBuf> {
    if let Some(root) = env(ROOT_ENV) {
        return Ok(PathBuf::from(root));
    }
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".redline"))
}
