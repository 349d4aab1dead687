//! Wiring: config, credentials, and keys turned into pipeline components.
//!
//! Everything here is fatal on failure. A bad ruleset, hash key, token, or
//! key file stops the run before any artifact is touched.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::info;

use crate::config::{Config, RuntimePaths, CONFIG_FILE};
use crate::credentials::{self, Credentials};
use crate::crypto::custody::{PRIVATE_KEY_FILE, PUBLIC_KEY_FILE};
use crate::crypto::LocalCustodian;
use crate::gateway::{CapabilityToken, Gateway};
use crate::ingest::Preprocessor;
use crate::plan::PlanGenerator;
use crate::redaction::{ruleset, FieldHasher, RedactionRuleset, Redactor};

/// Ruleset file written by [`Runtime::init`].
pub const RULESET_FILE: &str = "ruleset.json";

/// Loaded configuration and secrets for one invocation.
#[derive(Debug, Clone)]
pub struct Runtime {
    /// Effective configuration.
    pub config: Config,
    /// Resolved directories.
    pub paths: RuntimePaths,
    /// Secrets from `.env` and the environment.
    pub credentials: Credentials,
}

/// What [`Runtime::init`] created.
#[derive(Debug, Default)]
pub struct InitReport {
    /// Public key fingerprint of the custodian.
    pub fingerprint: String,
    /// Files written in this call (existing files are left alone).
    pub created: Vec<PathBuf>,
}

impl Runtime {
    /// Load config and credentials rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config or `.env` file is invalid.
    pub fn load(root: &Path) -> anyhow::Result<Self> {
        Self::load_with(root, |key| std::env::var(key).ok())
    }

    /// Load using a custom env resolver.
    ///
    /// # Errors
    ///
    /// Returns an error if the config or `.env` file is invalid.
    pub fn load_with(
        root: &Path,
        env: impl Fn(&str) -> Option<String> + Copy,
    ) -> anyhow::Result<Self> {
        let mut config = crate::config::load_config_file(&root.join(CONFIG_FILE))?;
        config.apply_overrides(env);
        let paths = config.runtime_paths(root);

        let credentials = credentials::load_optional_credentials(&paths.env_file)
            .with_context(|| format!("failed to load {}", paths.env_file.display()))?
            .with_fallback(
                &[
                    config.gateway.token_env.as_str(),
                    config.hashing.key_env.as_str(),
                ],
                env,
            );

        Ok(Self {
            config,
            paths,
            credentials,
        })
    }

    /// Create directories, a keypair, the default ruleset, config, and `.env`.
    ///
    /// Existing files are never overwritten.
    ///
    /// # Errors
    ///
    /// Returns an error if any file cannot be written.
    pub fn init(&self) -> anyhow::Result<InitReport> {
        self.paths.ensure_dirs()?;
        let mut report = InitReport::default();

        let private = self.paths.keys.join(PRIVATE_KEY_FILE);
        let custodian = if private.exists() {
            LocalCustodian::load(&private)?
        } else {
            let custodian = LocalCustodian::generate();
            let written = custodian.save(&self.paths.keys)?;
            report.created.push(written.private);
            report.created.push(written.public);
            custodian
        };
        report.fingerprint = custodian.fingerprint();

        let ruleset_path = self.paths.root.join(RULESET_FILE);
        if !ruleset_path.exists() {
            let body = serde_json::to_vec_pretty(&ruleset::default_spec())
                .context("failed to serialize default ruleset")?;
            std::fs::write(&ruleset_path, body)
                .with_context(|| format!("failed to write {}", ruleset_path.display()))?;
            report.created.push(ruleset_path);
        }

        if !self.paths.config_toml.exists() {
            let body = format!("[redaction]\nruleset = \"{RULESET_FILE}\"\n");
            std::fs::write(&self.paths.config_toml, body)
                .with_context(|| format!("failed to write {}", self.paths.config_toml.display()))?;
            report.created.push(self.paths.config_toml.clone());
        }

        if !self.paths.env_file.exists() {
            let body = format!(
                "{}={}\n{}={}\n",
                self.config.hashing.key_env,
                random_hex(32),
                self.config.gateway.token_env,
                random_hex(32),
            );
            std::fs::write(&self.paths.env_file, body)
                .with_context(|| format!("failed to write {}", self.paths.env_file.display()))?;
            credentials::enforce_private_file_permissions(&self.paths.env_file)?;
            report.created.push(self.paths.env_file.clone());
        }

        info!(
            root = %self.paths.root.display(),
            created = report.created.len(),
            "runtime initialised"
        );
        Ok(report)
    }

    /// The configured ruleset, or the built-in one.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured ruleset is invalid.
    pub fn ruleset(&self) -> anyhow::Result<RedactionRuleset> {
        let ruleset = match self.config.ruleset_path(&self.paths.root) {
            Some(path) => RedactionRuleset::load(&path)?,
            None => RedactionRuleset::builtin()?,
        };
        info!(digest = %ruleset.digest(), rules = ruleset.rules().len(), "redaction ruleset loaded");
        Ok(ruleset)
    }

    /// Build the redactor from the ruleset, hash key, and known secrets.
    ///
    /// # Errors
    ///
    /// Returns an error if the ruleset or hash key is unusable.
    pub fn redactor(&self) -> anyhow::Result<Redactor> {
        let key = self
            .credentials
            .require(&self.config.hashing.key_env)
            .context("redaction needs a hash key")?;
        let hasher = FieldHasher::new(key.as_bytes())?;
        Ok(
            Redactor::new(self.ruleset()?, hasher, self.config.redaction.excerpt_chars)
                .with_known_secrets(self.credentials.known_secrets()),
        )
    }

    /// Full keypair custodian.
    ///
    /// # Errors
    ///
    /// Returns an error if the private key file is missing or invalid.
    pub fn custodian(&self) -> anyhow::Result<Arc<LocalCustodian>> {
        Ok(Arc::new(LocalCustodian::load(
            &self.paths.keys.join(PRIVATE_KEY_FILE),
        )?))
    }

    /// Wrap-only custodian from the public key file.
    ///
    /// # Errors
    ///
    /// Returns an error if the public key file is missing or invalid.
    pub fn public_custodian(&self) -> anyhow::Result<Arc<LocalCustodian>> {
        Ok(Arc::new(LocalCustodian::load_public(
            &self.paths.keys.join(PUBLIC_KEY_FILE),
        )?))
    }

    /// Ingest preprocessor.
    ///
    /// # Errors
    ///
    /// Returns an error if the key or redactor cannot be built.
    pub fn preprocessor(&self) -> anyhow::Result<Preprocessor> {
        Ok(Preprocessor::new(
            self.custodian()?,
            Arc::new(self.redactor()?),
            self.paths.sanitized.clone(),
        ))
    }

    /// Plan generator. Needs only the public key.
    ///
    /// # Errors
    ///
    /// Returns an error if the public key cannot be loaded.
    pub fn plan_generator(&self) -> anyhow::Result<PlanGenerator> {
        Ok(PlanGenerator::new(
            self.public_custodian()?,
            self.paths.plans.clone(),
        ))
    }

    /// Capability token from credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is missing or empty.
    pub fn capability_token(&self) -> anyhow::Result<CapabilityToken> {
        let secret = self
            .credentials
            .require(&self.config.gateway.token_env)
            .context("gateway needs a capability token")?;
        Ok(CapabilityToken::new(&secret)?)
    }

    /// Decryption gateway.
    ///
    /// # Errors
    ///
    /// Returns an error if the key or token is unusable.
    pub fn gateway(&self) -> anyhow::Result<Gateway> {
        Ok(Gateway::new(
            self.custodian()?,
            self.paths.plans.clone(),
            self.capability_token()?,
        ))
    }
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
