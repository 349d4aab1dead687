//! Redaction rulesets: pattern rules plus sensitive field policy.
//!
//! A ruleset is loaded once per run and never changes during it. Every
//! defect is reported as [`RulesetError::Configuration`] before the first
//! record is touched.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::record::STRUCTURAL_KEYS;

/// Ruleset loading failure. Always fatal for the run.
#[derive(Debug, thiserror::Error)]
pub enum RulesetError {
    /// The ruleset is malformed or unsafe to apply.
    #[error("redaction ruleset configuration error: {0}")]
    Configuration(String),
}

/// How a sensitive field's value is transformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMode {
    /// Keep a bounded excerpt plus a short keyed hash.
    TruncateAndHash,
    /// Replace the value entirely with a keyed hash.
    HashAndDrop,
}

/// Keys that keep a short excerpt for analysts (normalised form).
const BUILTIN_EXCERPT_FIELDS: &[&str] = &[
    "rawpayload",
    "payload",
    "processpath",
    "commandline",
    "cmdline",
];

/// Keys replaced entirely by a keyed hash (normalised form).
const BUILTIN_DROP_FIELDS: &[&str] = &[
    "ip",
    "ipaddress",
    "srcip",
    "sourceip",
    "dstip",
    "destip",
    "destinationip",
    "user",
    "username",
    "userid",
    "useridentity",
    "email",
    "account",
];

/// On-disk ruleset format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesetSpec {
    /// Fields replaced by a keyed hash wherever they appear.
    pub sensitive_fields: Vec<String>,
    /// Fields that keep a bounded excerpt next to their hash.
    #[serde(default)]
    pub excerpt_fields: Vec<String>,
    /// Rule name to regex pattern.
    pub redactions: BTreeMap<String, String>,
}

/// A compiled pattern rule.
#[derive(Debug, Clone)]
pub struct PatternRule {
    /// Rule name from the ruleset.
    pub name: String,
    /// Compiled pattern.
    pub regex: Regex,
    /// Fixed token substituted for every match.
    pub replacement: String,
}

/// A validated, compiled ruleset.
#[derive(Debug, Clone)]
pub struct RedactionRuleset {
    rules: Vec<PatternRule>,
    fields: BTreeMap<String, FieldMode>,
    digest: String,
}

impl RedactionRuleset {
    /// Compile and validate a ruleset.
    ///
    /// # Errors
    ///
    /// Returns [`RulesetError::Configuration`] for invalid names or patterns,
    /// patterns that match the empty string, replacement tokens that a rule
    /// would match again, or field lists touching structural keys.
    pub fn from_spec(spec: &RulesetSpec) -> Result<Self, RulesetError> {
        let mut rules = Vec::with_capacity(spec.redactions.len());
        for (name, pattern) in &spec.redactions {
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(config(format!("rule name {name:?} must match [A-Za-z0-9_]+")));
            }
            if pattern.trim().is_empty() {
                return Err(config(format!("rule {name} has an empty pattern")));
            }
            let regex = Regex::new(pattern)
                .map_err(|e| config(format!("rule {name} has an invalid pattern: {e}")))?;
            if regex.is_match("") {
                return Err(config(format!("rule {name} matches the empty string")));
            }
            rules.push(PatternRule {
                name: name.clone(),
                replacement: format!("[REDACTED_{}]", name.to_ascii_uppercase()),
                regex,
            });
        }

        for rule in &rules {
            if let Some(other) = rules.iter().find(|r| r.regex.is_match(&rule.replacement)) {
                return Err(config(format!(
                    "replacement for rule {} is matched by rule {}",
                    rule.name, other.name
                )));
            }
        }

        let mut fields = BTreeMap::new();
        for name in BUILTIN_EXCERPT_FIELDS {
            fields.insert((*name).to_owned(), FieldMode::TruncateAndHash);
        }
        for name in BUILTIN_DROP_FIELDS {
            fields.insert((*name).to_owned(), FieldMode::HashAndDrop);
        }
        for (list, mode) in [
            (&spec.excerpt_fields, FieldMode::TruncateAndHash),
            (&spec.sensitive_fields, FieldMode::HashAndDrop),
        ] {
            for name in list {
                let key = normalize_key(name);
                if key.is_empty() {
                    return Err(config("field names must not be empty".to_owned()));
                }
                if STRUCTURAL_KEYS.iter().any(|s| normalize_key(s) == key) {
                    return Err(config(format!("field {name:?} is structural and cannot be redacted")));
                }
                fields.insert(key, mode);
            }
        }

        let canonical = serde_json::to_vec(spec)
            .map_err(|e| config(format!("cannot canonicalise ruleset: {e}")))?;
        let digest = hex::encode(Sha256::digest(&canonical));

        Ok(Self {
            rules,
            fields,
            digest,
        })
    }

    /// Parse and compile a ruleset from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`RulesetError::Configuration`] on parse or validation failure.
    pub fn from_json(json: &str) -> Result<Self, RulesetError> {
        let spec: RulesetSpec = serde_json::from_str(json)
            .map_err(|e| config(format!("invalid ruleset JSON: {e}")))?;
        Self::from_spec(&spec)
    }

    /// Load a ruleset file.
    ///
    /// # Errors
    ///
    /// Returns [`RulesetError::Configuration`] if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> Result<Self, RulesetError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&contents)
    }

    /// The built-in ruleset.
    ///
    /// # Errors
    ///
    /// Only fails if the built-in patterns are broken.
    pub fn builtin() -> Result<Self, RulesetError> {
        Self::from_spec(&default_spec())
    }

    /// Compiled pattern rules in application order.
    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    /// Field policy for a key, if any.
    pub fn field_mode(&self, key: &str) -> Option<FieldMode> {
        self.fields.get(&normalize_key(key)).copied()
    }

    /// Hex SHA-256 of the canonical ruleset spec.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// The built-in ruleset spec, as written by `redline init`.
pub fn default_spec() -> RulesetSpec {
    let redactions = [
        ("ipv4", r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b"),
        ("email", r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}"),
        ("cloud_access_key", r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b"),
        ("card_number", r"\b\d(?:[ \-]?\d){12,18}\b"),
        ("signed_token", r"\beyJ[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+"),
        (
            "api_token",
            r"(?:sk-ant-[A-Za-z0-9_\-]{10,}|sk-[A-Za-z0-9]{32,}|ghp_[A-Za-z0-9]{20,}|glpat-[A-Za-z0-9_\-]{16,}|xoxb-[A-Za-z0-9\-]{20,})",
        ),
    ];

    RulesetSpec {
        sensitive_fields: vec!["hostname".to_owned(), "machine_id".to_owned(), "session_id".to_owned()],
        excerpt_fields: Vec::new(),
        redactions: redactions
            .iter()
            .map(|(name, pattern)| ((*name).to_owned(), (*pattern).to_owned()))
            .collect(),
    }
}

/// Lowercase and strip `_` / `-` so `sourceIp`, `source_ip`, and `Source-IP` agree.
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

fn config(detail: String) -> RulesetError {
    RulesetError::Configuration(detail)
}
