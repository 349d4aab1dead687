//! Redaction chokepoint for decrypted findings.
//!
//! Two passes over a JSON document:
//! 1. **Field pass**: keys with a field policy are hashed. Hashes are taken
//!    over the original value so the same IP or user links across records.
//! 2. **Pattern pass**: every remaining object key, string, and number is
//!    scrubbed by the ruleset's patterns and by exact known secrets. A
//!    scrubbed key also carries the keyed hash of the original key, so two
//!    keys redacted to the same marker stay distinct.
//!
//! The serialized result is then checked once more; anything that still
//! matches is reported as [`RedactionError::Incomplete`] instead of being
//! written out.

pub mod hashing;
pub mod ruleset;

use std::borrow::Cow;

use serde_json::{Map, Value};
use tracing::debug;

pub use hashing::FieldHasher;
pub use ruleset::{FieldMode, RedactionRuleset, RulesetError, RulesetSpec};

/// Canonical replacement marker for exact known secrets.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Shortest value accepted into the exact-match pass.
pub const MIN_KNOWN_SECRET_LEN: usize = 8;

/// Key fragments that signal secret material (normalised form).
const HIGH_RISK_KEY_MARKERS: &[&str] = &["password", "passwd", "secret", "privatekey", "credential", "apikey"];

/// Per-record redaction failures. The record is quarantined.
#[derive(Debug, thiserror::Error)]
pub enum RedactionError {
    /// A key that looks like secret material has no field policy.
    #[error("unrecognized high-risk field at {path}")]
    HighRiskField {
        /// JSON path of the field.
        path: String,
    },

    /// Two keys of one object still map to the same name after redaction.
    #[error("redacted key collides with a sibling at {path}")]
    KeyCollision {
        /// JSON path of the colliding key.
        path: String,
    },

    /// Sensitive content survived redaction.
    #[error("redaction incomplete: rule {rule} still matches")]
    Incomplete {
        /// Rule (or `known_secret`) that still matched.
        rule: String,
    },
}

/// Redacts sensitive fields and patterns from structured records.
#[derive(Debug, Clone)]
pub struct Redactor {
    ruleset: RedactionRuleset,
    hasher: FieldHasher,
    exact_secrets: Vec<String>,
    excerpt_chars: usize,
}

impl Redactor {
    /// Create a redactor.
    pub fn new(ruleset: RedactionRuleset, hasher: FieldHasher, excerpt_chars: usize) -> Self {
        Self {
            ruleset,
            hasher,
            exact_secrets: Vec::new(),
            excerpt_chars,
        }
    }

    /// Also scrub these exact values (credentials and the like).
    ///
    /// Values shorter than [`MIN_KNOWN_SECRET_LEN`] characters are ignored.
    pub fn with_known_secrets(mut self, secrets: Vec<String>) -> Self {
        let total = secrets.len();
        self.exact_secrets = secrets
            .into_iter()
            .filter(|s| s.trim().chars().count() >= MIN_KNOWN_SECRET_LEN)
            .collect();
        let skipped = total.saturating_sub(self.exact_secrets.len());
        if skipped > 0 {
            debug!(skipped, "short known secrets left out of exact-match redaction");
        }
        self
    }

    /// The ruleset in use.
    pub fn ruleset(&self) -> &RedactionRuleset {
        &self.ruleset
    }

    /// Redact a whole document.
    ///
    /// # Errors
    ///
    /// Returns [`RedactionError`] for unrecognized high-risk keys or if
    /// sensitive content survives.
    pub fn redact_value(&self, value: Value) -> Result<Value, RedactionError> {
        let redacted = self.walk(value, "$")?;
        self.verify_clean(&redacted)?;
        Ok(redacted)
    }

    /// Redact exact secrets and pattern matches from text.
    pub fn redact_text<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let mut sanitized = Cow::Borrowed(text);
        for secret in &self.exact_secrets {
            if sanitized.contains(secret.as_str()) {
                sanitized = Cow::Owned(sanitized.replace(secret.as_str(), REDACTION_MARKER));
            }
        }
        for rule in self.ruleset.rules() {
            if rule.regex.is_match(&sanitized) {
                sanitized = Cow::Owned(
                    rule.regex
                        .replace_all(&sanitized, rule.replacement.as_str())
                        .into_owned(),
                );
            }
        }
        sanitized
    }

    /// Check a document's serialized form against every rule and secret.
    ///
    /// # Errors
    ///
    /// Returns [`RedactionError::Incomplete`] naming the first rule that matches.
    pub fn verify_clean(&self, value: &Value) -> Result<(), RedactionError> {
        let text = value.to_string();
        if let Some(rule) = self.ruleset.rules().iter().find(|r| r.regex.is_match(&text)) {
            return Err(RedactionError::Incomplete {
                rule: rule.name.clone(),
            });
        }
        if self.exact_secrets.iter().any(|s| text.contains(s.as_str())) {
            return Err(RedactionError::Incomplete {
                rule: "known_secret".to_owned(),
            });
        }
        Ok(())
    }

    fn walk(&self, value: Value, path: &str) -> Result<Value, RedactionError> {
        match value {
            Value::Object(object) => self.walk_object(object, path).map(Value::Object),
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| self.walk(item, &format!("{path}[{i}]")))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::String(s) => Ok(Value::String(self.redact_text(&s).into_owned())),
            Value::Number(n) => {
                let text = n.to_string();
                match self.redact_text(&text) {
                    Cow::Borrowed(_) => Ok(Value::Number(n)),
                    Cow::Owned(redacted) => Ok(Value::String(redacted)),
                }
            }
            other => Ok(other),
        }
    }

    fn walk_object(
        &self,
        object: Map<String, Value>,
        path: &str,
    ) -> Result<Map<String, Value>, RedactionError> {
        let mut out = Map::new();
        for (key, value) in object {
            let safe_key = match self.redact_text(&key) {
                Cow::Borrowed(_) => key.clone(),
                Cow::Owned(scrubbed) => format!("{scrubbed}#{}", self.hasher.short(&key)),
            };
            let child_path = format!("{path}.{safe_key}");
            if out.contains_key(&safe_key) {
                return Err(RedactionError::KeyCollision { path: child_path });
            }
            let value = match self.ruleset.field_mode(&key) {
                Some(mode) => self.apply_field_mode(mode, value),
                None if is_high_risk_key(&key) => {
                    return Err(RedactionError::HighRiskField { path: child_path });
                }
                None => self.walk(value, &child_path)?,
            };
            out.insert(safe_key, value);
        }
        Ok(out)
    }

    fn apply_field_mode(&self, mode: FieldMode, value: Value) -> Value {
        let original = match value {
            Value::Null => return Value::Null,
            Value::String(s) => s,
            other => other.to_string(),
        };
        match mode {
            FieldMode::HashAndDrop => Value::String(self.hasher.token(&original)),
            FieldMode::TruncateAndHash => {
                let short = self.hasher.short(&original);
                let excerpt = self.excerpt(&original);
                if excerpt.is_empty() {
                    Value::String(format!("[{short}]"))
                } else {
                    Value::String(format!("{excerpt}…[{short}]"))
                }
            }
        }
    }

    /// A prefix of the pattern-scrubbed value, at most half its length so the
    /// original never survives whole.
    fn excerpt(&self, original: &str) -> String {
        let scrubbed = self.redact_text(original);
        let half = scrubbed.chars().count() / 2;
        let limit = self.excerpt_chars.min(half);
        let prefix: String = scrubbed.chars().take(limit).collect();
        self.redact_text(&prefix).into_owned()
    }
}

fn is_high_risk_key(key: &str) -> bool {
    let normalized = ruleset::normalize_key(key);
    HIGH_RISK_KEY_MARKERS
        .iter()
        .any(|marker| normalized.contains(marker))
}
