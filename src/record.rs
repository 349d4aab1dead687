//! Schemas for scan reports and sanitized records.
//!
//! Decrypted payloads are validated by hand rather than through serde so
//! that schema errors name a path and a reason but never echo a value: a
//! rejected finding must not leak plaintext into logs or quarantine notes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys the sanitized record reserves for itself.
const RESERVED_KEYS: &[&str] = &["rulesetDigest"];

/// Structural keys that carry no sensitive content and drive plan derivation.
pub const STRUCTURAL_KEYS: &[&str] = &[
    "scanId", "scan_id", "findings", "eventId", "event_id", "severity", "host",
];

/// A schema violation, located by JSON path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{path}: {reason}")]
pub struct SchemaError {
    /// JSON path of the offending element, e.g. `$.findings[2].severity`.
    pub path: String,
    /// What was wrong with it.
    pub reason: String,
}

impl SchemaError {
    fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Finding severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Informational.
    Info,
    /// Low.
    Low,
    /// Medium.
    Medium,
    /// High.
    High,
    /// Critical: triggers containment steps.
    Critical,
}

impl FromStr for Severity {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INFO" | "INFORMATIONAL" => Ok(Self::Info),
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            _ => Err(SchemaError::new("severity", "unknown severity")),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Info => "INFO",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        f.write_str(label)
    }
}

/// One finding inside a scan report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    /// Event identifier from the scanner.
    pub event_id: String,
    /// Severity.
    pub severity: Severity,
    /// Everything else the scanner reported.
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Finding {
    fn from_value(value: Value, path: &str) -> Result<Self, SchemaError> {
        let Value::Object(mut object) = value else {
            return Err(SchemaError::new(path, "expected an object"));
        };

        let event_id = match take_one(&mut object, &["eventId", "event_id"], path)? {
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(Value::Number(n)) => n.to_string(),
            Some(_) => {
                return Err(SchemaError::new(
                    format!("{path}.eventId"),
                    "expected a non-empty string or number",
                ))
            }
            None => return Err(SchemaError::new(format!("{path}.eventId"), "missing")),
        };

        let severity = match take_one(&mut object, &["severity"], path)? {
            Some(Value::String(label)) => label
                .parse::<Severity>()
                .map_err(|e| SchemaError::new(format!("{path}.severity"), e.reason))?,
            Some(_) => {
                return Err(SchemaError::new(
                    format!("{path}.severity"),
                    "expected a string",
                ))
            }
            None => return Err(SchemaError::new(format!("{path}.severity"), "missing")),
        };

        Ok(Self {
            event_id,
            severity,
            attributes: object,
        })
    }

    fn into_value(self) -> Value {
        let mut object = self.attributes;
        object.insert("eventId".to_owned(), Value::String(self.event_id));
        object.insert(
            "severity".to_owned(),
            Value::String(self.severity.to_string()),
        );
        Value::Object(object)
    }
}

/// A decrypted scan report, validated but not yet redacted.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    /// Scan identifier; names every downstream artifact.
    pub scan_id: String,
    /// Scanned host label, if reported.
    pub host: Option<String>,
    /// Individual findings.
    pub findings: Vec<Finding>,
    /// Remaining top-level fields.
    pub context: Map<String, Value>,
}

impl ScanReport {
    /// Validate a decrypted JSON document.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] naming the first offending path.
    pub fn from_value(value: Value) -> Result<Self, SchemaError> {
        let Value::Object(mut root) = value else {
            return Err(SchemaError::new("$", "expected an object"));
        };

        let scan_id = match take_one(&mut root, &["scanId", "scan_id"], "$")? {
            Some(Value::String(id)) if !id.trim().is_empty() => id,
            Some(_) => return Err(SchemaError::new("$.scanId", "expected a non-empty string")),
            None => return Err(SchemaError::new("$.scanId", "missing")),
        };

        let host = match take_one(&mut root, &["host"], "$")? {
            None | Some(Value::Null) => None,
            Some(Value::String(host)) => Some(host),
            Some(_) => return Err(SchemaError::new("$.host", "expected a string")),
        };

        let items = match take_one(&mut root, &["findings"], "$")? {
            Some(Value::Array(items)) => items,
            Some(_) => return Err(SchemaError::new("$.findings", "expected an array")),
            None => return Err(SchemaError::new("$.findings", "missing")),
        };
        let findings = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| Finding::from_value(item, &format!("$.findings[{i}]")))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(key) = RESERVED_KEYS.iter().find(|k| root.contains_key(**k)) {
            return Err(SchemaError::new(format!("$.{key}"), "reserved key"));
        }

        Ok(Self {
            scan_id,
            host,
            findings,
            context: root,
        })
    }

    /// Parse and validate raw JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] on invalid JSON or schema violations.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SchemaError> {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| {
            SchemaError::new(
                "$",
                format!(
                    "invalid JSON ({:?}) at line {} column {}",
                    e.classify(),
                    e.line(),
                    e.column()
                ),
            )
        })?;
        Self::from_value(value)
    }

    /// Rebuild the canonical JSON document.
    pub fn into_value(self) -> Value {
        let (scan_id, mut root) = self.into_parts();
        root.insert("scanId".to_owned(), Value::String(scan_id));
        Value::Object(root)
    }

    /// Split off the scan id from the rest of the document.
    ///
    /// The scan id names artifacts and is validated on its own; only the
    /// body goes through redaction.
    pub fn into_parts(self) -> (String, Map<String, Value>) {
        let mut root = self.context;
        if let Some(host) = self.host {
            root.insert("host".to_owned(), Value::String(host));
        }
        root.insert(
            "findings".to_owned(),
            Value::Array(self.findings.into_iter().map(Finding::into_value).collect()),
        );
        (self.scan_id, root)
    }
}

/// A scan report after redaction. Safe to persist in plaintext.
///
/// Contains nothing time-varying, so re-running ingestion on the same
/// envelope yields byte-identical output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizedRecord {
    /// Scan identifier.
    pub scan_id: String,
    /// SHA-256 digest of the ruleset that produced this record.
    pub ruleset_digest: String,
    /// Host label after redaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Redacted findings.
    pub findings: Vec<Finding>,
    /// Remaining top-level fields after redaction.
    #[serde(flatten)]
    pub context: Map<String, Value>,
}

impl SanitizedRecord {
    /// Build a record from an already redacted document.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] if redaction broke the document shape.
    pub fn from_redacted(value: Value, ruleset_digest: &str) -> Result<Self, SchemaError> {
        let report = ScanReport::from_value(value)?;
        Ok(Self {
            scan_id: report.scan_id,
            ruleset_digest: ruleset_digest.to_owned(),
            host: report.host,
            findings: report.findings,
            context: report.context,
        })
    }

    /// Reattach a scan id to a redacted body from [`ScanReport::into_parts`].
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] if the body is not an object or redaction
    /// broke its shape.
    pub fn assemble(scan_id: String, body: Value, ruleset_digest: &str) -> Result<Self, SchemaError> {
        let Value::Object(mut root) = body else {
            return Err(SchemaError::new("$", "expected an object"));
        };
        root.insert("scanId".to_owned(), Value::String(scan_id));
        Self::from_redacted(Value::Object(root), ruleset_digest)
    }

    /// Number of findings at [`Severity::Critical`].
    pub fn critical_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Critical)
            .count()
    }

    /// Serialize as pretty JSON with sorted map keys.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Parse a persisted record.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid record.
    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Remove a field that may appear under several aliases; reject duplicates.
fn take_one(
    object: &mut Map<String, Value>,
    aliases: &[&str],
    path: &str,
) -> Result<Option<Value>, SchemaError> {
    let mut found = None;
    for alias in aliases {
        if let Some(value) = object.remove(*alias) {
            if found.is_some() {
                return Err(SchemaError::new(
                    format!("{path}.{}", aliases.first().copied().unwrap_or_default()),
                    "field given under more than one name",
                ));
            }
            found = Some(value);
        }
    }
    Ok(found)
}
