//! Decryption gateway: the only path by which a plan leaves its envelope.
//!
//! Each request is handled on its own. The capability token is checked
//! before anything about the scan is looked at, so a rejected request
//! learns nothing about whether a plan exists. Decrypted bytes live in a
//! zeroizing buffer for the duration of the request and are never written
//! anywhere.
//!
//! A single shared token authorizes every scan. It is not scoped to a scan
//! id and does not expire; that is not real authorization, and production
//! needs per-caller identity, per-scan scope, and expiry.

pub mod http;

use std::path::PathBuf;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{info, warn};

use crate::artifacts;
use crate::crypto::{self, EnvelopeError, EnvelopeMessage, KeyCustodian};
use crate::plan::Plan;

type HmacSha256 = Hmac<Sha256>;

/// Gateway failures.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The capability token was missing or wrong.
    #[error("forbidden")]
    Forbidden,

    /// Authorized, but no plan has been generated for the scan yet.
    #[error("plan pending")]
    Pending,

    /// The scan id cannot name an artifact.
    #[error("invalid scan id")]
    InvalidScanId,

    /// The plan envelope would not open.
    #[error("plan decryption failed: {0}")]
    Decryption(#[source] EnvelopeError),

    /// The plan artifact decrypted but is not a valid plan for this scan.
    #[error("corrupt plan artifact: {0}")]
    CorruptPlan(String),

    /// The plan artifact could not be read.
    #[error("plan storage failure: {0}")]
    Storage(#[source] std::io::Error),

    /// The gateway was configured with an unusable token.
    #[error("gateway configuration error: {0}")]
    Configuration(String),
}

/// Shared secret authorizing plan decryption.
///
/// Only a keyed digest of the secret is kept; candidates are compared in
/// constant time through HMAC verification.
#[derive(Clone)]
pub struct CapabilityToken {
    keyed: HmacSha256,
    expected: Vec<u8>,
}

impl std::fmt::Debug for CapabilityToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CapabilityToken(__REDACTED__)")
    }
}

impl CapabilityToken {
    /// Wrap a token secret.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Configuration`] for an empty secret.
    pub fn new(secret: &str) -> Result<Self, GatewayError> {
        if secret.trim().is_empty() {
            return Err(GatewayError::Configuration(
                "capability token must not be empty".to_owned(),
            ));
        }
        let mut key = zeroize::Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut key[..]);
        let keyed = HmacSha256::new_from_slice(&key[..])
            .map_err(|e| GatewayError::Configuration(e.to_string()))?;

        let mut mac = keyed.clone();
        mac.update(secret.as_bytes());
        let expected = mac.finalize().into_bytes().to_vec();
        Ok(Self { keyed, expected })
    }

    /// Whether `candidate` is the token.
    pub fn verify(&self, candidate: &str) -> bool {
        let mut mac = self.keyed.clone();
        mac.update(candidate.as_bytes());
        mac.verify_slice(&self.expected).is_ok()
    }
}

/// One gateway request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Scan the caller is asking about.
    pub scan_id: String,
    /// Free-text question for the quick response.
    pub question: String,
    /// Whether the decrypted plan is wanted.
    pub request_plan: bool,
    /// Presented capability token.
    pub token: Option<String>,
}

/// Static heuristic answer. Never touches scan data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickResponse {
    /// Canned summary.
    pub summary: String,
    /// Heuristic confidence in `[0, 1]`.
    pub confidence: f32,
}

/// Plan availability in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// The caller did not ask for the plan.
    NotRequested,
    /// The token was rejected.
    Forbidden,
    /// No plan exists yet for the scan.
    Pending,
    /// The plan is included.
    Ready,
}

/// Gateway response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    /// Heuristic answer to the question.
    pub quick_response: QuickResponse,
    /// Plan availability.
    pub plan_status: PlanStatus,
    /// Decrypted plan, present only when `plan_status` is `ready`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
}

/// Keyword heuristics, checked in order.
const QUICK_RULES: &[(&[&str], &str, f32)] = &[
    (
        &["ransom", "encrypt", "exfil"],
        "Possible active compromise. Isolate affected hosts and preserve evidence before remediation.",
        0.7,
    ),
    (
        &["malware", "binary", "hash", "virus"],
        "Suspicious binaries should be hashed and submitted for analysis before removal.",
        0.6,
    ),
    (
        &["phish", "email", "credential", "login"],
        "Reset exposed credentials and review recent sign-ins for the affected accounts.",
        0.5,
    ),
];

const QUICK_FALLBACK: (&str, f32) = (
    "Review the scan findings by severity; request the plan for prioritized steps.",
    0.3,
);

/// Answer a question from static keyword rules.
pub fn quick_response(question: &str) -> QuickResponse {
    let lowered = question.to_lowercase();
    let (summary, confidence) = QUICK_RULES
        .iter()
        .find(|(keywords, _, _)| keywords.iter().any(|k| lowered.contains(k)))
        .map_or(QUICK_FALLBACK, |(_, summary, confidence)| {
            (*summary, *confidence)
        });
    QuickResponse {
        summary: summary.to_owned(),
        confidence,
    }
}

/// Stateless decrypt-on-demand gateway.
#[derive(Clone)]
pub struct Gateway {
    custodian: Arc<dyn KeyCustodian>,
    plans_dir: PathBuf,
    token: CapabilityToken,
}

impl Gateway {
    /// Create a gateway serving plans from `plans_dir`.
    pub fn new(
        custodian: Arc<dyn KeyCustodian>,
        plans_dir: impl Into<PathBuf>,
        token: CapabilityToken,
    ) -> Self {
        Self {
            custodian,
            plans_dir: plans_dir.into(),
            token,
        }
    }

    /// Handle one chat request.
    ///
    /// Authorization failure and a missing plan are ordinary responses
    /// (`forbidden`, `pending`), not errors.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] for invalid scan ids, unreadable or
    /// undecryptable plans.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, GatewayError> {
        let quick_response = quick_response(&request.question);
        if !request.request_plan {
            return Ok(ChatResponse {
                quick_response,
                plan_status: PlanStatus::NotRequested,
                plan: None,
            });
        }

        let token = request.token.as_deref().unwrap_or_default();
        let (plan_status, plan) = match self.fetch_plan(&request.scan_id, token).await {
            Ok(plan) => (PlanStatus::Ready, Some(plan)),
            Err(GatewayError::Forbidden) => (PlanStatus::Forbidden, None),
            Err(GatewayError::Pending) => (PlanStatus::Pending, None),
            Err(e) => return Err(e),
        };
        Ok(ChatResponse {
            quick_response,
            plan_status,
            plan,
        })
    }

    /// Authorize, then load and decrypt the plan for `scan_id`.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Forbidden`] for a bad token (checked first, before any
    /// lookup), [`GatewayError::Pending`] if no plan exists, and the
    /// remaining variants for unusable artifacts.
    pub async fn fetch_plan(&self, scan_id: &str, token: &str) -> Result<Plan, GatewayError> {
        if !self.token.verify(token) {
            warn!("plan request rejected");
            return Err(GatewayError::Forbidden);
        }
        if !artifacts::is_valid_scan_id(scan_id) {
            return Err(GatewayError::InvalidScanId);
        }

        let path = artifacts::plan_path(&self.plans_dir, scan_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(scan_id, "plan pending");
                return Err(GatewayError::Pending);
            }
            Err(e) => return Err(GatewayError::Storage(e)),
        };

        let envelope = EnvelopeMessage::from_json(&bytes)
            .map_err(|e| GatewayError::CorruptPlan(e.to_string()))?;
        let plaintext = crypto::decrypt(&envelope, self.custodian.as_ref())
            .await
            .map_err(GatewayError::Decryption)?;
        let plan: Plan = serde_json::from_slice(&plaintext).map_err(|e| {
            GatewayError::CorruptPlan(format!("{:?} error at line {}", e.classify(), e.line()))
        })?;
        if plan.scan_id != scan_id {
            return Err(GatewayError::CorruptPlan(
                "plan belongs to a different scan".to_owned(),
            ));
        }

        info!(scan_id, steps = plan.steps.len(), "plan released");
        Ok(plan)
    }
}
