//! Keyed field hashing.
//!
//! HMAC-SHA256 under a secret key: the same value always maps to the same
//! token, so records stay linkable, but nobody without the key can confirm
//! a guessed value.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::ruleset::RulesetError;

type HmacSha256 = Hmac<Sha256>;

/// Minimum accepted hash key length in bytes.
pub const MIN_KEY_LEN: usize = 16;

/// Deterministic keyed hasher for sensitive field values.
#[derive(Clone)]
pub struct FieldHasher {
    keyed: HmacSha256,
}

impl std::fmt::Debug for FieldHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FieldHasher(__REDACTED__)")
    }
}

impl FieldHasher {
    /// Create a hasher from secret key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RulesetError::Configuration`] if the key is shorter than
    /// [`MIN_KEY_LEN`].
    pub fn new(key: &[u8]) -> Result<Self, RulesetError> {
        if key.len() < MIN_KEY_LEN {
            return Err(RulesetError::Configuration(format!(
                "hash key must be at least {MIN_KEY_LEN} bytes"
            )));
        }
        let keyed = HmacSha256::new_from_slice(key)
            .map_err(|e| RulesetError::Configuration(format!("invalid hash key: {e}")))?;
        Ok(Self { keyed })
    }

    fn mac(&self, value: &str) -> [u8; 32] {
        let mut mac = self.keyed.clone();
        mac.update(value.as_bytes());
        mac.finalize().into_bytes().into()
    }

    /// Full replacement token for hash-and-drop fields.
    pub fn token(&self, value: &str) -> String {
        format!("hmac_{}", hex::encode(&self.mac(value)[..16]))
    }

    /// Short hash suffix for truncate-and-hash fields.
    pub fn short(&self, value: &str) -> String {
        format!("h_{}", hex::encode(&self.mac(value)[..8]))
    }
}
