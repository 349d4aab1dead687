//! Hybrid envelope encryption over a [`KeyCustodian`].
//!
//! Each message gets its own random data key and 96-bit nonce, so a
//! (key, nonce) pair is used for exactly one encryption. Tampering with the
//! ciphertext or nonce fails the Poly1305 tag; tampering with the wrapped
//! key fails the custodian's seal.

use std::path::Path;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::custody::{CustodyError, DataKey, KeyCustodian};

/// AEAD nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// Errors from envelope encryption and decryption.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The authentication tag did not verify (tampering or wrong data key).
    #[error("envelope authentication failed")]
    Authentication,

    /// The custodian failed to wrap or unwrap the data key.
    #[error(transparent)]
    Custody(#[from] CustodyError),

    /// The envelope is not structurally valid.
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// A sealed message: wrapped data key, nonce, and ciphertext with tag.
///
/// Serialized as `{ "wrappedDataKey", "nonce", "ciphertext" }` with standard
/// base64 values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EnvelopeMessage {
    /// Data key wrapped by the custodian.
    #[serde(with = "b64")]
    pub wrapped_data_key: Vec<u8>,
    /// AEAD nonce, 12 bytes.
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    /// AEAD ciphertext including the 16-byte tag.
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
}

impl EnvelopeMessage {
    /// Parse an envelope from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] on invalid JSON or base64.
    pub fn from_json(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(|e| {
            EnvelopeError::Malformed(format!(
                "{:?} error at line {} column {}",
                e.classify(),
                e.line(),
                e.column()
            ))
        })
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec_pretty(self).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    /// Read and parse an envelope file.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] if the file cannot be read or parsed.
    pub async fn read_from(path: &Path) -> Result<Self, EnvelopeError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| EnvelopeError::Malformed(format!("{}: {e}", path.display())))?;
        Self::from_json(&bytes)
    }
}

/// Encrypt `plaintext` under a fresh data key wrapped by `custodian`.
///
/// # Errors
///
/// Returns [`EnvelopeError::Custody`] if the custodian cannot wrap.
pub async fn encrypt(
    plaintext: &[u8],
    custodian: &dyn KeyCustodian,
) -> Result<EnvelopeMessage, EnvelopeError> {
    let data_key = DataKey::generate();
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&data_key.as_bytes()[..]));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| EnvelopeError::Malformed("plaintext too large to seal".to_owned()))?;

    let wrapped_data_key = custodian.wrap(&data_key).await?;

    Ok(EnvelopeMessage {
        wrapped_data_key,
        nonce: nonce.to_vec(),
        ciphertext,
    })
}

/// Decrypt an envelope. The returned buffer is zeroed on drop.
///
/// # Errors
///
/// Custodian errors (including [`CustodyError::KeyMismatch`]) pass through as
/// [`EnvelopeError::Custody`]; a failed tag is [`EnvelopeError::Authentication`].
pub async fn decrypt(
    msg: &EnvelopeMessage,
    custodian: &dyn KeyCustodian,
) -> Result<Zeroizing<Vec<u8>>, EnvelopeError> {
    if msg.nonce.len() != NONCE_LEN {
        return Err(EnvelopeError::Malformed(format!(
            "nonce must be {NONCE_LEN} bytes, found {}",
            msg.nonce.len()
        )));
    }

    let data_key = custodian.unwrap(&msg.wrapped_data_key).await?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&data_key.as_bytes()[..]));
    cipher
        .decrypt(Nonce::from_slice(&msg.nonce), msg.ciphertext.as_slice())
        .map(Zeroizing::new)
        .map_err(|_| EnvelopeError::Authentication)
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.trim())
            .map_err(serde::de::Error::custom)
    }
}
