//! Key custodian: wraps and unwraps symmetric data keys.
//!
//! The custodian owns an X25519 keypair. Wrapping is a sealed box: an
//! ephemeral keypair is generated per call, HKDF-SHA256 turns the shared
//! secret into a key-encryption key, and ChaCha20-Poly1305 seals the data
//! key. Every wrap of the same data key therefore produces different bytes.
//!
//! Wrapped layout: `ephemeral_public (32) || sealed_data_key (32 + 16 tag)`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::credentials::validate_private_permissions;

/// Length of a symmetric data key in bytes.
pub const DATA_KEY_LEN: usize = 32;

/// Length of a wrapped data key produced by [`LocalCustodian`].
pub const WRAPPED_KEY_LEN: usize = 32 + DATA_KEY_LEN + 16;

/// File name of the full keypair inside a keys directory.
pub const PRIVATE_KEY_FILE: &str = "custodian.key";

/// File name of the public half inside a keys directory.
pub const PUBLIC_KEY_FILE: &str = "custodian.pub";

const KEK_INFO: &[u8] = b"redline/custody/wrap/v1";

// The key-encryption key is unique per wrap (fresh ephemeral secret), so a
// constant nonce never repeats under the same key.
const WRAP_NONCE: [u8; 12] = [0u8; 12];

/// Errors raised by key custody operations.
#[derive(Debug, thiserror::Error)]
pub enum CustodyError {
    /// The wrapped key was not produced under this custodian's public key.
    #[error("wrapped data key does not match the custodian key")]
    KeyMismatch,

    /// The wrapped key is structurally invalid.
    #[error("wrapped data key is corrupt: {0}")]
    Corruption(String),

    /// The operation needs key material this custodian does not hold.
    #[error("key material unavailable: {0}")]
    Unavailable(String),

    /// Key files or key material are misconfigured. Fatal.
    #[error("custodian configuration error: {0}")]
    Configuration(String),
}

/// A symmetric data key. Zeroed on drop, never printed.
#[derive(Clone)]
pub struct DataKey(Zeroizing<[u8; DATA_KEY_LEN]>);

impl DataKey {
    /// Generate a fresh random data key from the OS RNG.
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; DATA_KEY_LEN]);
        OsRng.fill_bytes(&mut *key);
        Self(key)
    }

    /// Wrap existing key bytes.
    pub fn from_bytes(bytes: [u8; DATA_KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Raw key bytes. Only the envelope cipher should call this.
    pub fn as_bytes(&self) -> &[u8; DATA_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DataKey(__REDACTED__)")
    }
}

impl PartialEq for DataKey {
    fn eq(&self, other: &Self) -> bool {
        self.0[..] == other.0[..]
    }
}

impl Eq for DataKey {}

/// Capability for wrapping and unwrapping data keys.
///
/// Production deployments back this with an HSM or KMS client; the cipher,
/// preprocessor, and gateway only ever see this trait.
#[async_trait]
pub trait KeyCustodian: Send + Sync {
    /// Wrap a data key under the custodian's public key.
    async fn wrap(&self, data_key: &DataKey) -> Result<Vec<u8>, CustodyError>;

    /// Recover a data key previously wrapped for this custodian.
    async fn unwrap(&self, wrapped: &[u8]) -> Result<DataKey, CustodyError>;
}

/// On-disk keypair representation.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct KeyFile {
    public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private_key: Option<String>,
}

/// Paths written by [`LocalCustodian::save`].
#[derive(Debug, Clone)]
pub struct KeyPaths {
    /// Full keypair, mode 0600.
    pub private: PathBuf,
    /// Public half only.
    pub public: PathBuf,
}

/// In-process custodian holding an X25519 keypair.
///
/// A custodian loaded from the public file alone can wrap but never unwrap,
/// which is all a findings producer needs.
pub struct LocalCustodian {
    public: PublicKey,
    secret: Option<StaticSecret>,
}

impl std::fmt::Debug for LocalCustodian {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCustodian")
            .field("fingerprint", &self.fingerprint())
            .field("has_private_key", &self.secret.is_some())
            .finish()
    }
}

impl LocalCustodian {
    /// Generate a new keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            public,
            secret: Some(secret),
        }
    }

    /// Build a custodian from raw private key bytes.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self {
            public,
            secret: Some(secret),
        }
    }

    /// Build a wrap-only custodian from a public key.
    pub fn public_only(public: [u8; 32]) -> Self {
        Self {
            public: PublicKey::from(public),
            secret: None,
        }
    }

    /// Whether this custodian can unwrap.
    pub fn has_private_key(&self) -> bool {
        self.secret.is_some()
    }

    /// Public key bytes.
    pub fn public_key(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Short hex fingerprint of the public key, safe to log.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.public.as_bytes());
        hex::encode(&digest[..8])
    }

    /// Load a full keypair from a private key file.
    ///
    /// # Errors
    ///
    /// Returns [`CustodyError::Configuration`] if the file is missing, has
    /// permissions broader than 0600, is malformed, or its public half does
    /// not match its private half.
    pub fn load(path: &Path) -> Result<Self, CustodyError> {
        validate_private_permissions(path).map_err(|e| config_err(path, &format!("{e:#}")))?;
        let file = read_key_file(path)?;
        let encoded = file
            .private_key
            .map(Zeroizing::new)
            .ok_or_else(|| config_err(path, "missing privateKey"))?;
        let secret_bytes = Zeroizing::new(decode_key(path, &encoded)?);
        let custodian = Self::from_secret_bytes(*secret_bytes);

        let declared = decode_key(path, &file.public_key)?;
        if declared != custodian.public_key() {
            return Err(config_err(path, "publicKey does not match privateKey"));
        }

        info!(
            path = %path.display(),
            fingerprint = %custodian.fingerprint(),
            "custodian keypair loaded"
        );
        Ok(custodian)
    }

    /// Load a wrap-only custodian from a public key file.
    ///
    /// # Errors
    ///
    /// Returns [`CustodyError::Configuration`] if the file is missing or malformed.
    pub fn load_public(path: &Path) -> Result<Self, CustodyError> {
        let file = read_key_file(path)?;
        let public = decode_key(path, &file.public_key)?;
        let custodian = Self::public_only(public);
        debug!(fingerprint = %custodian.fingerprint(), "public key loaded");
        Ok(custodian)
    }

    /// Persist the keypair to `dir` as `custodian.key` (0600) and `custodian.pub`.
    ///
    /// # Errors
    ///
    /// Returns [`CustodyError::Unavailable`] for a wrap-only custodian and
    /// [`CustodyError::Configuration`] when the files cannot be written.
    pub fn save(&self, dir: &Path) -> Result<KeyPaths, CustodyError> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| CustodyError::Unavailable("no private key to save".to_owned()))?;

        fs::create_dir_all(dir).map_err(|e| config_err(dir, &e.to_string()))?;
        let paths = KeyPaths {
            private: dir.join(PRIVATE_KEY_FILE),
            public: dir.join(PUBLIC_KEY_FILE),
        };

        let public_key = STANDARD.encode(self.public.as_bytes());
        let full = KeyFile {
            public_key: public_key.clone(),
            private_key: Some(STANDARD.encode(secret.as_bytes())),
        };
        let body = Zeroizing::new(
            serde_json::to_vec_pretty(&full).map_err(|e| config_err(dir, &e.to_string()))?,
        );
        write_private_file(&paths.private, &body)?;

        let public = KeyFile {
            public_key,
            private_key: None,
        };
        let body =
            serde_json::to_vec_pretty(&public).map_err(|e| config_err(dir, &e.to_string()))?;
        fs::write(&paths.public, body).map_err(|e| config_err(&paths.public, &e.to_string()))?;

        info!(
            dir = %dir.display(),
            fingerprint = %self.fingerprint(),
            "custodian keypair written"
        );
        Ok(paths)
    }
}

#[async_trait]
impl KeyCustodian for LocalCustodian {
    async fn wrap(&self, data_key: &DataKey) -> Result<Vec<u8>, CustodyError> {
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&self.public);
        if !shared.was_contributory() {
            return Err(CustodyError::Configuration(
                "custodian public key is a low-order point".to_owned(),
            ));
        }

        let kek = derive_kek(shared.as_bytes(), ephemeral_public.as_bytes(), self.public.as_bytes())?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&kek[..]));
        let sealed = cipher
            .encrypt(Nonce::from_slice(&WRAP_NONCE), &data_key.as_bytes()[..])
            .map_err(|_| CustodyError::Configuration("failed to seal data key".to_owned()))?;

        let mut wrapped = Vec::with_capacity(WRAPPED_KEY_LEN);
        wrapped.extend_from_slice(ephemeral_public.as_bytes());
        wrapped.extend_from_slice(&sealed);
        Ok(wrapped)
    }

    async fn unwrap(&self, wrapped: &[u8]) -> Result<DataKey, CustodyError> {
        let secret = self.secret.as_ref().ok_or_else(|| {
            CustodyError::Unavailable("custodian was loaded without a private key".to_owned())
        })?;

        if wrapped.len() != WRAPPED_KEY_LEN {
            return Err(CustodyError::Corruption(format!(
                "expected {WRAPPED_KEY_LEN} bytes, found {}",
                wrapped.len()
            )));
        }
        let (ephemeral_bytes, sealed) = wrapped.split_at(32);
        let ephemeral_bytes: [u8; 32] = ephemeral_bytes
            .try_into()
            .map_err(|_| CustodyError::Corruption("bad ephemeral key".to_owned()))?;
        let ephemeral_public = PublicKey::from(ephemeral_bytes);

        let shared = secret.diffie_hellman(&ephemeral_public);
        if !shared.was_contributory() {
            return Err(CustodyError::Corruption(
                "ephemeral key is a low-order point".to_owned(),
            ));
        }

        let kek = derive_kek(shared.as_bytes(), ephemeral_public.as_bytes(), self.public.as_bytes())?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&kek[..]));
        let opened = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&WRAP_NONCE), sealed)
                .map_err(|_| CustodyError::KeyMismatch)?,
        );
        let bytes: [u8; DATA_KEY_LEN] = opened
            .as_slice()
            .try_into()
            .map_err(|_| CustodyError::Corruption("unwrapped key has wrong length".to_owned()))?;
        Ok(DataKey::from_bytes(bytes))
    }
}

fn derive_kek(
    shared: &[u8; 32],
    ephemeral_public: &[u8; 32],
    recipient_public: &[u8; 32],
) -> Result<Zeroizing<[u8; 32]>, CustodyError> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral_public);
    salt[32..].copy_from_slice(recipient_public);

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut kek = Zeroizing::new([0u8; 32]);
    hk.expand(KEK_INFO, &mut *kek)
        .map_err(|_| CustodyError::Configuration("HKDF output length rejected".to_owned()))?;
    Ok(kek)
}

fn read_key_file(path: &Path) -> Result<KeyFile, CustodyError> {
    let contents = Zeroizing::new(
        fs::read_to_string(path).map_err(|e| config_err(path, &e.to_string()))?,
    );
    serde_json::from_str(&contents).map_err(|e| {
        config_err(
            path,
            &format!("invalid key file at line {} column {}", e.line(), e.column()),
        )
    })
}

fn decode_key(path: &Path, encoded: &str) -> Result<[u8; 32], CustodyError> {
    let bytes = Zeroizing::new(
        STANDARD
            .decode(encoded.trim())
            .map_err(|_| config_err(path, "key is not valid base64"))?,
    );
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| config_err(path, "key must be 32 bytes"))
}

fn write_private_file(path: &Path, body: &[u8]) -> Result<(), CustodyError> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .map_err(|e| config_err(path, &e.to_string()))?;
    file.write_all(body)
        .and_then(|()| file.sync_all())
        .map_err(|e| config_err(path, &e.to_string()))?;
    crate::credentials::enforce_private_file_permissions(path)
        .map_err(|e| config_err(path, &format!("{e:#}")))
}

fn config_err(path: &Path, detail: &str) -> CustodyError {
    CustodyError::Configuration(format!("{}: {detail}", path.display()))
}
