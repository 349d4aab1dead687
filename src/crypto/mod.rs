//! Key custody and envelope encryption.
//!
//! Findings and plans at rest are sealed with a fresh ChaCha20-Poly1305
//! data key per message. The data key is wrapped by a [`KeyCustodian`],
//! which is the only component that ever touches the long-lived private
//! key. The in-process [`LocalCustodian`] stands in for an HSM or KMS
//! client; swapping it out does not change the cipher, the ingest path,
//! or the gateway.
//!
//! There is no forward secrecy: whoever holds the custodian's private key
//! can open every envelope ever produced for it.

pub mod custody;
pub mod envelope;

pub use custody::{CustodyError, DataKey, KeyCustodian, LocalCustodian};
pub use envelope::{decrypt, encrypt, EnvelopeError, EnvelopeMessage};
