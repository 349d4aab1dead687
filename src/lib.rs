//! Redline: an encrypted findings pipeline.
//!
//! Encrypted scan findings are decrypted under custody, redacted, turned
//! into remediation plans, re-encrypted, and released only through an
//! authenticated on-demand gateway.
//!
//! See `DESIGN.md` for the architecture.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod artifacts;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod logging;
pub mod record;
pub mod redaction;

pub mod gateway;
pub mod ingest;
pub mod plan;

pub mod runtime;
