//! Onion path cryptographic core
//!
//! This crate provides the fixed-size key types and the pluggable
//! cryptographic backend used by every other onionpath crate.
//!
//! # Modules
//!
//! - [`types`]: Keys, nonces, digests and signatures
//! - [`backend`]: The [`CryptoBackend`] capability set
//! - [`dalek`]: The shipped backend (Ed25519/X25519, BLAKE3, XChaCha20)
//! - [`init`]: One-time process-wide initialization
//! - [`time`]: Wall-clock helpers
//! - [`error`]: Error types

pub mod backend;
pub mod dalek;
pub mod error;
pub mod init;
pub mod time;
pub mod types;

pub use backend::{random_tunnel_nonce, random_u64, CryptoBackend, HMAC_KEY_SIZE};
pub use dalek::DalekBackend;
pub use error::{CryptoError, Result};
pub use init::{backend, init, init_with};
pub use time::time_now_ms;
pub use types::*;
