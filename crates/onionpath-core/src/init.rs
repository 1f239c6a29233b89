//! Process-wide backend lifecycle
//!
//! The backend is selected and checked once at startup. Failure here means the
//! process cannot offer any security guarantee, so callers treat it as fatal.

use crate::backend::CryptoBackend;
use crate::dalek::DalekBackend;
use crate::error::{CryptoError, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::OnceLock;
use tracing::{debug, warn};

static BACKEND: OnceLock<Box<dyn CryptoBackend>> = OnceLock::new();

/// Initialize the process-wide backend with [`DalekBackend`].
///
/// Idempotent: later calls return the backend chosen by the first
/// successful call.
pub fn init() -> Result<&'static dyn CryptoBackend> {
    init_with(Box::new(DalekBackend::new()))
}

/// Initialize the process-wide backend with a caller-chosen implementation.
pub fn init_with(backend: Box<dyn CryptoBackend>) -> Result<&'static dyn CryptoBackend> {
    if let Some(existing) = BACKEND.get() {
        warn!("crypto backend already initialized, keeping the first one");
        return Ok(existing.as_ref());
    }

    // Prove the entropy source works before anything depends on it
    let mut probe = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut probe)
        .map_err(|e| CryptoError::RandomSourceUnavailable(e.to_string()))?;

    let backend = BACKEND.get_or_init(|| backend);
    debug!("crypto backend initialized");
    Ok(backend.as_ref())
}

/// The initialized backend. Never initializes lazily.
pub fn backend() -> Result<&'static dyn CryptoBackend> {
    BACKEND
        .get()
        .map(|b| b.as_ref())
        .ok_or(CryptoError::NotInitialized)
}
