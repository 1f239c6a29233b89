//! Error types for the cryptographic backend

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Cryptographic failures
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Point agreement produced the identity (small-order peer key)
    #[error("degenerate key agreement")]
    DegenerateAgreement,

    /// Bytes do not decode to a valid curve point
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// The OS random source could not be read
    #[error("random source unavailable: {0}")]
    RandomSourceUnavailable(String),

    /// A backend operation was requested before `init`
    #[error("crypto backend not initialized")]
    NotInitialized,
}
