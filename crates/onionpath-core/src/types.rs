//! Fixed-size key material for the onion path layer
//!
//! Every key, nonce, digest and signature is a newtype over a fixed array so
//! that length mismatches are compile errors rather than runtime checks.
//! Secret-bearing types are zeroized on drop and never print their bytes.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a secret key seed
pub const SECKEY_SIZE: usize = 32;
/// Size of a public key
pub const PUBKEY_SIZE: usize = 32;
/// Size of a derived shared key
pub const SHAREDKEY_SIZE: usize = 32;
/// Size of the nonce mixed into DH-derived keys
pub const TUNNEL_NONCE_SIZE: usize = 32;
/// Size of an XChaCha20 nonce
pub const NONCE_SIZE: usize = 24;
/// Size of a hash or keyed-hash digest
pub const HASH_SIZE: usize = 32;
/// Size of a detached signature
pub const SIG_SIZE: usize = 64;

// =============================================================================
// SECRET MATERIAL
// =============================================================================

/// Ed25519 secret seed. Also yields the X25519 agreement scalar.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; SECKEY_SIZE]);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; SECKEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SECKEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// Symmetric key derived from a DH agreement. Never generated directly.
#[derive(PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; SHAREDKEY_SIZE]);

impl SharedKey {
    pub fn from_bytes(bytes: [u8; SHAREDKEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SHAREDKEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey(<redacted>)")
    }
}

/// Signing and agreement keypair
#[derive(Clone, Debug)]
pub struct Keypair {
    pub secret: SecretKey,
    pub public: PublicKey,
}

// =============================================================================
// PUBLIC VALUES
// =============================================================================

/// Ed25519 verifying key bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; PUBKEY_SIZE]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; PUBKEY_SIZE] {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Nonce chosen by the initiator of a DH exchange. Unique per exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TunnelNonce(pub [u8; TUNNEL_NONCE_SIZE]);

impl TunnelNonce {
    pub fn as_bytes(&self) -> &[u8; TUNNEL_NONCE_SIZE] {
        &self.0
    }
}

/// XChaCha20 nonce
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Nonce(pub [u8; NONCE_SIZE]);

impl Nonce {
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// Output of `hash` or `hmac`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest(pub [u8; HASH_SIZE]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Constant-time comparison, for authentication tags.
    pub fn ct_eq(&self, other: &Digest) -> bool {
        // blake3::Hash equality is constant time
        blake3::Hash::from(self.0) == blake3::Hash::from(other.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Detached Ed25519 signature
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature(pub [u8; SIG_SIZE]);

impl Signature {
    pub fn as_bytes(&self) -> &[u8; SIG_SIZE] {
        &self.0
    }
}
