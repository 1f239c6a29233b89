//! The pluggable cryptographic capability set
//!
//! Every other layer performs its cryptographic work through
//! [`CryptoBackend`]. Implementations must be interchangeable: identical inputs
//! give identical outputs for the deterministic operations, and the same
//! security properties hold for the randomized ones.

use crate::error::Result;
use crate::types::*;

/// Key size accepted by [`CryptoBackend::hmac`]
pub const HMAC_KEY_SIZE: usize = 32;

/// Cryptographic primitives used by paths and lookups.
///
/// All operations are pure functions of their explicit inputs apart from
/// `randomize`/`keygen`, which draw from the process-wide secure random
/// source. Implementations must be safe to call from many threads at once.
pub trait CryptoBackend: Send + Sync {
    /// Fill `buf` with cryptographically secure random bytes.
    fn randomize(&self, buf: &mut [u8]);

    /// Generate a fresh signing/agreement keypair.
    fn keygen(&self) -> Keypair;

    /// Client side of the per-hop key agreement.
    fn dh_client(
        &self,
        server_pk: &PublicKey,
        nonce: &TunnelNonce,
        client_sk: &SecretKey,
    ) -> Result<SharedKey>;

    /// Server side of the per-hop key agreement.
    ///
    /// Yields the same key as [`dh_client`](Self::dh_client) for matching
    /// keypairs and nonce.
    fn dh_server(
        &self,
        client_pk: &PublicKey,
        nonce: &TunnelNonce,
        server_sk: &SecretKey,
    ) -> Result<SharedKey>;

    /// Unkeyed digest of `buf`.
    fn hash(&self, buf: &[u8]) -> Digest;

    /// Keyed digest of `buf`, used as an authentication tag.
    fn hmac(&self, buf: &[u8], key: &[u8; HMAC_KEY_SIZE]) -> Digest;

    /// Detached signature over `buf`.
    fn sign(&self, sk: &SecretKey, buf: &[u8]) -> Signature;

    /// True iff `sig` was made by the owner of `pk` over exactly `buf`.
    fn verify(&self, pk: &PublicKey, buf: &[u8], sig: &Signature) -> bool;

    /// XOR `buf` in place with the XChaCha20 keystream for `(key, nonce)`.
    ///
    /// Applying it twice restores the input. The caller must never reuse a
    /// `(key, nonce)` pair for two different plaintexts.
    fn xchacha20_xor(&self, buf: &mut [u8], key: &SharedKey, nonce: &Nonce);
}

/// Draw a fresh DH exchange nonce.
pub fn random_tunnel_nonce(backend: &dyn CryptoBackend) -> TunnelNonce {
    let mut bytes = [0u8; TUNNEL_NONCE_SIZE];
    backend.randomize(&mut bytes);
    TunnelNonce(bytes)
}

/// Draw a fresh random u64 (transaction ids and the like).
pub fn random_u64(backend: &dyn CryptoBackend) -> u64 {
    let mut bytes = [0u8; 8];
    backend.randomize(&mut bytes);
    u64::from_le_bytes(bytes)
}
