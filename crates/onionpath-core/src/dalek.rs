//! Backend built on the dalek curve crates, BLAKE3 and XChaCha20
//!
//! - identity: Ed25519 seed keypairs
//! - agreement: X25519 over the Montgomery form of the same keys
//! - hashing: BLAKE3 (keyed mode for MACs and nonce mixing)
//! - stream cipher: XChaCha20

use crate::backend::{CryptoBackend, HMAC_KEY_SIZE};
use crate::error::{CryptoError, Result};
use crate::types::*;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::XChaCha20;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

/// Derive-key context for the base shared key
pub const DH_CONTEXT: &str = "onionpath 2024-01 hop dh v1";

/// The shipped [`CryptoBackend`]
#[derive(Debug, Default, Clone, Copy)]
pub struct DalekBackend;

impl DalekBackend {
    pub const fn new() -> Self {
        Self
    }
}

fn agreement_secret(sk: &SecretKey) -> StaticSecret {
    let signing_key = SigningKey::from_bytes(sk.as_bytes());
    StaticSecret::from(signing_key.to_scalar_bytes())
}

fn agreement_public(pk: &PublicKey) -> Result<X25519Public> {
    let verifying_key = VerifyingKey::from_bytes(pk.as_bytes())
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    Ok(X25519Public::from(verifying_key.to_montgomery().to_bytes()))
}

fn local_public(sk: &SecretKey) -> PublicKey {
    PublicKey(SigningKey::from_bytes(sk.as_bytes()).verifying_key().to_bytes())
}

/// Shared key derivation common to both roles.
///
/// `base  = BLAKE3_DERIVE(DH_CONTEXT, client_pk || server_pk || X25519(local, remote))`
/// `final = BLAKE3_KEYED(nonce, base)`
fn dh(
    client_pk: &PublicKey,
    server_pk: &PublicKey,
    remote: &PublicKey,
    local: &SecretKey,
    nonce: &TunnelNonce,
) -> Result<SharedKey> {
    let shared = agreement_secret(local).diffie_hellman(&agreement_public(remote)?);
    if !shared.was_contributory() {
        return Err(CryptoError::DegenerateAgreement);
    }

    let mut hasher = blake3::Hasher::new_derive_key(DH_CONTEXT);
    hasher.update(client_pk.as_bytes());
    hasher.update(server_pk.as_bytes());
    hasher.update(shared.as_bytes());
    let base = hasher.finalize();

    let mut hasher = blake3::Hasher::new_keyed(nonce.as_bytes());
    hasher.update(base.as_bytes());
    Ok(SharedKey::from_bytes(*hasher.finalize().as_bytes()))
}

impl CryptoBackend for DalekBackend {
    fn randomize(&self, buf: &mut [u8]) {
        OsRng.fill_bytes(buf);
    }

    fn keygen(&self) -> Keypair {
        let mut seed = [0u8; SECKEY_SIZE];
        self.randomize(&mut seed);
        let secret = SecretKey::from_bytes(seed);
        seed.zeroize();
        let public = local_public(&secret);
        Keypair { secret, public }
    }

    fn dh_client(
        &self,
        server_pk: &PublicKey,
        nonce: &TunnelNonce,
        client_sk: &SecretKey,
    ) -> Result<SharedKey> {
        let client_pk = local_public(client_sk);
        dh(&client_pk, server_pk, server_pk, client_sk, nonce)
    }

    fn dh_server(
        &self,
        client_pk: &PublicKey,
        nonce: &TunnelNonce,
        server_sk: &SecretKey,
    ) -> Result<SharedKey> {
        let server_pk = local_public(server_sk);
        dh(client_pk, &server_pk, client_pk, server_sk, nonce)
    }

    fn hash(&self, buf: &[u8]) -> Digest {
        Digest(*blake3::hash(buf).as_bytes())
    }

    fn hmac(&self, buf: &[u8], key: &[u8; HMAC_KEY_SIZE]) -> Digest {
        Digest(*blake3::keyed_hash(key, buf).as_bytes())
    }

    fn sign(&self, sk: &SecretKey, buf: &[u8]) -> Signature {
        let signing_key = SigningKey::from_bytes(sk.as_bytes());
        Signature(signing_key.sign(buf).to_bytes())
    }

    fn verify(&self, pk: &PublicKey, buf: &[u8], sig: &Signature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(pk.as_bytes()) else {
            return false;
        };
        let sig = ed25519_dalek::Signature::from_bytes(sig.as_bytes());
        verifying_key.verify_strict(buf, &sig).is_ok()
    }

    fn xchacha20_xor(&self, buf: &mut [u8], key: &SharedKey, nonce: &Nonce) {
        let mut cipher = XChaCha20::new(
            chacha20::Key::from_slice(key.as_bytes()),
            chacha20::XNonce::from_slice(nonce.as_bytes()),
        );
        cipher.apply_keystream(buf);
    }
}
