//! Relay side of a path hop
//!
//! A relay holds exactly one shared key per path: the one it agreed with the
//! path's owner. It can authenticate and strip its own layer on the way out
//! and add its layer on the way back, nothing more.

use crate::onion::{self, OnionError};
use onionpath_core::{CryptoBackend, CryptoError, PublicKey, SecretKey, SharedKey, TunnelNonce};
use std::fmt;
use tracing::trace;

/// One relay's keys for one path
pub struct RelaySession {
    /// Key of the path owner that opened this session
    pub client_public_key: PublicKey,
    /// Session nonce chosen by the path owner
    pub nonce: TunnelNonce,
    shared_key: SharedKey,
}

impl RelaySession {
    /// Accept a hop handshake with the server side of the agreement.
    pub fn accept(
        backend: &dyn CryptoBackend,
        client_public_key: PublicKey,
        nonce: TunnelNonce,
        relay_sk: &SecretKey,
    ) -> Result<Self, CryptoError> {
        let shared_key = backend.dh_server(&client_public_key, &nonce, relay_sk)?;
        Ok(Self {
            client_public_key,
            nonce,
            shared_key,
        })
    }

    /// Strip this relay's layer from an outbound frame.
    pub fn peel(&self, backend: &dyn CryptoBackend, frame: &[u8]) -> Result<Vec<u8>, OnionError> {
        let inner = onion::peel_frame(backend, &self.shared_key, &self.nonce, frame)?;
        trace!(from = %self.client_public_key, len = inner.len(), "peeled layer");
        Ok(inner)
    }

    /// Add this relay's layer to an inbound frame.
    pub fn wrap(&self, backend: &dyn CryptoBackend, frame: &[u8]) -> Result<Vec<u8>, OnionError> {
        onion::wrap_frame(backend, &self.shared_key, &self.nonce, frame)
    }
}

impl fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelaySession")
            .field("client_public_key", &self.client_public_key)
            .finish_non_exhaustive()
    }
}
