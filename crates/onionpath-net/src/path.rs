//! Established paths and their per-hop onion encryption
//!
//! A [`Path`] is handed to us by path construction with every hop's shared key
//! already agreed. From then on it only encrypts outbound routing messages
//! and peels inbound ones. Any integrity failure breaks the path for good.

use crate::onion::{self, Direction, OnionError};
use crate::routing::{RoutingError, RoutingMessage};
use crate::transport::RoutingTransport;
use onionpath_core::{
    time_now_ms, CryptoBackend, CryptoError, PublicKey, SecretKey, SharedKey, TunnelNonce,
};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Default lifetime of hop keys
pub const DEFAULT_PATH_LIFETIME: Duration = Duration::from_secs(10 * 60);

/// Path errors
#[derive(Debug, Error)]
pub enum PathError {
    #[error("Path is {0:?}, not established")]
    NotEstablished(PathStatus),
    #[error("Path has no hops")]
    NoHops,
    #[error("Path is not building")]
    NotBuilding,
    #[error("Onion integrity failure")]
    Integrity,
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Routing message error: {0}")]
    Routing(#[from] RoutingError),
}

/// Path identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PathId(pub [u8; 16]);

impl PathId {
    /// Random identifier
    pub fn random(backend: &dyn CryptoBackend) -> Self {
        let mut id = [0u8; 16];
        backend.randomize(&mut id);
        Self(id)
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Path lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    /// Hops are still being added
    Building,
    /// Usable for encrypt/decrypt
    Established,
    /// Key lifetime exceeded or a hop reported failure
    Expired,
    /// Integrity failure or transport error
    Broken,
}

impl PathStatus {
    /// Terminal states never return to `Established`
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Expired | Self::Broken)
    }
}

/// One relay in a path
pub struct Hop {
    /// Relay identity key
    pub remote_public_key: PublicKey,
    /// Session nonce of the key exchange
    pub nonce: TunnelNonce,
    shared_key: SharedKey,
}

impl Hop {
    /// Wrap an already agreed shared key.
    pub fn new(remote_public_key: PublicKey, shared_key: SharedKey, nonce: TunnelNonce) -> Self {
        Self {
            remote_public_key,
            nonce,
            shared_key,
        }
    }

    /// Run the client side of the agreement for this hop.
    pub fn derive(
        backend: &dyn CryptoBackend,
        remote_public_key: PublicKey,
        nonce: TunnelNonce,
        client_sk: &SecretKey,
    ) -> Result<Self, CryptoError> {
        let shared_key = backend.dh_client(&remote_public_key, &nonce, client_sk)?;
        Ok(Self::new(remote_public_key, shared_key, nonce))
    }
}

impl fmt::Debug for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hop")
            .field("remote_public_key", &self.remote_public_key)
            .finish_non_exhaustive()
    }
}

/// Path information snapshot
#[derive(Debug, Clone)]
pub struct PathInfo {
    pub id: PathId,
    pub hops: usize,
    pub status: PathStatus,
    pub created_at: u64,
    pub messages_sent: u64,
}

struct PathState {
    status: PathStatus,
    /// Cleared (and zeroized) when the path leaves `Established`
    hops: Vec<Hop>,
}

/// An ordered sequence of hops, nearest first
pub struct Path {
    id: PathId,
    state: RwLock<PathState>,
    /// Per-message sequence feeding outbound message nonces
    sequence: AtomicU64,
    created_at: u64,
    lifetime: Duration,
}

impl Path {
    /// Start building a path
    pub fn new(id: PathId, lifetime: Duration) -> Self {
        Self {
            id,
            state: RwLock::new(PathState {
                status: PathStatus::Building,
                hops: Vec::new(),
            }),
            sequence: AtomicU64::new(0),
            created_at: time_now_ms(),
            lifetime,
        }
    }

    /// Wrap hops whose keys are already agreed into an established path
    pub fn established(id: PathId, hops: Vec<Hop>, lifetime: Duration) -> Result<Self, PathError> {
        let path = Self::new(id, lifetime);
        for hop in hops {
            path.add_hop(hop)?;
        }
        path.establish()?;
        Ok(path)
    }

    /// Append the next-farther hop while building
    pub fn add_hop(&self, hop: Hop) -> Result<(), PathError> {
        let mut state = self.state.write();
        if state.status != PathStatus::Building {
            return Err(PathError::NotBuilding);
        }
        state.hops.push(hop);
        Ok(())
    }

    /// Finish building. Hop order is fixed from here on.
    pub fn establish(&self) -> Result<(), PathError> {
        let mut state = self.state.write();
        if state.status != PathStatus::Building {
            return Err(PathError::NotBuilding);
        }
        if state.hops.is_empty() {
            return Err(PathError::NoHops);
        }
        state.status = PathStatus::Established;
        debug!(path = %self.id, hops = state.hops.len(), "path established");
        Ok(())
    }

    pub fn id(&self) -> PathId {
        self.id
    }

    pub fn status(&self) -> PathStatus {
        self.state.read().status
    }

    pub fn is_established(&self) -> bool {
        self.status() == PathStatus::Established
    }

    /// Number of hops (zero once the keys are destroyed)
    pub fn hop_count(&self) -> usize {
        self.state.read().hops.len()
    }

    /// Nearest hop's identity
    pub fn first_hop(&self) -> Option<PublicKey> {
        self.state.read().hops.first().map(|h| h.remote_public_key)
    }

    /// Farthest hop's identity
    pub fn endpoint(&self) -> Option<PublicKey> {
        self.state.read().hops.last().map(|h| h.remote_public_key)
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Snapshot for logging and stats
    pub fn info(&self) -> PathInfo {
        PathInfo {
            id: self.id,
            hops: self.hop_count(),
            status: self.status(),
            created_at: self.created_at,
            messages_sent: self.sequence.load(Ordering::Relaxed),
        }
    }

    /// Key lifetime exceeded or a hop failure was reported
    pub fn mark_expired(&self) -> bool {
        self.terminate(PathStatus::Expired)
    }

    /// Integrity failure or transport error
    pub fn mark_broken(&self) -> bool {
        self.terminate(PathStatus::Broken)
    }

    /// Expire the path if its keys have outlived their lifetime at `now` (ms).
    pub fn expire_if_stale(&self, now: u64) -> bool {
        let age = now.saturating_sub(self.created_at);
        if self.is_established() && age >= self.lifetime.as_millis() as u64 {
            return self.mark_expired();
        }
        false
    }

    fn terminate(&self, to: PathStatus) -> bool {
        let mut state = self.state.write();
        if state.status.is_terminal() {
            return false;
        }
        state.status = to;
        // Dropping the hops zeroizes their shared keys
        state.hops.clear();
        drop(state);
        debug!(path = %self.id, status = ?to, "path terminated");
        true
    }

    /// Onion-encrypt `plaintext` for the farthest hop.
    ///
    /// Layers are applied farthest hop first so the nearest hop's layer is
    /// outermost. Every call draws a new message nonce from the path sequence.
    pub fn encrypt_outbound(
        &self,
        backend: &dyn CryptoBackend,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, PathError> {
        let state = self.state.read();
        if state.status != PathStatus::Established {
            return Err(PathError::NotEstablished(state.status));
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let nonce = onion::message_nonce(backend, sequence);

        let mut body = plaintext.to_vec();
        for hop in state.hops.iter().rev() {
            body = onion::seal_layer(
                backend,
                &hop.shared_key,
                &hop.nonce,
                &nonce,
                Direction::Outbound,
                body,
            );
        }

        Ok(onion::frame(Direction::Outbound, &nonce, &body))
    }

    /// Peel every layer of an inbound onion, nearest hop first.
    ///
    /// Layers are opened in the direction the frame header names, so the
    /// owner can also open its own outbound onions. Any failed tag breaks the
    /// path. The error does not say which layer.
    pub fn decrypt_inbound(
        &self,
        backend: &dyn CryptoBackend,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, PathError> {
        let result = {
            let state = self.state.read();
            if state.status != PathStatus::Established {
                return Err(PathError::NotEstablished(state.status));
            }
            Self::peel_all(backend, &state.hops, ciphertext)
        };

        result.map_err(|_| {
            warn!(path = %self.id, "inbound integrity failure, breaking path");
            self.mark_broken();
            PathError::Integrity
        })
    }

    fn peel_all(
        backend: &dyn CryptoBackend,
        hops: &[Hop],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, OnionError> {
        let (direction, nonce, layers) = onion::split_frame(ciphertext)?;
        let mut body = layers.to_vec();
        for hop in hops {
            body = onion::open_layer(backend, &hop.shared_key, &hop.nonce, &nonce, direction, &body)?;
        }
        Ok(body)
    }

    /// Encode, onion-encrypt and hand `message` to the transport.
    ///
    /// The message is consumed whether or not the send is accepted.
    pub fn send_routing_message(
        &self,
        backend: &dyn CryptoBackend,
        message: RoutingMessage,
        transport: &dyn RoutingTransport,
    ) -> bool {
        let txid = message.txid();
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(path = %self.id, txid, "failed to encode routing message: {}", e);
                return false;
            }
        };

        let onion = match self.encrypt_outbound(backend, &payload) {
            Ok(onion) => onion,
            Err(e) => {
                debug!(path = %self.id, txid, "not sending: {}", e);
                return false;
            }
        };

        let Some(first_hop) = self.first_hop() else {
            return false;
        };

        let accepted = transport.send(&self.id, &first_hop, onion);
        debug!(path = %self.id, txid, accepted, "routing message handed to transport");
        accepted
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Path")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("hops", &self.hop_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onionpath_core::{random_tunnel_nonce, DalekBackend};

    const BACKEND: DalekBackend = DalekBackend::new();

    fn three_hop_path() -> Path {
        let client = BACKEND.keygen();
        let hops = (0..3)
            .map(|_| {
                let relay = BACKEND.keygen();
                Hop::derive(&BACKEND, relay.public, random_tunnel_nonce(&BACKEND), &client.secret)
                    .unwrap()
            })
            .collect();
        Path::established(PathId::random(&BACKEND), hops, DEFAULT_PATH_LIFETIME).unwrap()
    }

    #[test]
    fn test_building_lifecycle() {
        let path = Path::new(PathId([1u8; 16]), DEFAULT_PATH_LIFETIME);
        assert_eq!(path.status(), PathStatus::Building);
        assert!(matches!(path.establish(), Err(PathError::NoHops)));
        assert!(matches!(
            path.encrypt_outbound(&BACKEND, b"x"),
            Err(PathError::NotEstablished(PathStatus::Building))
        ));

        let relay = BACKEND.keygen();
        let client = BACKEND.keygen();
        let hop = Hop::derive(&BACKEND, relay.public, TunnelNonce([0u8; 32]), &client.secret).unwrap();
        path.add_hop(hop).unwrap();
        path.establish().unwrap();
        assert!(path.is_established());
        assert_eq!(path.first_hop(), Some(relay.public));
        assert_eq!(path.endpoint(), Some(relay.public));

        let late = Hop::derive(&BACKEND, relay.public, TunnelNonce([1u8; 32]), &client.secret).unwrap();
        assert!(matches!(path.add_hop(late), Err(PathError::NotBuilding)));
    }

    #[test]
    fn test_onion_roundtrip() {
        let path = three_hop_path();
        let ciphertext = path.encrypt_outbound(&BACKEND, b"find me a service").unwrap();

        assert_eq!(
            ciphertext.len(),
            onion::FRAME_HEADER_SIZE + 3 * onion::TAG_SIZE + 17
        );
        let plaintext = path.decrypt_inbound(&BACKEND, &ciphertext).unwrap();
        assert_eq!(plaintext, b"find me a service");
    }

    #[test]
    fn test_same_plaintext_encrypts_differently() {
        let path = three_hop_path();
        let a = path.encrypt_outbound(&BACKEND, b"same").unwrap();
        let b = path.encrypt_outbound(&BACKEND, b"same").unwrap();
        assert_ne!(a, b);
        assert_eq!(path.info().messages_sent, 2);
    }

    #[test]
    fn test_corruption_breaks_path() {
        let path = three_hop_path();
        let mut ciphertext = path.encrypt_outbound(&BACKEND, b"hello").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;

        assert!(matches!(
            path.decrypt_inbound(&BACKEND, &ciphertext),
            Err(PathError::Integrity)
        ));
        assert_eq!(path.status(), PathStatus::Broken);
        assert_eq!(path.hop_count(), 0);
        assert!(matches!(
            path.encrypt_outbound(&BACKEND, b"again"),
            Err(PathError::NotEstablished(PathStatus::Broken))
        ));
    }

    #[test]
    fn test_truncated_frame_is_integrity_failure() {
        let path = three_hop_path();
        assert!(matches!(
            path.decrypt_inbound(&BACKEND, &[0u8; 10]),
            Err(PathError::Integrity)
        ));
        assert_eq!(path.status(), PathStatus::Broken);
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let path = three_hop_path();
        assert!(path.mark_expired());
        assert!(!path.mark_broken());
        assert_eq!(path.status(), PathStatus::Expired);
    }

    #[test]
    fn test_expire_if_stale() {
        let path = three_hop_path();
        let lifetime_ms = path.lifetime().as_millis() as u64;

        assert!(!path.expire_if_stale(path.created_at() + lifetime_ms - 1));
        assert!(path.is_established());

        assert!(path.expire_if_stale(path.created_at() + lifetime_ms));
        assert_eq!(path.status(), PathStatus::Expired);
    }
}
