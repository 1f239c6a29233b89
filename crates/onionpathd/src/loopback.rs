//! In-process relays and service endpoint
//!
//! Stands in for the network: onions handed to [`LoopbackNetwork::send`] are
//! peeled by each relay in turn, answered by the endpoint, and wrapped back
//! into an inbound onion queued for the path owner.

use onionpath_core::{random_tunnel_nonce, CryptoBackend, PublicKey};
use onionpath_net::onion;
use onionpath_net::{
    Direction, Hop, OnionError, Path, PathError, PathId, RelaySession, RoutingError,
    RoutingMessage, RoutingTransport, ServiceRecord,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Why the loopback dropped an onion
#[derive(Debug, Error)]
pub enum LoopbackError {
    #[error("Relay {hop} rejected onion: {source}")]
    Relay { hop: usize, source: OnionError },
    #[error("Onion error: {0}")]
    Onion(#[from] OnionError),
    #[error("Routing message error: {0}")]
    Routing(#[from] RoutingError),
}

pub struct LoopbackNetwork {
    backend: &'static dyn CryptoBackend,
    path: PathId,
    first_hop: PublicKey,
    relays: Vec<RelaySession>,
    records: RwLock<HashMap<String, ServiceRecord>>,
    replies: Mutex<VecDeque<Vec<u8>>>,
    sequence: AtomicU64,
}

impl LoopbackNetwork {
    /// Build a path of `hops` fresh relays and the network that carries it.
    ///
    /// Each hop's key is agreed twice: by the path owner as client and by the
    /// relay as server.
    pub fn build(
        backend: &'static dyn CryptoBackend,
        hops: usize,
        lifetime: Duration,
    ) -> Result<(Path, Self), PathError> {
        let client = backend.keygen();
        let mut path_hops = Vec::with_capacity(hops);
        let mut relays = Vec::with_capacity(hops);

        for _ in 0..hops {
            let relay = backend.keygen();
            let nonce = random_tunnel_nonce(backend);
            path_hops.push(Hop::derive(backend, relay.public, nonce, &client.secret)?);
            relays.push(RelaySession::accept(
                backend,
                client.public,
                nonce,
                &relay.secret,
            )?);
        }

        let path = Path::established(PathId::random(backend), path_hops, lifetime)?;
        let first_hop = path.first_hop().ok_or(PathError::NoHops)?;
        debug!(path = %path.id(), hops, "loopback path established");

        let network = Self {
            backend,
            path: path.id(),
            first_hop,
            relays,
            records: RwLock::new(HashMap::new()),
            replies: Mutex::new(VecDeque::new()),
            sequence: AtomicU64::new(0),
        };
        Ok((path, network))
    }

    /// Make `record` answerable by the endpoint
    pub fn publish(&self, record: ServiceRecord) {
        self.records.write().insert(record.name.clone(), record);
    }

    /// Take every queued inbound onion
    pub fn drain_replies(&self) -> Vec<Vec<u8>> {
        self.replies.lock().drain(..).collect()
    }

    pub fn pending_replies(&self) -> usize {
        self.replies.lock().len()
    }

    fn answer(&self, request: RoutingMessage) -> Option<RoutingMessage> {
        match request {
            RoutingMessage::FindService { txid, name } => {
                let reply = match self.records.read().get(&name) {
                    Some(record) => RoutingMessage::ServiceFound {
                        txid,
                        record: record.clone(),
                    },
                    None => RoutingMessage::ServiceNotFound { txid },
                };
                Some(reply)
            }
            other => {
                debug!(txid = other.txid(), "endpoint ignoring non-request");
                None
            }
        }
    }

    /// Run the request through the relays and queue the endpoint's reply
    fn deliver(&self, request: Vec<u8>) -> Result<(), LoopbackError> {
        let mut frame = request;
        for (hop, relay) in self.relays.iter().enumerate() {
            frame = relay
                .peel(self.backend, &frame)
                .map_err(|source| LoopbackError::Relay { hop, source })?;
        }

        let (_, _, body) = onion::split_frame(&frame)?;
        let request = RoutingMessage::decode(body)?;
        let Some(reply) = self.answer(request) else {
            return Ok(());
        };

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let nonce = onion::message_nonce(self.backend, sequence);
        let mut frame = onion::frame(Direction::Inbound, &nonce, &reply.encode()?);
        for relay in self.relays.iter().rev() {
            frame = relay.wrap(self.backend, &frame)?;
        }

        trace!(txid = reply.txid(), len = frame.len(), "reply queued");
        self.replies.lock().push_back(frame);
        Ok(())
    }
}

impl RoutingTransport for LoopbackNetwork {
    fn send(&self, path: &PathId, first_hop: &PublicKey, request: Vec<u8>) -> bool {
        if *path != self.path || *first_hop != self.first_hop {
            warn!(path = %path, "no route to {}", first_hop);
            return false;
        }
        match self.deliver(request) {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %path, "loopback delivery failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onionpath_net::DEFAULT_PATH_LIFETIME;

    fn network(hops: usize) -> (Path, LoopbackNetwork) {
        let backend = onionpath_core::init().unwrap();
        LoopbackNetwork::build(backend, hops, DEFAULT_PATH_LIFETIME).unwrap()
    }

    #[test]
    fn test_build_path() {
        let (path, net) = network(3);
        assert!(path.is_established());
        assert_eq!(path.hop_count(), 3);
        assert_eq!(path.first_hop(), Some(net.first_hop));
    }

    #[test]
    fn test_endpoint_answers_through_relays() {
        let backend = onionpath_core::init().unwrap();
        let (path, net) = network(3);
        let identity = backend.keygen();
        let record = ServiceRecord::signed(backend, &identity, "library", vec![7]);
        net.publish(record.clone());

        let request = RoutingMessage::FindService {
            txid: 5,
            name: "library".into(),
        };
        assert!(path.send_routing_message(backend, request, &net));

        let replies = net.drain_replies();
        assert_eq!(replies.len(), 1);
        let plaintext = path.decrypt_inbound(backend, &replies[0]).unwrap();
        assert_eq!(
            RoutingMessage::decode(&plaintext).unwrap(),
            RoutingMessage::ServiceFound { txid: 5, record }
        );
    }

    #[test]
    fn test_unknown_name_not_found() {
        let backend = onionpath_core::init().unwrap();
        let (path, net) = network(1);
        let request = RoutingMessage::FindService {
            txid: 8,
            name: "nowhere".into(),
        };
        assert!(path.send_routing_message(backend, request, &net));

        let reply = net.drain_replies().pop().unwrap();
        let plaintext = path.decrypt_inbound(backend, &reply).unwrap();
        assert_eq!(
            RoutingMessage::decode(&plaintext).unwrap(),
            RoutingMessage::ServiceNotFound { txid: 8 }
        );
    }

    #[test]
    fn test_refuses_foreign_path() {
        let backend = onionpath_core::init().unwrap();
        let (_, net) = network(2);
        let (other, _) = network(2);
        let request = RoutingMessage::ServiceNotFound { txid: 1 };
        assert!(!other.send_routing_message(backend, request, &net));
        assert_eq!(net.pending_replies(), 0);
    }

    #[test]
    fn test_tampered_onion_rejected_by_first_relay() {
        let backend = onionpath_core::init().unwrap();
        let (path, net) = network(2);
        let mut onion = path.encrypt_outbound(backend, b"not a request").unwrap();
        let last = onion.len() - 1;
        onion[last] ^= 0x80;

        match net.deliver(onion) {
            Err(LoopbackError::Relay { hop: 0, source }) => {
                assert!(matches!(source, OnionError::Integrity))
            }
            other => panic!("unexpected delivery result {:?}", other),
        }
        assert!(!net.send(&path.id(), &net.first_hop, vec![0u8; 8]));
        assert_eq!(net.pending_replies(), 0);
    }

    #[test]
    fn test_undecodable_request_is_routing_error() {
        let backend = onionpath_core::init().unwrap();
        let (path, net) = network(1);
        let onion = path.encrypt_outbound(backend, &[0xff; 4]).unwrap();

        assert!(matches!(net.deliver(onion), Err(LoopbackError::Routing(_))));
        assert_eq!(net.pending_replies(), 0);
    }
}
