//! Seam to the link layer
//!
//! Sockets, link sessions and peer connections live outside this crate. A path
//! only needs somewhere to hand its finished onion.

use crate::path::PathId;
use onionpath_core::PublicKey;
use std::sync::Arc;

/// Outbound hand-off for onion frames
pub trait RoutingTransport: Send + Sync {
    /// Queue `onion` for the first hop of `path`. Returns whether it was
    /// accepted; delivery is not guaranteed.
    fn send(&self, path: &PathId, first_hop: &PublicKey, onion: Vec<u8>) -> bool;
}

impl<T: RoutingTransport + ?Sized> RoutingTransport for Arc<T> {
    fn send(&self, path: &PathId, first_hop: &PublicKey, onion: Vec<u8>) -> bool {
        (**self).send(path, first_hop, onion)
    }
}
