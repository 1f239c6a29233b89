//! Pending service lookups
//!
//! A lookup is owned by the registry it was created in. Callers keep a
//! [`LookupHandle`], which refers back to the registry without owning it.

use crate::registry::{LookupError, LookupRegistry, RegistryInner};
use onionpath_core::CryptoBackend;
use onionpath_net::{Path, PathId, PathStatus, RoutingMessage, RoutingTransport};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Why a lookup ended without a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupFailure {
    /// No response inside the allowed window
    Timeout,
    /// The path failed an integrity check or the transport dropped it
    PathBroken,
    /// The path's keys expired
    PathExpired,
    /// The caller withdrew the lookup
    Cancelled,
}

/// Protocol-specific part of a lookup.
///
/// Exactly one of `on_response` / `on_failure` is called, once, after the
/// lookup has left the registry. No registry lock is held during any of
/// these calls.
pub trait ServiceLookup: Send + Sync {
    /// Build the request for `name`. `None` aborts the send.
    fn build_request_message(&self, txid: u64, name: &str) -> Option<RoutingMessage>;

    /// A response with our transaction id arrived.
    fn on_response(&self, response: RoutingMessage);

    /// The lookup ended without a response.
    fn on_failure(&self, reason: LookupFailure);
}

/// Registry entry for one outstanding lookup
pub struct PendingLookup {
    pub(crate) txid: u64,
    pub(crate) name: String,
    pub(crate) created_at: u64,
    /// Path the request was accepted on
    pub(crate) path: Option<PathId>,
    pub(crate) handler: Arc<dyn ServiceLookup>,
}

impl PendingLookup {
    /// Create a lookup and register it in `registry` in one step.
    ///
    /// There is no unregistered lookup: construction either yields a handle to
    /// a live entry or fails because `txid` is already pending.
    pub fn new(
        registry: &LookupRegistry,
        txid: u64,
        name: impl Into<String>,
        handler: Box<dyn ServiceLookup>,
    ) -> Result<LookupHandle, LookupError> {
        registry.put_lookup(txid, name.into(), handler)
    }

    pub fn txid(&self) -> u64 {
        self.txid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }
}

impl std::fmt::Debug for PendingLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingLookup")
            .field("txid", &self.txid)
            .field("name", &self.name)
            .field("created_at", &self.created_at)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Caller's non-owning handle to a registered lookup
#[derive(Clone, Debug)]
pub struct LookupHandle {
    pub(crate) txid: u64,
    pub(crate) registry: Weak<RegistryInner>,
}

impl LookupHandle {
    pub fn txid(&self) -> u64 {
        self.txid
    }

    /// Still waiting for a response?
    pub fn is_pending(&self) -> bool {
        self.registry
            .upgrade()
            .map(|inner| inner.lookups.read().contains_key(&self.txid))
            .unwrap_or(false)
    }

    /// Build the request and send it over `path`.
    ///
    /// Returns false without side effects if the lookup is gone or its request
    /// cannot be built. Otherwise the lookup is bound to `path` and the result
    /// says whether the path accepted the message. If the path is expired or
    /// broken the lookup fails at once; any other refusal leaves it unbound.
    pub fn send_via_path(
        &self,
        backend: &dyn CryptoBackend,
        path: &Path,
        transport: &dyn RoutingTransport,
    ) -> bool {
        let Some(inner) = self.registry.upgrade() else {
            return false;
        };
        let registry = LookupRegistry::from_inner(inner);

        let Some((name, handler)) = registry.request_parts(self.txid) else {
            return false;
        };
        let Some(message) = handler.build_request_message(self.txid, &name) else {
            debug!(txid = self.txid, name = %name, "request not built, send aborted");
            return false;
        };

        // Bound before sending so a fast reply finds its path
        if !registry.bind_path(self.txid, path.id()) {
            return false;
        }
        if path.send_routing_message(backend, message, transport) {
            return true;
        }

        match path.status() {
            PathStatus::Expired => {
                registry.fail_lookup(self.txid, LookupFailure::PathExpired);
            }
            PathStatus::Broken => {
                registry.fail_lookup(self.txid, LookupFailure::PathBroken);
            }
            PathStatus::Building | PathStatus::Established => {
                registry.unbind_path(self.txid, path.id());
            }
        }
        false
    }

    /// Withdraw the lookup. Its handler sees `Cancelled`.
    pub fn cancel(&self) -> bool {
        self.registry
            .upgrade()
            .map(|inner| LookupRegistry::from_inner(inner).cancel(self.txid))
            .unwrap_or(false)
    }
}
