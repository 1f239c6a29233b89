//! Registry of outstanding lookups keyed by transaction id

use crate::clock::{Clock, SystemClock};
use crate::lookup::{LookupFailure, LookupHandle, PendingLookup, ServiceLookup};
use onionpath_core::{random_u64, CryptoBackend};
use onionpath_net::{PathId, RoutingMessage};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Registry errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("Transaction {0} already has a pending lookup")]
    DuplicateTransaction(u64),
}

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub pending: usize,
    pub registered: u64,
    pub completed: u64,
    pub expired: u64,
    pub path_failures: u64,
    pub cancelled: u64,
    pub duplicates: u64,
    pub unsolicited: u64,
    /// Responses for a live lookup that arrived on a path it was not sent on
    pub misrouted: u64,
}

pub(crate) struct RegistryInner {
    pub(crate) lookups: RwLock<HashMap<u64, PendingLookup>>,
    clock: Arc<dyn Clock>,
    stats: RwLock<RegistryStats>,
}

/// Owns every pending lookup; at most one per transaction id.
///
/// Cloning shares the same registry. Handler methods never run while the map
/// lock is held, so a handler may call back into the registry.
#[derive(Clone)]
pub struct LookupRegistry {
    inner: Arc<RegistryInner>,
}

impl LookupRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                lookups: RwLock::new(HashMap::new()),
                clock,
                stats: RwLock::new(RegistryStats::default()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<RegistryInner>) -> Self {
        Self { inner }
    }

    /// Random transaction id not currently pending
    pub fn next_txid(&self, backend: &dyn CryptoBackend) -> u64 {
        let lookups = self.inner.lookups.read();
        loop {
            let txid = random_u64(backend);
            if txid != 0 && !lookups.contains_key(&txid) {
                return txid;
            }
        }
    }

    /// Allocate and register a lookup under `txid`.
    ///
    /// A live entry under the same id is kept; the new handler is dropped.
    pub fn put_lookup(
        &self,
        txid: u64,
        name: String,
        handler: Box<dyn ServiceLookup>,
    ) -> Result<LookupHandle, LookupError> {
        let mut lookups = self.inner.lookups.write();
        if lookups.contains_key(&txid) {
            drop(lookups);
            warn!(txid, "duplicate transaction id, keeping the pending lookup");
            self.inner.stats.write().duplicates += 1;
            return Err(LookupError::DuplicateTransaction(txid));
        }

        let created_at = self.inner.clock.now_ms();
        debug!(txid, name = %name, "lookup registered");
        lookups.insert(
            txid,
            PendingLookup {
                txid,
                name,
                created_at,
                path: None,
                handler: Arc::from(handler),
            },
        );
        drop(lookups);
        self.inner.stats.write().registered += 1;

        Ok(LookupHandle {
            txid,
            registry: Arc::downgrade(&self.inner),
        })
    }

    pub fn has(&self, txid: u64) -> bool {
        self.inner.lookups.read().contains_key(&txid)
    }

    pub fn len(&self) -> usize {
        self.inner.lookups.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Path the lookup under `txid` was sent on, if any
    pub fn bound_path(&self, txid: u64) -> Option<PathId> {
        self.inner.lookups.read().get(&txid).and_then(|entry| entry.path)
    }

    /// Deliver `response` to the lookup pending under `txid`.
    ///
    /// Returns false, changing nothing, when no such lookup is pending
    /// (late, duplicate or unsolicited responses).
    pub fn complete(&self, txid: u64, response: RoutingMessage) -> bool {
        self.complete_from(None, txid, response)
    }

    /// Like [`complete`](Self::complete) for a response that arrived on `path`.
    ///
    /// A lookup sent on a different path is left pending.
    pub fn complete_on_path(&self, path: PathId, txid: u64, response: RoutingMessage) -> bool {
        self.complete_from(Some(path), txid, response)
    }

    fn complete_from(&self, from: Option<PathId>, txid: u64, response: RoutingMessage) -> bool {
        let entry = {
            let mut lookups = self.inner.lookups.write();
            match lookups.get(&txid).map(|entry| entry.path) {
                None => None,
                Some(Some(bound)) if from.is_some_and(|from| from != bound) => {
                    drop(lookups);
                    debug!(txid, path = %bound, "response arrived on the wrong path");
                    self.inner.stats.write().misrouted += 1;
                    return false;
                }
                Some(_) => lookups.remove(&txid),
            }
        };

        let Some(entry) = entry else {
            trace!(txid, "dropping response for unknown transaction");
            self.inner.stats.write().unsolicited += 1;
            return false;
        };

        self.inner.stats.write().completed += 1;
        debug!(txid, name = %entry.name, "lookup completed");
        entry.handler.on_response(response);
        true
    }

    /// Fail every lookup created more than `timeout` before `now` (ms).
    pub fn expire_older_than(&self, now: u64, timeout: Duration) -> usize {
        let timeout_ms = timeout.as_millis() as u64;
        let expired =
            self.remove_where(|entry| now.saturating_sub(entry.created_at) > timeout_ms);

        let count = expired.len();
        if count > 0 {
            self.inner.stats.write().expired += count as u64;
            debug!(count, "expired lookups");
        }
        for entry in expired {
            entry.handler.on_failure(LookupFailure::Timeout);
        }
        count
    }

    /// Fail every lookup sent over `path`.
    pub fn fail_path(&self, path: PathId, reason: LookupFailure) -> usize {
        let failed = self.remove_where(|entry| entry.path == Some(path));

        let count = failed.len();
        if count > 0 {
            self.inner.stats.write().path_failures += count as u64;
            debug!(path = %path, ?reason, count, "failed lookups on dead path");
        }
        for entry in failed {
            entry.handler.on_failure(reason);
        }
        count
    }

    /// Remove a lookup on the caller's request.
    pub fn cancel(&self, txid: u64) -> bool {
        let Some(entry) = self.inner.lookups.write().remove(&txid) else {
            return false;
        };
        self.inner.stats.write().cancelled += 1;
        entry.handler.on_failure(LookupFailure::Cancelled);
        true
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = self.inner.stats.read().clone();
        stats.pending = self.len();
        stats
    }

    /// Name and handler of a live lookup, for building its request unlocked
    pub(crate) fn request_parts(&self, txid: u64) -> Option<(String, Arc<dyn ServiceLookup>)> {
        self.inner
            .lookups
            .read()
            .get(&txid)
            .map(|entry| (entry.name.clone(), Arc::clone(&entry.handler)))
    }

    /// Record that the lookup was sent on `path`. False if it is gone.
    pub(crate) fn bind_path(&self, txid: u64, path: PathId) -> bool {
        match self.inner.lookups.write().get_mut(&txid) {
            Some(entry) => {
                entry.path = Some(path);
                true
            }
            None => false,
        }
    }

    /// Undo [`bind_path`](Self::bind_path) if the lookup is still bound to `path`.
    pub(crate) fn unbind_path(&self, txid: u64, path: PathId) {
        if let Some(entry) = self.inner.lookups.write().get_mut(&txid) {
            if entry.path == Some(path) {
                entry.path = None;
            }
        }
    }

    /// Fail one lookup whose path died under it.
    pub(crate) fn fail_lookup(&self, txid: u64, reason: LookupFailure) -> bool {
        let Some(entry) = self.inner.lookups.write().remove(&txid) else {
            return false;
        };
        self.inner.stats.write().path_failures += 1;
        debug!(txid, ?reason, "lookup failed with its path");
        entry.handler.on_failure(reason);
        true
    }

    fn remove_where(&self, pred: impl Fn(&PendingLookup) -> bool) -> Vec<PendingLookup> {
        let mut lookups = self.inner.lookups.write();
        let doomed: Vec<u64> = lookups
            .values()
            .filter(|entry| pred(entry))
            .map(|entry| entry.txid)
            .collect();
        doomed
            .into_iter()
            .filter_map(|txid| lookups.remove(&txid))
            .collect()
    }
}

impl Default for LookupRegistry {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use onionpath_core::DalekBackend;
    use onionpath_net::{Hop, Path, RoutingTransport, DEFAULT_PATH_LIFETIME};
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::sync::mpsc;

    const BACKEND: DalekBackend = DalekBackend::new();

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Response(RoutingMessage),
        Failure(LookupFailure),
    }

    type Events = Arc<Mutex<Vec<(u64, Event)>>>;

    struct Recorder {
        events: Events,
        txid: u64,
    }

    impl ServiceLookup for Recorder {
        fn build_request_message(&self, txid: u64, name: &str) -> Option<RoutingMessage> {
            Some(RoutingMessage::FindService {
                txid,
                name: name.to_string(),
            })
        }

        fn on_response(&self, response: RoutingMessage) {
            self.events.lock().push((self.txid, Event::Response(response)));
        }

        fn on_failure(&self, reason: LookupFailure) {
            self.events.lock().push((self.txid, Event::Failure(reason)));
        }
    }

    fn setup(start: u64) -> (LookupRegistry, Arc<ManualClock>, Events) {
        let clock = Arc::new(ManualClock::new(start));
        let registry = LookupRegistry::new(clock.clone());
        (registry, clock, Arc::new(Mutex::new(Vec::new())))
    }

    fn recorder(events: &Events, txid: u64) -> Box<dyn ServiceLookup> {
        Box::new(Recorder {
            events: Arc::clone(events),
            txid,
        })
    }

    fn one_hop_path() -> Path {
        let client = BACKEND.keygen();
        let relay = BACKEND.keygen();
        let nonce = onionpath_core::random_tunnel_nonce(&BACKEND);
        let hop = Hop::derive(&BACKEND, relay.public, nonce, &client.secret).unwrap();
        Path::established(PathId::random(&BACKEND), vec![hop], DEFAULT_PATH_LIFETIME).unwrap()
    }

    struct Accepting;

    impl RoutingTransport for Accepting {
        fn send(&self, _: &PathId, _: &onionpath_core::PublicKey, _: Vec<u8>) -> bool {
            true
        }
    }

    #[test]
    fn test_construction_registers() {
        let (registry, _clock, events) = setup(0);
        let handle = PendingLookup::new(&registry, 5, "svc", recorder(&events, 5)).unwrap();

        assert!(registry.has(5));
        assert!(handle.is_pending());
        assert_eq!(handle.txid(), 5);
    }

    #[test]
    fn test_duplicate_keeps_first() {
        let (registry, _clock, events) = setup(0);
        PendingLookup::new(&registry, 9, "first", recorder(&events, 9)).unwrap();

        let second = PendingLookup::new(&registry, 9, "second", recorder(&events, 9));
        assert_eq!(second.unwrap_err(), LookupError::DuplicateTransaction(9));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.inner.lookups.read()[&9].name(), "first");
        assert_eq!(registry.stats().duplicates, 1);
    }

    #[test]
    fn test_complete_unknown_on_empty() {
        let (registry, _clock, _events) = setup(0);
        let response = RoutingMessage::ServiceNotFound { txid: 999 };
        assert!(!registry.complete(999, response));
        assert!(registry.is_empty());
        assert_eq!(registry.stats().unsolicited, 1);
    }

    #[test]
    fn test_complete_delivers_once() {
        let (registry, _clock, events) = setup(0);
        let handle = PendingLookup::new(&registry, 1, "svc", recorder(&events, 1)).unwrap();
        PendingLookup::new(&registry, 2, "other", recorder(&events, 2)).unwrap();

        let response = RoutingMessage::ServiceNotFound { txid: 1 };
        assert!(registry.complete(1, response.clone()));
        assert!(!registry.complete(1, response.clone()));

        assert!(!handle.is_pending());
        assert!(registry.has(2));
        assert_eq!(*events.lock(), vec![(1, Event::Response(response))]);
    }

    #[test]
    fn test_complete_on_other_path_leaves_lookup_pending() {
        let (registry, _clock, events) = setup(0);
        let path = one_hop_path();
        let elsewhere = PathId::random(&BACKEND);
        let handle = PendingLookup::new(&registry, 11, "svc", recorder(&events, 11)).unwrap();
        assert!(handle.send_via_path(&BACKEND, &path, &Accepting));
        assert_eq!(registry.bound_path(11), Some(path.id()));

        let response = RoutingMessage::ServiceNotFound { txid: 11 };
        assert!(!registry.complete_on_path(elsewhere, 11, response.clone()));
        assert!(handle.is_pending());
        assert!(events.lock().is_empty());
        assert_eq!(registry.stats().misrouted, 1);

        assert!(registry.complete_on_path(path.id(), 11, response.clone()));
        assert_eq!(*events.lock(), vec![(11, Event::Response(response))]);
    }

    #[test]
    fn test_complete_on_path_accepts_unbound_lookup() {
        let (registry, _clock, events) = setup(0);
        PendingLookup::new(&registry, 12, "svc", recorder(&events, 12)).unwrap();

        let response = RoutingMessage::ServiceNotFound { txid: 12 };
        assert!(registry.complete_on_path(PathId::random(&BACKEND), 12, response));
    }

    #[test]
    fn test_txid_reusable_after_completion() {
        let (registry, _clock, events) = setup(0);
        PendingLookup::new(&registry, 3, "svc", recorder(&events, 3)).unwrap();
        registry.complete(3, RoutingMessage::ServiceNotFound { txid: 3 });

        assert!(PendingLookup::new(&registry, 3, "again", recorder(&events, 3)).is_ok());
    }

    #[test]
    fn test_expiry_boundary() {
        let t0 = 10_000;
        let window = Duration::from_millis(5_000);
        let (registry, _clock, events) = setup(t0);
        PendingLookup::new(&registry, 4, "svc", recorder(&events, 4)).unwrap();

        assert_eq!(registry.expire_older_than(t0 + 5_000 - 1, window), 0);
        assert_eq!(registry.expire_older_than(t0 + 5_000, window), 0);
        assert!(registry.has(4));

        assert_eq!(registry.expire_older_than(t0 + 5_000 + 1, window), 1);
        assert!(!registry.has(4));
        assert_eq!(*events.lock(), vec![(4, Event::Failure(LookupFailure::Timeout))]);
        assert_eq!(registry.stats().expired, 1);
    }

    #[test]
    fn test_expiry_only_takes_old_entries() {
        let (registry, clock, events) = setup(0);
        PendingLookup::new(&registry, 1, "old", recorder(&events, 1)).unwrap();
        clock.advance(3_000);
        PendingLookup::new(&registry, 2, "new", recorder(&events, 2)).unwrap();

        let expired = registry.expire_older_than(4_000, Duration::from_millis(2_000));
        assert_eq!(expired, 1);
        assert!(!registry.has(1));
        assert!(registry.has(2));
    }

    #[test]
    fn test_cancel() {
        let (registry, _clock, events) = setup(0);
        let handle = PendingLookup::new(&registry, 6, "svc", recorder(&events, 6)).unwrap();

        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(!registry.has(6));
        assert_eq!(*events.lock(), vec![(6, Event::Failure(LookupFailure::Cancelled))]);
    }

    #[test]
    fn test_handle_outlives_registry() {
        let (registry, _clock, events) = setup(0);
        let handle = PendingLookup::new(&registry, 8, "svc", recorder(&events, 8)).unwrap();
        drop(registry);

        assert!(!handle.is_pending());
        assert!(!handle.cancel());
    }

    #[test]
    fn test_next_txid_avoids_live_ids() {
        let (registry, _clock, events) = setup(0);
        for _ in 0..32 {
            let txid = registry.next_txid(&BACKEND);
            assert_ne!(txid, 0);
            PendingLookup::new(&registry, txid, "svc", recorder(&events, txid)).unwrap();
        }
        assert_eq!(registry.len(), 32);
    }

    /// Builds its request by asking the registry about itself
    struct Introspecting {
        registry: LookupRegistry,
    }

    impl ServiceLookup for Introspecting {
        fn build_request_message(&self, txid: u64, name: &str) -> Option<RoutingMessage> {
            if !self.registry.has(txid) || self.registry.len() == 0 {
                return None;
            }
            Some(RoutingMessage::FindService {
                txid,
                name: name.to_string(),
            })
        }

        fn on_response(&self, _: RoutingMessage) {}

        fn on_failure(&self, _: LookupFailure) {
            // Failure callbacks may use the registry too
            let _ = self.registry.stats();
        }
    }

    #[test]
    fn test_handler_may_reenter_registry() {
        let (registry, _clock, _events) = setup(0);
        let handler = Box::new(Introspecting {
            registry: registry.clone(),
        });
        let handle = PendingLookup::new(&registry, 21, "svc", handler).unwrap();

        let (tx, rx) = mpsc::channel();
        let sender = handle.clone();
        std::thread::spawn(move || {
            let path = one_hop_path();
            let _ = tx.send(sender.send_via_path(&BACKEND, &path, &Accepting));
        });

        let sent = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("send_via_path did not return");
        assert!(sent);
        assert!(handle.cancel());
    }

    #[test]
    fn test_concurrent_register_complete_expire() {
        let (registry, _clock, events) = setup(0);
        let threads: Vec<_> = (0..4u64)
            .map(|t| {
                let registry = registry.clone();
                let events = Arc::clone(&events);
                std::thread::spawn(move || {
                    for i in 0..100u64 {
                        let txid = t * 1_000 + i;
                        PendingLookup::new(&registry, txid, "svc", recorder(&events, txid)).unwrap();
                        if i % 2 == 0 {
                            assert!(registry.complete(txid, RoutingMessage::ServiceNotFound { txid }));
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(registry.len(), 200);
        assert_eq!(registry.expire_older_than(1, Duration::ZERO), 200);
        assert!(registry.is_empty());
        assert_eq!(events.lock().len(), 400);
    }

    proptest! {
        #[test]
        fn prop_expiry_boundary(t0 in 0u64..1 << 40, window in 1u64..1 << 30) {
            let (registry, _clock, events) = setup(t0);
            PendingLookup::new(&registry, 1, "svc", recorder(&events, 1)).unwrap();
            let timeout = Duration::from_millis(window);

            prop_assert_eq!(registry.expire_older_than(t0 + window - 1, timeout), 0);
            prop_assert!(registry.has(1));
            prop_assert_eq!(registry.expire_older_than(t0 + window + 1, timeout), 1);
            prop_assert!(!registry.has(1));
            prop_assert_eq!(
                events.lock().clone(),
                vec![(1, Event::Failure(LookupFailure::Timeout))]
            );
        }
    }
}
