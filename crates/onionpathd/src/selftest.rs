//! Lookups over the loopback path

use crate::config::Config;
use crate::loopback::LoopbackNetwork;
use onionpath_core::CryptoBackend;
use onionpath_net::{Path, ServiceRecord};
use onionpath_service::{
    handle_inbound, reap_path, Clock, FindServiceLookup, InboundOutcome, LookupOutcome,
    LookupRegistry, PendingLookup,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Name the endpoint publishes
pub const PUBLISHED_NAME: &str = "selftest";

/// Lookup outcomes seen so far
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Tally {
    pub found: u64,
    pub not_found: u64,
    pub invalid: u64,
    pub failed: u64,
}

impl Tally {
    pub fn total(&self) -> u64 {
        self.found + self.not_found + self.invalid + self.failed
    }

    fn record(&mut self, outcome: &LookupOutcome) {
        match outcome {
            LookupOutcome::Found(_) => self.found += 1,
            LookupOutcome::NotFound => self.not_found += 1,
            LookupOutcome::Invalid => self.invalid += 1,
            LookupOutcome::Failed(_) => self.failed += 1,
        }
    }
}

pub struct SelfTest {
    backend: &'static dyn CryptoBackend,
    registry: LookupRegistry,
    clock: Arc<dyn Clock>,
    path: Path,
    network: LoopbackNetwork,
    tally: Arc<Mutex<Tally>>,
}

impl SelfTest {
    pub fn new(
        backend: &'static dyn CryptoBackend,
        config: &Config,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let (path, network) = LoopbackNetwork::build(backend, config.hops, config.path_lifetime())?;

        let identity = backend.keygen();
        let payload = identity.public.as_bytes().to_vec();
        let record = ServiceRecord::signed(backend, &identity, PUBLISHED_NAME, payload);
        info!(name = PUBLISHED_NAME, address = %identity.public, "publishing service record");
        network.publish(record);

        Ok(Self {
            backend,
            registry: LookupRegistry::new(clock.clone()),
            clock,
            path,
            network,
            tally: Arc::new(Mutex::new(Tally::default())),
        })
    }

    /// Register and send `count` lookups, alternating published and unknown names.
    ///
    /// Returns how many the path accepted.
    pub fn launch(&self, count: usize) -> usize {
        let mut sent = 0;
        for i in 0..count {
            let name = if i % 2 == 0 {
                PUBLISHED_NAME.to_string()
            } else {
                format!("absent-{}", i)
            };

            let tally = Arc::clone(&self.tally);
            let label = name.clone();
            let lookup = FindServiceLookup::new(self.backend, name.clone(), move |outcome| {
                match &outcome {
                    LookupOutcome::Found(record) => {
                        info!(name = %label, address = %record.address, "service found")
                    }
                    other => info!(name = %label, outcome = ?other, "lookup finished"),
                }
                tally.lock().record(&outcome);
            });

            let txid = self.registry.next_txid(self.backend);
            let handle = match PendingLookup::new(&self.registry, txid, name, Box::new(lookup)) {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("lookup not registered: {}", e);
                    continue;
                }
            };

            if handle.send_via_path(self.backend, &self.path, &self.network) {
                sent += 1;
            } else {
                debug!(txid, "lookup not sent");
            }
        }
        sent
    }

    /// Feed queued replies to the registry. Returns how many completed a lookup.
    pub fn deliver(&self) -> usize {
        self.network
            .drain_replies()
            .into_iter()
            .map(|reply| handle_inbound(self.backend, &self.path, &reply, &self.registry))
            .filter(|outcome| matches!(outcome, InboundOutcome::Completed(_)))
            .count()
    }

    /// Expire lookups older than `timeout` and the path if its keys are stale.
    pub fn sweep(&self, timeout: Duration) -> (usize, usize) {
        let now = self.clock.now_ms();
        let expired = self.registry.expire_older_than(now, timeout);
        let reaped = reap_path(&self.path, &self.registry, now);
        (expired, reaped)
    }

    pub fn tally(&self) -> Tally {
        self.tally.lock().clone()
    }

    pub fn registry(&self) -> &LookupRegistry {
        &self.registry
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
