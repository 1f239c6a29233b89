//! Service record lookup by name

use crate::lookup::{LookupFailure, ServiceLookup};
use onionpath_core::CryptoBackend;
use onionpath_net::{RoutingMessage, ServiceRecord};
use parking_lot::Mutex;
use tracing::warn;

/// Longest service name we will ask for
pub const MAX_NAME_LEN: usize = 255;

/// How a service lookup ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// A correctly signed record for the requested name
    Found(ServiceRecord),
    /// The endpoint has no such record
    NotFound,
    /// The reply was not a valid record for our name
    Invalid,
    /// No reply
    Failed(LookupFailure),
}

type Callback = Box<dyn FnOnce(LookupOutcome) + Send>;

/// Lookup of a [`ServiceRecord`] by name
pub struct FindServiceLookup {
    backend: &'static dyn CryptoBackend,
    name: String,
    /// Taken by the first outcome
    callback: Mutex<Option<Callback>>,
}

impl FindServiceLookup {
    pub fn new(
        backend: &'static dyn CryptoBackend,
        name: impl Into<String>,
        callback: impl FnOnce(LookupOutcome) + Send + 'static,
    ) -> Self {
        Self {
            backend,
            name: name.into(),
            callback: Mutex::new(Some(Box::new(callback))),
        }
    }

    fn valid_name(name: &str) -> bool {
        !name.is_empty()
            && name.len() <= MAX_NAME_LEN
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
    }

    fn finish(&self, outcome: LookupOutcome) {
        if let Some(callback) = self.callback.lock().take() {
            callback(outcome);
        }
    }
}

impl ServiceLookup for FindServiceLookup {
    fn build_request_message(&self, txid: u64, name: &str) -> Option<RoutingMessage> {
        if !Self::valid_name(name) {
            return None;
        }
        Some(RoutingMessage::FindService {
            txid,
            name: name.to_string(),
        })
    }

    fn on_response(&self, response: RoutingMessage) {
        let outcome = match response {
            RoutingMessage::ServiceFound { record, .. } => {
                if record.name == self.name && record.verify(self.backend) {
                    LookupOutcome::Found(record)
                } else {
                    warn!(name = %self.name, "rejecting unsigned or mismatched service record");
                    LookupOutcome::Invalid
                }
            }
            RoutingMessage::ServiceNotFound { .. } => LookupOutcome::NotFound,
            RoutingMessage::FindService { .. } => LookupOutcome::Invalid,
        };
        self.finish(outcome);
    }

    fn on_failure(&self, reason: LookupFailure) {
        self.finish(LookupOutcome::Failed(reason));
    }
}
