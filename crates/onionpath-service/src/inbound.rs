//! Inbound demultiplexing: from onion bytes to completed lookups

use crate::lookup::LookupFailure;
use crate::registry::LookupRegistry;
use onionpath_core::CryptoBackend;
use onionpath_net::{Path, PathError, PathStatus, RoutingMessage};
use tracing::{debug, trace, warn};

/// What happened to one inbound onion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// A pending lookup received its response
    Completed(u64),
    /// No lookup was waiting for this transaction on this path
    Unsolicited(u64),
    /// Decrypted fine but is not a lookup response
    NotAResponse(u64),
    /// Decrypted fine but does not decode
    Undecodable,
    /// Integrity failure; the path is now broken and its lookups failed
    PathBroken { failed: usize },
    /// The path was already unusable; its lookups failed
    PathUnavailable { failed: usize },
}

/// Decrypt an inbound onion on `path` and route any response to `registry`.
pub fn handle_inbound(
    backend: &dyn CryptoBackend,
    path: &Path,
    ciphertext: &[u8],
    registry: &LookupRegistry,
) -> InboundOutcome {
    let plaintext = match path.decrypt_inbound(backend, ciphertext) {
        Ok(plaintext) => plaintext,
        Err(PathError::NotEstablished(status)) => {
            let reason = match status {
                PathStatus::Broken => LookupFailure::PathBroken,
                _ => LookupFailure::PathExpired,
            };
            let failed = registry.fail_path(path.id(), reason);
            return InboundOutcome::PathUnavailable { failed };
        }
        Err(e) => {
            warn!(path = %path.id(), "inbound onion rejected: {}", e);
            let failed = registry.fail_path(path.id(), LookupFailure::PathBroken);
            return InboundOutcome::PathBroken { failed };
        }
    };

    let message = match RoutingMessage::decode(&plaintext) {
        Ok(message) => message,
        Err(e) => {
            debug!(path = %path.id(), "undecodable routing message: {}", e);
            return InboundOutcome::Undecodable;
        }
    };

    let txid = message.txid();
    if !message.is_response() {
        trace!(path = %path.id(), txid, "ignoring request on client path");
        return InboundOutcome::NotAResponse(txid);
    }

    if registry.complete_on_path(path.id(), txid, message) {
        InboundOutcome::Completed(txid)
    } else {
        InboundOutcome::Unsolicited(txid)
    }
}

/// Expire `path` if its keys are stale at `now` (ms) and fail its lookups.
pub fn reap_path(path: &Path, registry: &LookupRegistry, now: u64) -> usize {
    if path.expire_if_stale(now) {
        return registry.fail_path(path.id(), LookupFailure::PathExpired);
    }
    0
}
