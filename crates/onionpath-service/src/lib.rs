//! Service lookups over onion paths
//!
//! This crate provides:
//! - The lookup registry correlating requests and responses by transaction id
//! - Pending lookups with atomic create-and-register
//! - A signed service record lookup
//! - Inbound demultiplexing from onion bytes to completed lookups
//! - Clocks for expiry bookkeeping

pub mod clock;
pub mod find_service;
pub mod inbound;
pub mod lookup;
pub mod registry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use find_service::{FindServiceLookup, LookupOutcome};
pub use inbound::{handle_inbound, reap_path, InboundOutcome};
pub use lookup::{LookupFailure, LookupHandle, PendingLookup, ServiceLookup};
pub use registry::{LookupError, LookupRegistry, RegistryStats};
