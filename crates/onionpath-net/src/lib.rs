//! Path onion cryptography for onionpath
//!
//! This crate provides:
//! - Per-hop layer sealing and opening
//! - Established paths with outbound/inbound onion encryption
//! - Relay-side sessions that peel or add a single layer
//! - Routing messages carried inside the onion
//! - The hand-off seam to the link transport

pub mod onion;
pub mod path;
pub mod relay;
pub mod routing;
pub mod transport;

pub use onion::{Direction, OnionError};
pub use path::{Hop, Path, PathError, PathId, PathInfo, PathStatus, DEFAULT_PATH_LIFETIME};
pub use relay::RelaySession;
pub use routing::{RoutingError, RoutingMessage, ServiceRecord};
pub use transport::RoutingTransport;
