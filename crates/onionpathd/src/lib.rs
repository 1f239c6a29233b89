//! onionpathd - onion path lookup daemon
//!
//! This daemon provides:
//! - A loopback path of in-process relays and a service endpoint
//! - Service lookups correlated by the lookup registry
//! - Periodic expiry of stale lookups and paths

pub mod config;
pub mod loopback;
pub mod selftest;

pub use config::Config;
pub use loopback::LoopbackNetwork;
pub use selftest::{SelfTest, Tally};
