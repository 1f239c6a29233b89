//! Configuration for onionpathd

use clap::Parser;
use std::time::Duration;

/// Longest path the daemon will build
pub const MAX_HOPS: usize = 8;

/// onionpathd - onion path lookup daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "onionpathd")]
#[command(about = "Onion path service lookup daemon")]
pub struct Config {
    /// Relays on the loopback path
    #[arg(long, default_value = "3", env = "ONIONPATH_HOPS")]
    pub hops: usize,

    /// Lookup timeout (milliseconds)
    #[arg(long, default_value = "5000", env = "ONIONPATH_LOOKUP_TIMEOUT_MS")]
    pub lookup_timeout_ms: u64,

    /// Expiry sweep interval (milliseconds)
    #[arg(long, default_value = "1000")]
    pub sweep_interval_ms: u64,

    /// Path key lifetime (seconds)
    #[arg(long, default_value = "600", env = "ONIONPATH_PATH_LIFETIME_SECS")]
    pub path_lifetime_secs: u64,

    /// Lookups issued at startup
    #[arg(long, default_value = "4")]
    pub lookups: usize,

    /// Exit after the startup lookups settle
    #[arg(long)]
    pub once: bool,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.hops == 0 || self.hops > MAX_HOPS {
            anyhow::bail!("Hop count must be between 1 and {}", MAX_HOPS);
        }
        if self.lookup_timeout_ms == 0 {
            anyhow::bail!("Lookup timeout cannot be zero");
        }
        if self.sweep_interval_ms == 0 {
            anyhow::bail!("Sweep interval cannot be zero");
        }
        if self.path_lifetime_secs == 0 {
            anyhow::bail!("Path lifetime cannot be zero");
        }
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            anyhow::bail!("Unknown log format {:?}", self.log_format);
        }
        Ok(())
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn path_lifetime(&self) -> Duration {
        Duration::from_secs(self.path_lifetime_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::parse_from(["onionpathd"]);
        assert!(config.validate().is_ok());
        assert_eq!(config.hops, 3);
        assert_eq!(config.lookup_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_bad_values() {
        for args in [
            vec!["onionpathd", "--hops", "0"],
            vec!["onionpathd", "--hops", "9"],
            vec!["onionpathd", "--lookup-timeout-ms", "0"],
            vec!["onionpathd", "--log-format", "xml"],
        ] {
            let config = Config::parse_from(args);
            assert!(config.validate().is_err());
        }
    }
}
