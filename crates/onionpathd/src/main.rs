//! onionpathd - onion path lookup daemon
//!
//! Builds a loopback path through in-process relays, runs service lookups
//! over it, and keeps the lookup registry swept until shutdown.

use clap::Parser;
use onionpathd::{Config, SelfTest};
use onionpath_service::SystemClock;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("onionpathd=info,onionpath_service=info"));
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse configuration
    let config = Config::parse();
    init_logging(&config);

    info!("onionpathd v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    // Nothing below works without a crypto backend
    let backend = match onionpath_core::init() {
        Ok(backend) => backend,
        Err(e) => {
            error!("Crypto initialization failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let selftest = match SelfTest::new(backend, &config, Arc::new(SystemClock)) {
        Ok(selftest) => Arc::new(selftest),
        Err(e) => {
            error!("Failed to build loopback path: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Path {} established over {} hops",
        selftest.path().id(),
        selftest.path().hop_count()
    );

    let sent = selftest.launch(config.lookups);
    let completed = selftest.deliver();
    info!("Sent {} lookups, {} completed", sent, completed);

    if config.once {
        let (expired, _) = selftest.sweep(config.lookup_timeout());
        let tally = selftest.tally();
        info!(
            "Selftest: {} found, {} not found, {} invalid, {} failed, {} expired",
            tally.found, tally.not_found, tally.invalid, tally.failed, expired
        );
        let settled = tally.total() == config.lookups as u64;
        return if settled && tally.invalid == 0 && tally.failed == 0 {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };
    }

    // Spawn expiry sweep
    let sweep = selftest.clone();
    let sweep_every = config.sweep_interval();
    let lookup_timeout = config.lookup_timeout();
    tokio::spawn(async move {
        let mut ticker = interval(sweep_every);
        loop {
            ticker.tick().await;

            let completed = sweep.deliver();
            let (expired, reaped) = sweep.sweep(lookup_timeout);
            if completed + expired + reaped > 0 {
                info!(
                    "Sweep: {} completed, {} expired, {} failed with path",
                    completed, expired, reaped
                );
            }
        }
    });

    // Spawn stats logging task
    let stats = selftest.clone();
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(300));
        loop {
            ticker.tick().await;

            let registry = stats.registry().stats();
            info!(
                "Stats: {} pending, {} completed, {} expired, path {:?}",
                registry.pending,
                registry.completed,
                registry.expired,
                stats.path().status()
            );
        }
    });

    info!("onionpathd running (press Ctrl+C to exit)");

    // Wait for shutdown
    tokio::signal::ctrl_c().await.ok();
    info!("Shutting down...");

    let registry = selftest.registry().stats();
    info!(
        "Final stats: {} registered, {} completed, {} expired, {} path failures, {} unsolicited",
        registry.registered,
        registry.completed,
        registry.expired,
        registry.path_failures,
        registry.unsolicited
    );

    ExitCode::SUCCESS
}
