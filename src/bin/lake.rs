//! lake - message relay daemon
//!
//! Accepts messages pushed by many producers on the pull port and fans
//! every message out to all subscribers on the publish port. Relay
//! throughput is persisted to `metrics.json` in the metrics output
//! directory (or pushed to statsd).
//!
//! # Usage
//!
//! ```bash
//! # Run with defaults (pull 5562, publish 5561, metrics in /tmp)
//! lake
//!
//! # Custom ports and metrics directory
//! LAKE_PORT_PULL=6000 LAKE_PORT_PUB=6001 LAKE_METRICS_OUTPUT=/var/lib/lake lake
//!
//! # Push metrics to a statsd agent instead
//! lake --statsd-endpoint 127.0.0.1:8125
//!
//! # Enable debug logging
//! RUST_LOG=laked=debug lake
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown, metrics are flushed one last time

use std::net::IpAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use lake_core::config::{DEFAULT_METRICS_OUTPUT, DEFAULT_PUB_PORT, DEFAULT_PULL_PORT};
use lake_core::{parse_duration, Configuration, Metrics, MetricsConfig, MetricsHandle};
use laked::{Daemon, MetricsWorker, Program, RelayWorker};

/// Crates whose events follow the configured log level.
const LOG_TARGETS: [&str; 4] = ["lake", "laked", "lake_core", "lake_transport"];

/// lake - many pushers in, one broadcast out
#[derive(Parser, Debug)]
#[command(name = "lake", version, about)]
struct Args {
    /// Port pushers connect to
    #[arg(long, env = "LAKE_PORT_PULL", default_value_t = DEFAULT_PULL_PORT)]
    pull_port: u16,

    /// Port subscribers connect to
    #[arg(long, env = "LAKE_PORT_PUB", default_value_t = DEFAULT_PUB_PORT)]
    pub_port: u16,

    /// Host both ports are bound on
    #[arg(long, env = "LAKE_BIND_HOST", default_value = "0.0.0.0")]
    bind_host: IpAddr,

    /// Log level (ERROR, WARN, INFO, DEBUG, TRACE); RUST_LOG takes precedence
    #[arg(long, env = "LAKE_LOG_LEVEL", default_value = "INFO")]
    log_level: String,

    /// Resume counters from the last persisted snapshot
    #[arg(long, env = "LAKE_METRICS_CONTINUOUS", default_value_t = true, action = ArgAction::Set)]
    metrics_continuous: bool,

    /// How often metrics are flushed (e.g. 500ms, 1s, 1m)
    #[arg(long, env = "LAKE_METRICS_REFRESHRATE", default_value = "1s", value_parser = parse_duration)]
    metrics_refresh_rate: Duration,

    /// Directory for metrics.json; empty disables the file
    #[arg(long, env = "LAKE_METRICS_OUTPUT", default_value = DEFAULT_METRICS_OUTPUT)]
    metrics_output: String,

    /// statsd agent (host:port); replaces the metrics file when set
    #[arg(long, env = "LAKE_STATSD_ENDPOINT")]
    statsd_endpoint: Option<String>,

    /// How long to wait for every daemon to become ready
    #[arg(long, env = "LAKE_READY_TIMEOUT", default_value = "5s", value_parser = parse_duration)]
    ready_timeout: Duration,
}

impl Args {
    fn into_configuration(self) -> Configuration {
        let output = Some(self.metrics_output.trim())
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        Configuration {
            bind_host: self.bind_host,
            pull_port: self.pull_port,
            pub_port: self.pub_port,
            log_level: self.log_level,
            ready_timeout: self.ready_timeout,
            metrics: MetricsConfig {
                continuous: self.metrics_continuous,
                refresh_rate: self.metrics_refresh_rate,
                output,
                statsd_endpoint: self.statsd_endpoint.filter(|e| !e.trim().is_empty()),
            },
        }
    }
}

fn main() -> Result<()> {
    let config = Args::parse().into_configuration();
    init_logging(&config.log_level)?;
    run(config)
}

/// Installs the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the configured level applies to the
/// lake crates. An unparsable level falls back to `warn`.
fn init_logging(level: &str) -> Result<()> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return Ok(());
    }

    let (filter_level, valid) = match level.trim().parse::<LevelFilter>() {
        Ok(parsed) => (parsed, true),
        Err(_) => (LevelFilter::WARN, false),
    };

    let mut filter = EnvFilter::new("warn");
    for target in LOG_TARGETS {
        filter = filter.add_directive(format!("{target}={filter_level}").parse()?);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if !valid {
        warn!(requested = level, "Invalid log level, using WARN");
    }
    Ok(())
}

/// Runs the daemon (async entry point).
#[tokio::main]
async fn run(config: Configuration) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        pull = %config.pull_endpoint(),
        publish = %config.pub_endpoint(),
        "lake starting"
    );

    if config.metrics.statsd_endpoint.is_none() {
        if let Some(dir) = &config.metrics.output {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create metrics directory {}", dir.display()))?;
        }
    }

    let metrics = MetricsHandle::new(Arc::new(Metrics::new()));
    let mut program = Program::new(config.ready_timeout);

    let flusher = MetricsWorker::from_config(&config.metrics, metrics.clone())
        .map(|worker| Daemon::scheduled("metrics", Arc::new(worker), config.metrics.refresh_rate));
    if flusher.is_none() {
        info!("No metrics backend configured, metrics are not flushed");
    }
    program.register(flusher);

    let relay = RelayWorker::from_config(&config, metrics);
    program.register(Daemon::pinned("relay", Arc::new(relay)));

    program.run().await;

    info!("lake stopped");
    Ok(())
}
