//! Configuration value for the relay process.
//!
//! The configuration is built once at process start (from flags and
//! environment, see the `lake` binary) and passed by reference into every
//! component constructor. Nothing here reads the environment itself.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Default port for inbound push-style delivery.
pub const DEFAULT_PULL_PORT: u16 = 5562;

/// Default port for outbound publish-style fan-out.
pub const DEFAULT_PUB_PORT: u16 = 5561;

/// Default metrics refresh interval.
pub const DEFAULT_REFRESH_RATE: Duration = Duration::from_secs(1);

/// Default directory holding the metrics snapshot.
pub const DEFAULT_METRICS_OUTPUT: &str = "/tmp";

/// Relay process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    /// Host the relay binds both sockets on
    pub bind_host: IpAddr,

    /// Port for the inbound (pull) socket
    pub pull_port: u16,

    /// Port for the outbound (publish) socket
    pub pub_port: u16,

    /// Case-insensitive log level
    pub log_level: String,

    /// How long the program waits for every daemon to become ready
    pub ready_timeout: Duration,

    /// Metrics settings
    pub metrics: MetricsConfig,
}

impl Configuration {
    /// Address the inbound socket binds to.
    pub fn pull_endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.pull_port)
    }

    /// Address the outbound socket binds to.
    pub fn pub_endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.pub_port)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            pull_port: DEFAULT_PULL_PORT,
            pub_port: DEFAULT_PUB_PORT,
            log_level: "INFO".to_string(),
            ready_timeout: Duration::from_secs(5),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Metrics settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Resume counters from the last persisted snapshot
    pub continuous: bool,

    /// How often the counters are flushed
    pub refresh_rate: Duration,

    /// Directory holding the snapshot file (`None` disables the file backend)
    pub output: Option<PathBuf>,

    /// statsd agent endpoint (`host:port`); takes precedence over `output`
    pub statsd_endpoint: Option<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            continuous: true,
            refresh_rate: DEFAULT_REFRESH_RATE,
            output: Some(PathBuf::from(DEFAULT_METRICS_OUTPUT)),
            statsd_endpoint: None,
        }
    }
}

/// Parses a duration such as `250ms`, `1s`, `5m` or `1h`.
///
/// A bare number is read as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let value = input.trim();
    if value.is_empty() {
        return Err("empty duration".to_string());
    }

    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);

    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{value}'"))?;

    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "" | "s" => Ok(Duration::from_secs(amount)),
        "m" => Ok(Duration::from_secs(amount.saturating_mul(60))),
        "h" => Ok(Duration::from_secs(amount.saturating_mul(3600))),
        other => Err(format!("unknown duration unit '{other}' in '{value}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Configuration::default();
        assert_eq!(cfg.pull_port, 5562);
        assert_eq!(cfg.pub_port, 5561);
        assert_eq!(cfg.log_level, "INFO");
        assert!(cfg.metrics.continuous);
        assert_eq!(cfg.metrics.refresh_rate, Duration::from_secs(1));
        assert_eq!(cfg.metrics.output, Some(PathBuf::from("/tmp")));
        assert!(cfg.metrics.statsd_endpoint.is_none());
    }

    #[test]
    fn test_endpoints() {
        let cfg = Configuration {
            bind_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            pull_port: 7000,
            pub_port: 7001,
            ..Configuration::default()
        };
        assert_eq!(cfg.pull_endpoint().to_string(), "127.0.0.1:7000");
        assert_eq!(cfg.pub_endpoint().to_string(), "127.0.0.1:7001");
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("1s"), Ok(Duration::from_secs(1)));
        assert_eq!(parse_duration("3"), Ok(Duration::from_secs(3)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration(" 1h "), Ok(Duration::from_secs(3600)));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("10parsecs").is_err());
        assert!(parse_duration("-1s").is_err());
    }
}
