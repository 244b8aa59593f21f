//! Push-based statsd backend.
//!
//! Every flush drains the counters and sends them as one UDP datagram:
//!
//! ```text
//! lake.message.ingress:<n>|c
//! lake.message.egress:<n>|c
//! lake.memory.bytes:<n>|g
//! ```

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use lake_core::Snapshot;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::OnceCell;
use tracing::debug;

/// Prefix of every metric name.
pub const METRIC_PREFIX: &str = "lake";

/// UDP client for a statsd agent.
#[derive(Debug)]
pub struct StatsdSink {
    endpoint: String,
    socket: OnceCell<UdpSocket>,
}

impl StatsdSink {
    /// Sink for the agent at `endpoint` (`host:port`). Nothing is opened
    /// until [`connect`](Self::connect).
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            socket: OnceCell::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Opens the UDP socket. Idempotent.
    pub async fn connect(&self) -> io::Result<()> {
        self.socket
            .get_or_try_init(|| async {
                let target = lookup_host(self.endpoint.as_str())
                    .await?
                    .next()
                    .ok_or_else(|| {
                        io::Error::new(io::ErrorKind::AddrNotAvailable, "statsd endpoint did not resolve")
                    })?;
                let local = match target {
                    SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
                    SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
                };
                let socket = UdpSocket::bind(local).await?;
                socket.connect(target).await?;
                Ok::<_, io::Error>(socket)
            })
            .await?;
        Ok(())
    }

    /// Sends one drained snapshot.
    ///
    /// # Errors
    ///
    /// Fails if the sink was never connected or the datagram cannot be sent.
    pub async fn send(&self, snapshot: &Snapshot) -> io::Result<()> {
        let socket = self
            .socket
            .get()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "statsd sink not connected"))?;

        let payload = format_payload(snapshot);
        socket.send(payload.as_bytes()).await?;
        debug!(
            endpoint = %self.endpoint,
            ingress = snapshot.message_ingress,
            egress = snapshot.message_egress,
            "Metrics pushed to statsd"
        );
        Ok(())
    }
}

/// Renders a snapshot as newline-separated statsd lines.
pub fn format_payload(snapshot: &Snapshot) -> String {
    format!(
        "{METRIC_PREFIX}.message.ingress:{}|c\n\
         {METRIC_PREFIX}.message.egress:{}|c\n\
         {METRIC_PREFIX}.memory.bytes:{}|g",
        snapshot.message_ingress, snapshot.message_egress, snapshot.memory_allocated
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_format() {
        let payload = format_payload(&Snapshot {
            message_egress: 3,
            message_ingress: 5,
            memory_allocated: 1024,
        });
        assert_eq!(
            payload,
            "lake.message.ingress:5|c\nlake.message.egress:3|c\nlake.memory.bytes:1024|g"
        );
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let sink = StatsdSink::new("127.0.0.1:8125");
        let err = sink.send(&Snapshot::default()).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_send_reaches_agent() {
        let agent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sink = StatsdSink::new(agent.local_addr().unwrap().to_string());
        sink.connect().await.unwrap();
        sink.connect().await.unwrap();

        sink.send(&Snapshot {
            message_egress: 1,
            message_ingress: 2,
            memory_allocated: 0,
        })
        .await
        .unwrap();

        let mut buf = [0u8; 256];
        let n = agent.recv(&mut buf).await.unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.contains("lake.message.ingress:2|c"));
        assert!(text.contains("lake.message.egress:1|c"));
    }
}
