//! A bound listener and the task accepting on it.

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TransportError;

/// Pause after a failed accept (e.g. file descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

pub(crate) struct Binding {
    local_addr: SocketAddr,
    token: CancellationToken,
    acceptor: JoinHandle<()>,
}

impl Binding {
    /// Binds `addr` and spawns an accept loop calling `on_accept` for each
    /// connection. `token` bounds the lifetime of the loop and of every
    /// connection task spawned from it.
    pub(crate) async fn listen<F, Fut>(
        addr: SocketAddr,
        token: CancellationToken,
        mut on_accept: F,
    ) -> Result<Self, TransportError>
    where
        F: FnMut(TcpStream, SocketAddr, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::from_bind(addr, e))?;
        let local_addr = listener.local_addr()?;

        let loop_token = token.clone();
        let acceptor = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => {
                        debug!(addr = %local_addr, "Accept loop stopping");
                        break;
                    }

                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                let _ = stream.set_nodelay(true);
                                tokio::spawn(on_accept(stream, peer, loop_token.clone()));
                            }
                            Err(e) => {
                                warn!(addr = %local_addr, error = %e, "Failed to accept connection");
                                sleep(ACCEPT_BACKOFF).await;
                            }
                        }
                    }
                }
            }
        });

        Ok(Self {
            local_addr,
            token,
            acceptor,
        })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting, drops every connection and waits until the
    /// listener is closed so the port can be bound again.
    pub(crate) async fn shutdown(mut self) {
        self.token.cancel();
        if let Err(e) = (&mut self.acceptor).await {
            debug!(addr = %self.local_addr, error = %e, "Accept loop ended abnormally");
        }
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
