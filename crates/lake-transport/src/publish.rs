//! Outbound one-to-many socket.
//!
//! Every connected subscriber has its own queue and writer task. `send`
//! never waits on a subscriber: a subscriber whose bounded queue is full
//! misses the message, one whose writer has gone away is removed.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::binding::Binding;
use crate::codec::frame_codec;
use crate::error::TransportError;
use crate::options::SocketOptions;
use crate::queue::{queue, Offer, QueueReceiver, QueueSender};

type Subscribers = Arc<Mutex<HashMap<u64, QueueSender>>>;

/// Publish socket created by [`Context::publisher`](crate::Context::publisher).
pub struct PubSocket {
    context: CancellationToken,
    token: CancellationToken,
    options: SocketOptions,
    subscribers: Subscribers,
    next_id: Arc<AtomicU64>,
    binding: Option<Binding>,
}

impl PubSocket {
    pub(crate) fn new(context: CancellationToken, options: SocketOptions) -> Self {
        let token = context.child_token();
        Self {
            context,
            token,
            options,
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            binding: None,
        }
    }

    /// Options this socket was created with.
    pub fn options(&self) -> SocketOptions {
        self.options
    }

    /// Address the socket listens on, if bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.binding.as_ref().map(Binding::local_addr)
    }

    /// Number of currently connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Starts accepting subscribers on `addr` and returns the bound address.
    ///
    /// # Errors
    ///
    /// Same as [`PullSocket::bind`](crate::PullSocket::bind).
    pub async fn bind(&mut self, addr: SocketAddr) -> Result<SocketAddr, TransportError> {
        self.ensure_open()?;
        if let Some(addr) = self.local_addr() {
            return Err(TransportError::AlreadyBound { addr });
        }

        let subscribers = Arc::clone(&self.subscribers);
        let next_id = Arc::clone(&self.next_id);
        let options = self.options;
        let binding = Binding::listen(addr, self.token.child_token(), move |stream, peer, token| {
            let id = next_id.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = queue(options.high_water_mark);
            subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id, tx);
            debug!(peer = %peer, subscriber = id, "Subscriber connected");
            write_subscriber(stream, peer, rx, options.conflate, token)
        })
        .await?;

        let local = binding.local_addr();
        info!(addr = %local, "Publish socket bound");
        self.binding = Some(binding);
        Ok(local)
    }

    /// Fans `message` out to every connected subscriber.
    ///
    /// Succeeds with zero subscribers; the message is then dropped.
    ///
    /// # Errors
    ///
    /// `SocketClosed` / `ContextTerminated` once the socket is closed.
    pub async fn send(&self, message: Bytes) -> Result<(), TransportError> {
        self.ensure_open()?;

        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        subscribers.retain(|id, tx| match tx.offer(message.clone()) {
            Offer::Accepted => true,
            Offer::Full => {
                debug!(subscriber = id, "Subscriber queue full, dropping message");
                true
            }
            Offer::Closed => {
                debug!(subscriber = id, "Removing disconnected subscriber");
                false
            }
        });

        Ok(())
    }

    /// Stops listening and disconnects every subscriber.
    pub async fn unbind(&mut self) {
        if let Some(binding) = self.binding.take() {
            let addr = binding.local_addr();
            binding.shutdown().await;
            self.subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            debug!(addr = %addr, "Publish socket unbound");
        }
    }

    /// Unbinds and closes the socket.
    pub async fn close(mut self) {
        self.unbind().await;
        self.token.cancel();
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.token.is_cancelled() {
            return Err(if self.context.is_cancelled() {
                TransportError::ContextTerminated
            } else {
                TransportError::SocketClosed
            });
        }
        Ok(())
    }
}

impl Drop for PubSocket {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Drains one subscriber's queue onto its connection.
async fn write_subscriber(
    stream: TcpStream,
    peer: SocketAddr,
    mut rx: QueueReceiver,
    conflate: bool,
    token: CancellationToken,
) {
    let mut frames = FramedWrite::new(stream, frame_codec());

    loop {
        let message = tokio::select! {
            _ = token.cancelled() => break,
            message = rx.next(conflate) => message,
        };

        let Some(message) = message else {
            break;
        };

        if let Err(e) = frames.send(message).await {
            debug!(peer = %peer, error = %e, "Subscriber write failed");
            break;
        }
    }
    // rx is dropped here; the next send notices and removes the entry
}
