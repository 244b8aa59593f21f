//! Inbound many-to-one socket.
//!
//! Any number of pushers connect; each connection is read by its own task
//! and its frames are queued in arrival order. No ordering holds across
//! connections.

use std::net::SocketAddr;

use bytes::Bytes;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::binding::Binding;
use crate::codec::frame_codec;
use crate::error::TransportError;
use crate::options::SocketOptions;
use crate::queue::{queue, QueueReceiver, QueueSender};

/// Pull socket created by [`Context::pull`](crate::Context::pull).
pub struct PullSocket {
    context: CancellationToken,
    token: CancellationToken,
    options: SocketOptions,
    sender: QueueSender,
    receiver: QueueReceiver,
    binding: Option<Binding>,
}

impl PullSocket {
    pub(crate) fn new(context: CancellationToken, options: SocketOptions) -> Self {
        let token = context.child_token();
        let (sender, receiver) = queue(options.high_water_mark);
        Self {
            context,
            token,
            options,
            sender,
            receiver,
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

    /// Starts accepting pushers on `addr` and returns the bound address.
    ///
    /// # Errors
    ///
    /// - `AddressInUse` / `TryAgain` when the port is still held
    /// - `Bind` for any other bind failure
    /// - `AlreadyBound` if the socket already listens
    /// - `SocketClosed` / `ContextTerminated` once closed
    pub async fn bind(&mut self, addr: SocketAddr) -> Result<SocketAddr, TransportError> {
        self.ensure_open()?;
        if let Some(addr) = self.local_addr() {
            return Err(TransportError::AlreadyBound { addr });
        }

        let sender = self.sender.clone();
        let binding = Binding::listen(addr, self.token.child_token(), move |stream, peer, token| {
            read_pusher(stream, peer, sender.clone(), token)
        })
        .await?;

        let local = binding.local_addr();
        info!(addr = %local, "Pull socket bound");
        self.binding = Some(binding);
        Ok(local)
    }

    /// Waits for the next message from any pusher.
    ///
    /// Returns `ContextTerminated` as soon as the owning context is
    /// terminated, even while parked.
    pub async fn recv(&mut self) -> Result<Bytes, TransportError> {
        let conflate = self.options.conflate;
        tokio::select! {
            biased;

            _ = self.token.cancelled() => Err(self.closed_error()),

            message = self.receiver.next(conflate) => message.ok_or(TransportError::SocketClosed),
        }
    }

    /// Stops listening and disconnects every pusher.
    ///
    /// Returns once the port is released.
    pub async fn unbind(&mut self) {
        if let Some(binding) = self.binding.take() {
            let addr = binding.local_addr();
            binding.shutdown().await;
            debug!(addr = %addr, "Pull socket unbound");
        }
    }

    /// Unbinds and closes the socket.
    pub async fn close(mut self) {
        self.unbind().await;
        self.token.cancel();
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.token.is_cancelled() {
            return Err(self.closed_error());
        }
        Ok(())
    }

    fn closed_error(&self) -> TransportError {
        if self.context.is_cancelled() {
            TransportError::ContextTerminated
        } else {
            TransportError::SocketClosed
        }
    }
}

impl Drop for PullSocket {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Reads frames from one pusher until it disconnects or the socket closes.
async fn read_pusher(
    stream: TcpStream,
    peer: SocketAddr,
    sender: QueueSender,
    token: CancellationToken,
) {
    debug!(peer = %peer, "Pusher connected");
    let mut frames = FramedRead::new(stream, frame_codec());

    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => break,
            frame = frames.next() => frame,
        };

        match frame {
            Some(Ok(message)) => {
                tokio::select! {
                    _ = token.cancelled() => break,
                    result = sender.send(message.freeze()) => {
                        if result.is_err() {
                            break;
                        }
                    }
                }
            }
            Some(Err(e)) => {
                debug!(peer = %peer, error = %e, "Dropping pusher after framing error");
                break;
            }
            None => {
                debug!(peer = %peer, "Pusher disconnected");
                break;
            }
        }
    }
}
