//! Peers of the relay sockets: a pusher and a subscriber.
//!
//! Used by producers and consumers of the relay, and by the tests.
//!
//! # Relay restarts
//!
//! A relay that recovers from a crash tears its sockets down and binds new
//! ones on the same addresses. Existing connections do not survive that:
//! a subscriber sees the publisher hang up (`recv` returns `None`) and a
//! pusher's next `send` fails. Both peers remember their address, so
//! [`reconnect`](SubscribeClient::reconnect) picks the relay up again.

use std::net::SocketAddr;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::codec::frame_codec;
use crate::error::TransportError;

async fn dial(addr: SocketAddr) -> Result<TcpStream, TransportError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Connects to a [`PullSocket`](crate::PullSocket) and pushes messages.
pub struct PushClient {
    addr: SocketAddr,
    frames: FramedWrite<TcpStream, LengthDelimitedCodec>,
}

impl PushClient {
    /// Connects to the pull socket at `addr`.
    pub async fn connect(addr: SocketAddr) -> Result<Self, TransportError> {
        Ok(Self {
            addr,
            frames: FramedWrite::new(dial(addr).await?, frame_codec()),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Sends one message and flushes it to the wire.
    pub async fn send(&mut self, message: impl Into<Bytes>) -> Result<(), TransportError> {
        self.frames.send(message.into()).await?;
        Ok(())
    }

    /// Replaces the connection with a fresh one to the same address.
    ///
    /// # Errors
    ///
    /// Returns the connect error; the old connection is kept in that case.
    pub async fn reconnect(&mut self) -> Result<(), TransportError> {
        self.frames = FramedWrite::new(dial(self.addr).await?, frame_codec());
        Ok(())
    }
}

/// Connects to a [`PubSocket`](crate::PubSocket) and receives everything it
/// publishes from the moment of connection.
pub struct SubscribeClient {
    addr: SocketAddr,
    frames: FramedRead<TcpStream, LengthDelimitedCodec>,
}

impl SubscribeClient {
    /// Connects to the publish socket at `addr`.
    pub async fn connect(addr: SocketAddr) -> Result<Self, TransportError> {
        Ok(Self {
            addr,
            frames: FramedRead::new(dial(addr).await?, frame_codec()),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Next published message, or `None` once the publisher hangs up.
    pub async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.frames.next().await {
            Some(Ok(frame)) => Ok(Some(frame.freeze())),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// Replaces the connection with a fresh one to the same address.
    ///
    /// Messages published while disconnected are not delivered.
    ///
    /// # Errors
    ///
    /// Returns the connect error; the old connection is kept in that case.
    pub async fn reconnect(&mut self) -> Result<(), TransportError> {
        self.frames = FramedRead::new(dial(self.addr).await?, frame_codec());
        Ok(())
    }
}
