//! Transport errors and their transient/fatal classification.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors that can occur on transport sockets.
///
/// # Classification
///
/// - fatal: [`SocketClosed`](Self::SocketClosed) and
///   [`ContextTerminated`](Self::ContextTerminated). The session is gone and
///   must be torn down.
/// - transient: everything else, including errors nobody classified. Callers
///   retry rather than fail closed.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Operation should simply be retried
    #[error("Resource temporarily unavailable")]
    TryAgain,

    /// The address is still held, typically by the previous relay cycle
    #[error("Address {addr} already in use")]
    AddressInUse { addr: SocketAddr },

    /// Bind failed for a reason retrying will not fix
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The socket already listens somewhere
    #[error("Socket is already bound to {addr}")]
    AlreadyBound { addr: SocketAddr },

    /// The socket was closed by its owner
    #[error("Socket is closed")]
    SocketClosed,

    /// The owning context was terminated
    #[error("Transport context was terminated")]
    ContextTerminated,

    /// Any other I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Maps a bind failure on `addr`.
    pub fn from_bind(addr: SocketAddr, error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::AddrInUse => Self::AddressInUse { addr },
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Self::TryAgain,
            _ => Self::Bind {
                addr,
                source: error,
            },
        }
    }

    /// Returns true if the session behind the socket is gone.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SocketClosed | Self::ContextTerminated)
    }

    /// Returns true if the operation is worth retrying.
    ///
    /// Unclassified errors count as transient.
    pub fn is_transient(&self) -> bool {
        !self.is_fatal()
    }

    /// Returns true if a failed bind should be retried after a short backoff.
    pub fn is_retryable_bind(&self) -> bool {
        matches!(self, Self::TryAgain | Self::AddressInUse { .. })
    }
}
