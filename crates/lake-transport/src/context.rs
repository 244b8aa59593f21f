//! Transport context: the lifetime shared by a set of sockets.

use tokio_util::sync::CancellationToken;

use crate::options::SocketOptions;
use crate::publish::PubSocket;
use crate::pull::PullSocket;

/// Owns the lifetime of its sockets.
///
/// [`terminate`](Self::terminate) closes every socket created from this
/// context; blocked calls return [`TransportError::ContextTerminated`].
///
/// [`TransportError::ContextTerminated`]: crate::TransportError::ContextTerminated
#[derive(Debug, Default)]
pub struct Context {
    token: CancellationToken,
}

impl Context {
    /// Creates a live context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an unbound pull socket.
    pub fn pull(&self, options: SocketOptions) -> PullSocket {
        PullSocket::new(self.token.clone(), options)
    }

    /// Creates an unbound publish socket.
    pub fn publisher(&self, options: SocketOptions) -> PubSocket {
        PubSocket::new(self.token.clone(), options)
    }

    /// Terminates the context and every socket in it.
    pub fn terminate(&self) {
        self.token.cancel();
    }

    /// Returns true once the context has been terminated.
    pub fn is_terminated(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Handle that can terminate this context from anywhere.
    pub fn terminator(&self) -> Terminator {
        Terminator {
            token: self.token.clone(),
        }
    }
}

/// Cloneable, thread-safe handle that terminates one [`Context`].
#[derive(Debug, Clone)]
pub struct Terminator {
    token: CancellationToken,
}

impl Terminator {
    /// Terminates the context. Idempotent.
    pub fn terminate(&self) {
        self.token.cancel();
    }

    /// Returns true once the context has been terminated.
    pub fn is_terminated(&self) -> bool {
        self.token.is_cancelled()
    }
}
