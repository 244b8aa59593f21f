//! Lake Transport - byte-message pull/publish sockets
//!
//! An opaque pub/sub transport: many pushers deliver length-delimited
//! frames to one pull socket, and one publish socket fans every frame out
//! to all connected subscribers. Payloads are never inspected.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐                                  ┌────────────────┐
//! │  PushClient  │──┐                           ┌──▶│ SubscribeClient│
//! └──────────────┘  │   ┌────────────┐          │   └────────────────┘
//! ┌──────────────┐  ├──▶│ PullSocket │  recv()  │   ┌────────────────┐
//! │  PushClient  │──┘   └────────────┘    │     ├──▶│ SubscribeClient│
//! └──────────────┘                        ▼     │   └────────────────┘
//!                                   ┌──────────┐│
//!                                   │PubSocket │┘
//!                                   └──────────┘  send()
//!              both sockets belong to one Context
//! ```
//!
//! Terminating the [`Context`] makes every pending and future call on its
//! sockets fail with [`TransportError::ContextTerminated`], which is how a
//! blocked `recv()` is unblocked from another thread.
//!
//! Connections never outlive their socket. After a relay restart, peers
//! call `reconnect()` on their [`client`] to reach the new sockets.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection-level failures drop that connection and never reach `recv()`

mod binding;
pub mod client;
pub mod codec;
pub mod context;
pub mod error;
pub mod options;
pub mod publish;
pub mod pull;
mod queue;

pub use client::{PushClient, SubscribeClient};
pub use codec::{frame_codec, MAX_FRAME_LENGTH};
pub use context::{Context, Terminator};
pub use error::TransportError;
pub use options::{HighWaterMark, SocketOptions};
pub use publish::PubSocket;
pub use pull::PullSocket;

pub use bytes::Bytes;
