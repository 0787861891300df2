//! Transport seam between the client and the feedback backend.
//!
//! Architecture:
//! - `protocol.rs` - backend requests and the JSON wire encoding
//! - `socket.rs` - stream socket binding (Unix sockets on Linux/macOS, Named Pipes on Windows)
//!
//! A transport sends correlated calls and one-way directives, and hands
//! replies and subscribed signals back through its `incoming()` queue. The
//! client drains that queue from the application's event loop.

mod protocol;
mod socket;

use async_channel::Receiver;
use thiserror::Error;

pub use protocol::{BackendRequest, WireCommand, WireMessage, WireReply, WireSignal};
pub use socket::SocketTransport;

/// Name of the backend's state-change signal.
pub const STATUS_SIGNAL: &str = "Status";

#[derive(Error, Debug)]
pub enum TransportError {
  #[error("Connection failed: {0}")]
  ConnectionFailed(String),
  #[error("Failed to encode request: {0}")]
  Encode(#[from] serde_json::Error),
  #[error("Disconnected")]
  Disconnected,
}

/// Handle of an in-flight correlated call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallId(pub u64);

impl std::fmt::Display for CallId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Decoded reply to a `Play` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayReply {
  /// The backend answered with a handle. Zero means the event was rejected.
  Handle(u32),
  /// The reply did not carry a u32 handle.
  Malformed,
  /// The backend, or the transport on its behalf, reported an error.
  Error(String),
}

/// State-change notification from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSignal {
  pub handle: u32,
  pub state: u32,
}

/// Message delivered by a transport to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
  /// Reply to a call made with `send_request`. Delivered at most once per call.
  Reply { call: CallId, reply: PlayReply },
  /// A subscribed status signal.
  Status(StatusSignal),
}

/// Message-based connection to the backend.
pub trait Transport {
  /// Send a correlated call; the reply arrives later as `Incoming::Reply`.
  fn send_request(&self, request: &BackendRequest) -> Result<CallId, TransportError>;

  /// Send a directive that expects no reply.
  fn send_oneway(&self, request: &BackendRequest) -> Result<(), TransportError>;

  /// Suppress the reply of `call` if it has not been delivered yet.
  fn cancel(&self, call: CallId);

  /// Start delivering signals named `signal`.
  fn subscribe(&self, signal: &str) -> Result<(), TransportError>;

  /// Stop delivering signals named `signal`.
  fn unsubscribe(&self, signal: &str);

  /// Queue of replies and subscribed signals.
  fn incoming(&self) -> Option<Receiver<Incoming>>;

  fn is_connected(&self) -> bool;

  /// Flush queued directives and release the connection.
  fn close(&self);
}

/// Transport a client is created with.
pub enum TransportBinding {
  /// Built-in stream socket binding.
  Socket(SocketTransport),
  /// Any other implementation of [`Transport`].
  Custom(Box<dyn Transport>),
}

impl TransportBinding {
  pub(crate) fn into_transport(self) -> Box<dyn Transport> {
    match self {
      TransportBinding::Socket(socket) => Box::new(socket),
      TransportBinding::Custom(transport) => transport,
    }
  }
}

impl std::fmt::Debug for TransportBinding {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      TransportBinding::Socket(_) => f.write_str("TransportBinding::Socket"),
      TransportBinding::Custom(_) => f.write_str("TransportBinding::Custom"),
    }
  }
}
