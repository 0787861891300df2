//! Client library for a feedback backend (haptics, sounds, LEDs).
//!
//! Applications ask the backend to play named events, optionally with a
//! [`PropertyList`] of parameters, and get state-change notifications for
//! each event they started. Events can be stopped, paused and resumed.
//!
//! Architecture:
//! - `proplist.rs` - typed key/value parameters sent with an event
//! - `state.rs` - event state codes reported by the backend
//! - `registry/` - pending and active request bookkeeping
//! - `transport/` - transport seam and the stream socket binding
//! - `client.rs` - the client that ties requests, replies and signals together
//! - `config.rs` - connection configuration
//!
//! ```no_run
//! # async fn example() -> Result<(), feedback_client::ClientError> {
//! use feedback_client::{ClientConfig, FeedbackClient, PropertyList};
//!
//! let mut client = FeedbackClient::connect(&ClientConfig::default()).await?;
//! client.set_callback(|id, state| println!("event {} is {}", id, state));
//!
//! let mut properties = PropertyList::new();
//! properties.set_string("audio", "ring.wav").ok();
//! let id = client.play("ringtone", Some(&properties))?;
//!
//! while client.is_pending(id) || client.is_active(id) {
//!   if !client.process_next().await {
//!     break;
//!   }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod proplist;
pub mod registry;
pub mod state;
pub mod transport;

#[cfg(test)]
mod testing;

/// Client-side event id. Never zero.
pub type EventId = u32;

pub use client::{ClientError, EventCallback, FeedbackClient};
pub use config::{ClientConfig, ConfigError};
pub use proplist::{
  parse_boolean, parse_integer, parse_unsigned, PropertyError, PropertyList, PropertyValue,
  ValueType,
};
pub use state::EventState;
pub use transport::{
  BackendRequest, CallId, Incoming, PlayReply, SocketTransport, StatusSignal, Transport,
  TransportBinding, TransportError,
};
