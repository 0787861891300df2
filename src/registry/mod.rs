//! Bookkeeping for requests across their lifecycle.
//!
//! - `pending.rs` - requests sent but not yet acknowledged
//! - `active.rs` - requests acknowledged with a backend handle

mod active;
mod pending;

pub use active::{ActiveEvent, ActiveRegistry};
pub use pending::{PendingRegistry, PendingRequest};
