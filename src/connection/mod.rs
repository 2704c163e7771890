//! The per-connection WebSocket state machine.
//!
//! A [`Connection`] is created by its group after a successful upgrade and
//! driven by the embedder's event loop through `Group::on_data`,
//! `Group::on_writable` and `Group::on_eof`. Its lifecycle:
//!
//! 1. **Open** - steady state after the handshake response
//! 2. **ShuttingDown** - a close frame was sent or received
//! 3. **Closed** - terminal; resources released, queued callbacks cancelled

mod role;
mod state;

pub(crate) mod queue;

#[allow(clippy::module_inception)]
mod connection;

pub use connection::{Connection, SendCallback};
pub use role::Role;
pub use state::{CompressionStatus, ConnectionState};
