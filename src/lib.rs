//! # wsgrid - Grouped WebSocket Endpoint Core
//!
//! `wsgrid` is the per-connection state machine of a high-performance
//! WebSocket endpoint: RFC 6455 framing, fragmentation reassembly,
//! permessage-deflate, the closing handshake, the server upgrade response,
//! and transfer of live connections between groups and event loops.
//!
//! ## Features
//!
//! - **Push-driven core** fed by any event loop through a small
//!   [`Transport`] contract
//! - **Full RFC 6455 validation** with per-violation error variants
//! - **Permessage-deflate** with group-shared or per-connection sliding
//!   window compression (RFC 7692)
//! - **Corked writes**: everything sent from handlers during one read chunk
//!   coalesces into at most one transport write
//! - **Group transfer**: move live connections between groups on the same
//!   loop, or across loops through the socket layer
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wsgrid::{Group, GroupOptions, LoopId, OpCode};
//!
//! let mut group = Group::new(LoopId(1), GroupOptions::default())?;
//! group.on_message(|conn, ctx, data, opcode| {
//!     let echo = data.to_vec();
//!     conn.send(ctx, &echo, opcode, false, None);
//! });
//!
//! // Driven by the embedder's event loop:
//! let id = group.accept(transport, sec_key, "", "")?;
//! group.on_data(id, &chunk);
//! ```

pub mod compression;
pub mod config;
pub mod connection;
pub mod error;
pub mod group;
pub mod protocol;
pub mod transport;

pub use config::{ExtensionOptions, GroupOptions};
pub use connection::{CompressionStatus, Connection, ConnectionState, Role, SendCallback};
pub use error::{Error, Result};
pub use group::{ConnId, Group, GroupCtx, GroupId, Handlers};
pub use protocol::{compute_accept_key, OpCode, WS_GUID};
pub use transport::{LoopId, Migrator, Transport, TransferRequest};
