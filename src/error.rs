//! Error types for the WebSocket state machine.
//!
//! Every protocol violation has its own variant so that tests and embedders
//! can distinguish why a connection was torn down, even though all of them
//! funnel into the same abnormal-closure path (close code 1006).

use thiserror::Error;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a WebSocket connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Reserved bits RSV2/RSV3 set, or RSV1 without negotiated compression.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Opcode in the reserved ranges 0x3-0x7 or 0xB-0xF.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Control frame with FIN=0.
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload over the 125 byte limit.
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// A server received an unmasked frame.
    #[error("Client frame must be masked")]
    UnmaskedFrame,

    /// A client received a masked frame.
    #[error("Server frame must not be masked")]
    MaskedFrame,

    /// Continuation frame without a preceding non-final data frame.
    #[error("Unexpected continuation frame")]
    UnexpectedContinuation,

    /// A fresh text or binary frame arrived while a fragmented message was
    /// still open.
    #[error("Expected continuation frame")]
    ContinuationExpected,

    /// Invalid UTF-8 in a text message or close reason.
    #[error("Invalid UTF-8 in text payload")]
    InvalidUtf8,

    /// Declared or accumulated payload exceeds the group's maximum.
    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadOverLimit {
        /// Observed payload size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Inbound close frame carried a code outside the permitted ranges.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Compression or decompression failure; fatal for the connection.
    #[error("Compression error: {0}")]
    Compression(String),

    /// Malformed or unsupported handshake input.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Rejected group configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A group transfer could not be carried out.
    #[error("Transfer rejected: {0}")]
    Transfer(String),

    /// I/O error from the underlying transport.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
