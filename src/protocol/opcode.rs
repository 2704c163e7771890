//! WebSocket frame opcodes as defined in RFC 6455.

use crate::error::{Error, Result};

/// WebSocket frame opcode.
///
/// Defines the interpretation of the payload data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Continuation frame (0x0).
    ///
    /// Used for fragmented messages after the initial frame.
    Continuation = 0x0,

    /// Text frame (0x1).
    ///
    /// Payload must be valid UTF-8 once the message is complete.
    Text = 0x1,

    /// Binary frame (0x2).
    ///
    /// Payload is arbitrary binary data.
    Binary = 0x2,

    /// Close frame (0x8).
    ///
    /// Initiates the closing handshake. May carry a status code and reason.
    Close = 0x8,

    /// Ping frame (0x9).
    ///
    /// The receiver must respond with a Pong carrying the same payload.
    Ping = 0x9,

    /// Pong frame (0xA).
    ///
    /// Response to Ping. May also be sent unsolicited as a heartbeat.
    Pong = 0xA,
}

impl OpCode {
    /// Create an opcode from the low nibble of a frame's first byte.
    ///
    /// # Errors
    ///
    /// Returns `Error::ReservedOpcode` for values in 0x3-0x7 and 0xB-0xF.
    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            _ => Err(Error::ReservedOpcode(byte)),
        }
    }

    /// Raw wire value.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Control frames: Close (0x8), Ping (0x9), Pong (0xA).
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Data frames: Continuation (0x0), Text (0x1), Binary (0x2).
    #[inline]
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, OpCode::Continuation | OpCode::Text | OpCode::Binary)
    }
}
