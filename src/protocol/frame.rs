//! WebSocket frame formatting and header parsing (RFC 6455).
//!
//! The outbound side frames complete messages in single frames; the inbound
//! side decodes headers for the streaming parser. Close payload helpers live
//! here as well because their wire format is part of the frame grammar.

use crate::error::{Error, Result};
use crate::protocol::mask::apply_mask_fast;
use crate::protocol::opcode::OpCode;

/// Maximum payload size for control frames (RFC 6455).
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Maximum close reason length: control payload minus the 2-byte code.
pub const MAX_CLOSE_REASON: usize = 123;

/// Largest possible frame header: 2 base + 8 extended length + 4 mask.
pub const MAX_HEADER: usize = 14;

/// Normal closure status code, also the default when a caller passes 0.
pub const CLOSE_CODE_NORMAL: u16 = 1000;

/// Abnormal closure; never put on the wire, only reported locally.
pub const CLOSE_CODE_ABNORMAL: u16 = 1006;

/// Frame header as laid out on the wire.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
/// |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
/// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
/// | |1|2|3|       |K|             |                               |
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |                         Masking key (if present)              |
/// +---------------------------------------------------------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag.
    pub fin: bool,
    /// Reserved bit 1; per-message compression marker when negotiated.
    pub rsv1: bool,
    /// Reserved bit 2. Always a protocol error when set.
    pub rsv2: bool,
    /// Reserved bit 3. Always a protocol error when set.
    pub rsv3: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Masking key, present on client-to-server frames.
    pub mask: Option<[u8; 4]>,
    /// Declared payload length.
    pub payload_len: usize,
    /// Total header size in bytes.
    pub header_len: usize,
}

/// Outcome of an incremental header decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderStatus {
    /// Header fully decoded.
    Complete(FrameHeader),
    /// More bytes are needed; nothing was consumed.
    Partial,
}

impl FrameHeader {
    /// Decode a header from the start of `buf`.
    ///
    /// # Errors
    ///
    /// Returns `Error::ReservedOpcode` for opcodes in the reserved ranges.
    /// Structural checks that need connection context (masking policy,
    /// reserved bits, length limits) are the parser's job.
    pub fn parse(buf: &[u8]) -> Result<HeaderStatus> {
        if buf.len() < 2 {
            return Ok(HeaderStatus::Partial);
        }

        let byte0 = buf[0];
        let byte1 = buf[1];

        let opcode = OpCode::from_u8(byte0 & 0x0F)?;
        let masked = (byte1 & 0x80) != 0;

        let (payload_len, length_size) = match byte1 & 0x7F {
            len @ 0..=125 => (len as usize, 0),
            126 => {
                if buf.len() < 4 {
                    return Ok(HeaderStatus::Partial);
                }
                (u16::from_be_bytes([buf[2], buf[3]]) as usize, 2)
            }
            _ => {
                if buf.len() < 10 {
                    return Ok(HeaderStatus::Partial);
                }
                let len = u64::from_be_bytes([
                    buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8], buf[9],
                ]);
                let len = usize::try_from(len).map_err(|_| Error::PayloadOverLimit {
                    size: usize::MAX,
                    max: usize::MAX,
                })?;
                (len, 8)
            }
        };

        let header_len = 2 + length_size + if masked { 4 } else { 0 };
        if buf.len() < header_len {
            return Ok(HeaderStatus::Partial);
        }

        let mask = masked.then(|| {
            let o = 2 + length_size;
            [buf[o], buf[o + 1], buf[o + 2], buf[o + 3]]
        });

        Ok(HeaderStatus::Complete(FrameHeader {
            fin: (byte0 & 0x80) != 0,
            rsv1: (byte0 & 0x40) != 0,
            rsv2: (byte0 & 0x20) != 0,
            rsv3: (byte0 & 0x10) != 0,
            opcode,
            mask,
            payload_len,
            header_len,
        }))
    }

    /// Header length needed once the first two bytes are known.
    ///
    /// Returns 2 when fewer than two bytes are available yet.
    #[must_use]
    pub fn required_len(prefix: &[u8]) -> usize {
        if prefix.len() < 2 {
            return 2;
        }
        let byte1 = prefix[1];
        let length_size = match byte1 & 0x7F {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        2 + length_size + if byte1 & 0x80 != 0 { 4 } else { 0 }
    }
}

/// Frame a complete message into `dst`, appending header plus payload.
///
/// FIN is always set. RSV1 is set iff `compressed`. When `mask` is given the
/// 4-byte key is written after the length and the payload is XOR-masked as
/// it is copied.
///
/// Returns the number of bytes appended.
pub fn format_message(
    dst: &mut Vec<u8>,
    payload: &[u8],
    opcode: OpCode,
    compressed: bool,
    mask: Option<[u8; 4]>,
) -> usize {
    let start = dst.len();

    let mut byte0 = 0x80 | opcode.as_u8();
    if compressed {
        byte0 |= 0x40;
    }
    dst.push(byte0);

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    if payload.len() <= 125 {
        dst.push(mask_bit | payload.len() as u8);
    } else if payload.len() <= u16::MAX as usize {
        dst.push(mask_bit | 126);
        dst.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    } else {
        dst.push(mask_bit | 127);
        dst.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    }

    if let Some(key) = mask {
        dst.extend_from_slice(&key);
        let payload_start = dst.len();
        dst.extend_from_slice(payload);
        apply_mask_fast(&mut dst[payload_start..], key);
    } else {
        dst.extend_from_slice(payload);
    }

    dst.len() - start
}

/// Emit a close payload: big-endian status code followed by the reason,
/// truncated so the total stays within the control frame limit.
///
/// `code == 0` produces an empty payload. Returns the bytes written; `dst`
/// must hold at least `2 + MAX_CLOSE_REASON` bytes.
pub fn format_close_payload(dst: &mut [u8], code: u16, reason: &[u8]) -> usize {
    if code == 0 {
        return 0;
    }
    let reason_len = reason.len().min(MAX_CLOSE_REASON);
    dst[..2].copy_from_slice(&code.to_be_bytes());
    dst[2..2 + reason_len].copy_from_slice(&reason[..reason_len]);
    2 + reason_len
}

/// Decoded close frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosePayload<'a> {
    /// Status code; 0 when the payload had no code.
    pub code: u16,
    /// UTF-8 reason bytes, possibly empty.
    pub reason: &'a [u8],
}

/// Parse a close frame payload. Payloads shorter than two bytes yield code 0
/// and an empty reason.
#[must_use]
pub fn parse_close_payload(payload: &[u8]) -> ClosePayload<'_> {
    if payload.len() < 2 {
        return ClosePayload {
            code: 0,
            reason: &[],
        };
    }
    ClosePayload {
        code: u16::from_be_bytes([payload[0], payload[1]]),
        reason: &payload[2..],
    }
}

/// Whether an inbound close code is acceptable on the wire.
///
/// 1004 is reserved, 1005/1006/1015 are for local use only, and everything
/// below 1000 or in 1012..=2999 outside the defined set is rejected. The
/// 3000-3999 and 4000-4999 ranges are registered and private use.
#[must_use]
pub fn is_valid_close_code(code: u16) -> bool {
    matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
}
