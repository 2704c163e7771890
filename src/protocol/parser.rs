//! Incremental frame parsing over arbitrary read-chunk boundaries.
//!
//! The parser is fed whatever the event loop read and pushes payload pieces
//! into a [`FragmentSink`] as soon as they decode, together with the number
//! of bytes still owed for the current frame. Partially received headers are
//! buffered internally until complete; payloads are never buffered here.

use bytes::BytesMut;

use crate::connection::Role;
use crate::error::{Error, Result};
use crate::protocol::frame::{FrameHeader, HeaderStatus, MAX_CONTROL_PAYLOAD, MAX_HEADER};
use crate::protocol::mask::apply_mask_offset;
use crate::protocol::opcode::OpCode;

/// Per-connection constants the parser validates against.
#[derive(Debug, Clone, Copy)]
pub struct ParseConfig {
    /// Local role; decides which masking direction is a violation.
    pub role: Role,
    /// Whether permessage-deflate was negotiated, legalizing RSV1.
    pub deflate_negotiated: bool,
    /// Tolerate unmasked frames at a server.
    pub accept_unmasked: bool,
    /// Upper bound for a declared data frame length.
    pub max_payload: usize,
}

/// What the sink wants the parser to do after a fragment was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Keep decoding the current chunk.
    Continue,
    /// Drop the rest of the chunk; the connection left its readable state.
    Abort,
}

/// Receiver for decoded payload pieces.
pub trait FragmentSink {
    /// Handle a payload piece.
    ///
    /// `remaining` counts the bytes of this frame still to come in later
    /// chunks. `opcode` is the message opcode, with continuations already
    /// resolved to the opcode of the first frame. `compressed` reports RSV1,
    /// which can only be set on a message's first frame.
    ///
    /// # Errors
    ///
    /// An error tears the connection down as a protocol violation.
    fn fragment(
        &mut self,
        data: &[u8],
        remaining: usize,
        opcode: OpCode,
        fin: bool,
        compressed: bool,
    ) -> Result<Dispatch>;
}

#[derive(Debug, Clone, Copy)]
struct InFrame {
    opcode: OpCode,
    fin: bool,
    compressed: bool,
    remaining: usize,
    mask: Option<[u8; 4]>,
    mask_offset: usize,
}

/// Streaming frame decoder. One per connection.
#[derive(Debug, Default)]
pub struct FrameParser {
    header_buf: [u8; MAX_HEADER],
    header_len: usize,
    in_frame: Option<InFrame>,
    /// Opcode of the open fragmented data message, if any.
    message_opcode: Option<OpCode>,
    /// Reused unmasking buffer.
    scratch: BytesMut,
}

impl FrameParser {
    /// Create a parser with empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one read chunk, pushing payload pieces into `sink`.
    ///
    /// # Errors
    ///
    /// Any error is a protocol violation and the parser state is no longer
    /// meaningful; the caller must terminate the connection.
    pub fn consume<S: FragmentSink>(
        &mut self,
        chunk: &[u8],
        cfg: &ParseConfig,
        sink: &mut S,
    ) -> Result<()> {
        let mut input = chunk;

        loop {
            // Payload phase: forward bytes of the frame in progress.
            if let Some(frame) = self.in_frame {
                if input.is_empty() {
                    return Ok(());
                }
                let take = frame.remaining.min(input.len());
                let (piece, rest) = input.split_at(take);
                input = rest;
                let remaining_after = frame.remaining - take;

                let dispatch = if let Some(key) = frame.mask {
                    self.scratch.clear();
                    self.scratch.extend_from_slice(piece);
                    apply_mask_offset(&mut self.scratch, key, frame.mask_offset);
                    sink.fragment(
                        &self.scratch,
                        remaining_after,
                        frame.opcode,
                        frame.fin,
                        frame.compressed,
                    )?
                } else {
                    sink.fragment(piece, remaining_after, frame.opcode, frame.fin, frame.compressed)?
                };

                if remaining_after == 0 {
                    self.in_frame = None;
                    if frame.opcode.is_data() && frame.fin {
                        self.message_opcode = None;
                    }
                } else if let Some(f) = self.in_frame.as_mut() {
                    f.remaining = remaining_after;
                    f.mask_offset += take;
                }

                if dispatch == Dispatch::Abort {
                    return Ok(());
                }
                continue;
            }

            if input.is_empty() {
                return Ok(());
            }

            // Header phase.
            let header = if self.header_len == 0 {
                match FrameHeader::parse(input)? {
                    HeaderStatus::Complete(h) => {
                        input = &input[h.header_len..];
                        h
                    }
                    HeaderStatus::Partial => {
                        // A partial header is always shorter than MAX_HEADER.
                        self.header_buf[..input.len()].copy_from_slice(input);
                        self.header_len = input.len();
                        return Ok(());
                    }
                }
            } else {
                // Top the stash up only to the known header length so that
                // payload bytes never land in it.
                loop {
                    let required = FrameHeader::required_len(&self.header_buf[..self.header_len]);
                    if self.header_len >= required {
                        break;
                    }
                    if input.is_empty() {
                        return Ok(());
                    }
                    let take = (required - self.header_len).min(input.len());
                    self.header_buf[self.header_len..self.header_len + take]
                        .copy_from_slice(&input[..take]);
                    self.header_len += take;
                    input = &input[take..];
                }
                match FrameHeader::parse(&self.header_buf[..self.header_len])? {
                    HeaderStatus::Complete(h) => {
                        self.header_len = 0;
                        h
                    }
                    HeaderStatus::Partial => return Ok(()),
                }
            };

            validate_header(&header, cfg)?;

            let delivered_opcode = match header.opcode {
                OpCode::Continuation => self
                    .message_opcode
                    .ok_or(Error::UnexpectedContinuation)?,
                op if op.is_data() => {
                    if self.message_opcode.is_some() {
                        return Err(Error::ContinuationExpected);
                    }
                    op
                }
                op => op,
            };

            // Open the fragmented message before its payload arrives so that
            // control frames interleaved in later chunks see it.
            if header.opcode.is_data() {
                if header.fin {
                    if header.payload_len == 0 {
                        self.message_opcode = None;
                    }
                } else if header.opcode != OpCode::Continuation {
                    self.message_opcode = Some(header.opcode);
                }
            }

            if header.payload_len == 0 {
                let dispatch = sink.fragment(&[], 0, delivered_opcode, header.fin, header.rsv1)?;
                if dispatch == Dispatch::Abort {
                    return Ok(());
                }
                continue;
            }

            self.in_frame = Some(InFrame {
                opcode: delivered_opcode,
                fin: header.fin,
                compressed: header.rsv1,
                remaining: header.payload_len,
                mask: header.mask,
                mask_offset: 0,
            });
        }
    }
}

fn validate_header(header: &FrameHeader, cfg: &ParseConfig) -> Result<()> {
    if header.rsv2 || header.rsv3 {
        return Err(Error::ReservedBitsSet);
    }

    if header.rsv1 {
        let first_data_frame = matches!(header.opcode, OpCode::Text | OpCode::Binary);
        if !cfg.deflate_negotiated || !first_data_frame {
            return Err(Error::ReservedBitsSet);
        }
    }

    if header.opcode.is_control() {
        if !header.fin {
            return Err(Error::FragmentedControlFrame);
        }
        if header.payload_len > MAX_CONTROL_PAYLOAD {
            return Err(Error::ControlFrameTooLarge(header.payload_len));
        }
    } else if header.payload_len > cfg.max_payload {
        return Err(Error::PayloadOverLimit {
            size: header.payload_len,
            max: cfg.max_payload,
        });
    }

    match cfg.role {
        Role::Server => {
            if header.mask.is_none() && !cfg.accept_unmasked {
                return Err(Error::UnmaskedFrame);
            }
        }
        Role::Client => {
            if header.mask.is_some() {
                return Err(Error::MaskedFrame);
            }
        }
    }

    Ok(())
}
