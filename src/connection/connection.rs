use std::any::Any;

use bytes::BytesMut;

use crate::compression::Deflater;
use crate::connection::queue::{QueuedWrite, WriteQueue};
use crate::connection::{CompressionStatus, ConnectionState, Role};
use crate::error::{Error, Result};
use crate::group::{GroupCtx, GroupId, Handlers};
use crate::protocol::frame::{
    format_close_payload, format_message, is_valid_close_code, parse_close_payload,
    CLOSE_CODE_ABNORMAL, CLOSE_CODE_NORMAL, MAX_CLOSE_REASON, MAX_HEADER,
};
use crate::protocol::parser::{Dispatch, FragmentSink, FrameParser, ParseConfig};
use crate::protocol::utf8::is_valid_utf8;
use crate::protocol::OpCode;
use crate::transport::{try_write, Transport};

/// Completion callback for [`Connection::send`].
///
/// Receives the connection (`None` when the queue is drained during
/// teardown) and whether the write was cancelled. User data belongs in the
/// closure's captures; capturing the connection itself would create an
/// ownership cycle and is exactly what the first argument exists to avoid.
pub type SendCallback<T> = Box<dyn FnOnce(Option<&mut Connection<T>>, bool) + Send>;

/// A write coalesced into the cork buffer, waiting for uncork.
struct CorkMark<T> {
    start: usize,
    end: usize,
    callback: Option<SendCallback<T>>,
    shutdown_after: bool,
}

/// Seed for the outbound mask generator. Falls back to the clock if the
/// system entropy source is unavailable.
fn random_mask_seed() -> u32 {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_ok() {
        u32::from_le_bytes(buf)
    } else {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u32)
            .unwrap_or(0x12345678)
    }
}

/// A logical WebSocket endpoint bound to one transport.
///
/// Connections are owned by their [`Group`](crate::group::Group) and driven
/// through it; group handlers receive `&mut Connection` and may call
/// [`send`](Connection::send) or [`close`](Connection::close) re-entrantly.
pub struct Connection<T> {
    transport: T,
    role: Role,
    state: ConnectionState,
    compression: CompressionStatus,
    /// Present iff the group was configured with the sliding window option.
    sliding_window: Option<Deflater>,
    parser: FrameParser,
    /// Accumulates the current fragmented data message. An interleaved
    /// control frame being reassembled occupies the last
    /// `control_tip_length` bytes.
    fragment_buffer: BytesMut,
    control_tip_length: usize,
    /// RSV1 was observed on the first frame of the message in progress.
    message_compressed: bool,
    queue: WriteQueue<T>,
    corked: bool,
    cork_buffer: Vec<u8>,
    cork_marks: Vec<CorkMark<T>>,
    has_outstanding_pong: bool,
    disconnection_fired: bool,
    pending_disconnect: Option<(u16, Vec<u8>)>,
    group: GroupId,
    mask_seed: u32,
    user_data: Option<Box<dyn Any + Send>>,
}

impl<T: Transport> Connection<T> {
    pub(crate) fn new(transport: T, role: Role, ctx: &GroupCtx) -> Self {
        let compression = if ctx.options().deflate_enabled() {
            CompressionStatus::Enabled
        } else {
            CompressionStatus::Disabled
        };
        let sliding_window = ctx
            .options()
            .sliding_window()
            .then(Deflater::sliding_window);

        Self {
            transport,
            role,
            state: ConnectionState::Open,
            compression,
            sliding_window,
            parser: FrameParser::new(),
            fragment_buffer: BytesMut::new(),
            control_tip_length: 0,
            message_compressed: false,
            queue: WriteQueue::new(),
            corked: false,
            cork_buffer: Vec::new(),
            cork_marks: Vec::new(),
            has_outstanding_pong: false,
            disconnection_fired: false,
            pending_disconnect: None,
            group: ctx.id(),
            mask_seed: random_mask_seed(),
            user_data: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Connection role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Identity of the owning group.
    #[must_use]
    pub fn group(&self) -> GroupId {
        self.group
    }

    pub(crate) fn set_group(&mut self, group: GroupId) {
        self.group = group;
    }

    /// Whether the terminal state was reached.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Whether the closing handshake is in progress.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.state.is_shutting_down()
    }

    /// Whether a keepalive ping is still unanswered. Maintained for the
    /// embedder's keepalive logic; cleared on any inbound data.
    #[must_use]
    pub fn has_outstanding_pong(&self) -> bool {
        self.has_outstanding_pong
    }

    /// Record that a keepalive ping went out.
    pub fn set_outstanding_pong(&mut self, outstanding: bool) {
        self.has_outstanding_pong = outstanding;
    }

    /// Attach opaque user data. This is the only identity that survives a
    /// cross-loop transfer.
    pub fn set_user_data(&mut self, data: Box<dyn Any + Send>) {
        self.user_data = Some(data);
    }

    /// Borrow the user data.
    #[must_use]
    pub fn user_data(&self) -> Option<&(dyn Any + Send)> {
        self.user_data.as_deref()
    }

    /// Mutably borrow the user data.
    pub fn user_data_mut(&mut self) -> Option<&mut (dyn Any + Send)> {
        self.user_data.as_deref_mut()
    }

    /// Take the user data out.
    pub fn take_user_data(&mut self) -> Option<Box<dyn Any + Send>> {
        self.user_data.take()
    }

    /// Frame and send a message.
    ///
    /// `compress` is honored only when permessage-deflate was negotiated and
    /// `opcode` is a data opcode. On a closed connection nothing is written
    /// and the callback fires immediately with `cancelled = true`. The
    /// callback otherwise fires when the frame has fully left the write
    /// queue, in FIFO order with all other sends.
    pub fn send(
        &mut self,
        ctx: &mut GroupCtx,
        payload: &[u8],
        opcode: OpCode,
        compress: bool,
        callback: Option<SendCallback<T>>,
    ) {
        self.send_frame(ctx, payload, opcode, compress, callback, false);
    }

    /// Begin the closing handshake.
    ///
    /// The first call on an open connection sends a CLOSE frame (code 0
    /// becomes 1000, the reason is truncated to 123 bytes), records the
    /// disconnection event and moves to `ShuttingDown`; the transport is
    /// half-closed once the frame is flushed. Subsequent calls are no-ops.
    ///
    /// The disconnection handler fires before the peer has necessarily seen
    /// the close frame.
    pub fn close(&mut self, ctx: &mut GroupCtx, code: u16, reason: &[u8]) {
        if self.state != ConnectionState::Open {
            return;
        }
        self.state = ConnectionState::ShuttingDown;

        let code = if code == 0 { CLOSE_CODE_NORMAL } else { code };
        let reason = &reason[..reason.len().min(MAX_CLOSE_REASON)];

        let mut payload = [0u8; 2 + MAX_CLOSE_REASON];
        let len = format_close_payload(&mut payload, code, reason);
        self.send_frame(ctx, &payload[..len], OpCode::Close, false, None, true);

        if !self.disconnection_fired {
            self.disconnection_fired = true;
            self.pending_disconnect = Some((code, reason.to_vec()));
        }
    }

    /// Abrupt teardown: no close frame, close code 1006, queued callbacks
    /// cancelled in FIFO order, compression resources released.
    pub fn terminate(&mut self) {
        self.shutdown_now(CLOSE_CODE_ABNORMAL, &[]);
    }

    /// Feed one read chunk from the event loop.
    pub(crate) fn on_data(&mut self, ctx: &mut GroupCtx, handlers: &mut Handlers<T>, chunk: &[u8]) {
        self.has_outstanding_pong = false;
        if self.state != ConnectionState::Open {
            // The closedown handshake is passive; late data is not parsed.
            return;
        }

        self.corked = true;

        let cfg = ParseConfig {
            role: self.role,
            deflate_negotiated: self.compression == CompressionStatus::Enabled,
            accept_unmasked: ctx.options().accept_unmasked_frames,
            max_payload: ctx.options().max_payload,
        };

        let mut parser = std::mem::take(&mut self.parser);
        let result = {
            let mut sink = InboundDispatch {
                conn: self,
                ctx,
                handlers,
            };
            parser.consume(chunk, &cfg, &mut sink)
        };
        self.parser = parser;

        if result.is_err() {
            self.shutdown_now(CLOSE_CODE_ABNORMAL, &[]);
        }

        // Never lower the cork on a connection that closed mid-chunk; its
        // coalesced writes were already cancelled.
        if !self.state.is_closed() {
            self.uncork();
        }
    }

    /// The event loop reports the socket writable: drain the queue.
    pub(crate) fn on_writable(&mut self) {
        if self.state.is_closed() {
            return;
        }
        loop {
            let Some(front) = self.queue.front_mut() else {
                return;
            };
            match try_write(&mut self.transport, &front.bytes[front.offset..]) {
                Ok(n) => {
                    front.offset += n;
                    if front.offset < front.bytes.len() {
                        return;
                    }
                    if let Some(entry) = self.queue.pop_front() {
                        if let Some(cb) = entry.callback {
                            cb(Some(&mut *self), false);
                        }
                        if entry.shutdown_after {
                            self.transport.shutdown_write();
                        }
                    }
                    if self.state.is_closed() {
                        return;
                    }
                }
                Err(_) => {
                    self.shutdown_now(CLOSE_CODE_ABNORMAL, &[]);
                    return;
                }
            }
        }
    }

    /// The read side hit EOF. Completes the closing handshake when one was
    /// in progress; otherwise an abnormal closure.
    pub(crate) fn on_eof(&mut self) {
        self.shutdown_now(CLOSE_CODE_ABNORMAL, &[]);
    }

    /// Write a raw pre-framed buffer, queueing any unflushed remainder.
    /// Used for the handshake response.
    pub(crate) fn write_raw(&mut self, bytes: Vec<u8>) -> Result<()> {
        match try_write(&mut self.transport, &bytes) {
            Ok(n) if n == bytes.len() => Ok(()),
            Ok(n) => {
                self.queue.push(QueuedWrite {
                    bytes,
                    offset: n,
                    callback: None,
                    shutdown_after: false,
                });
                Ok(())
            }
            Err(e) => {
                let err: Error = e.into();
                self.shutdown_now(CLOSE_CODE_ABNORMAL, &[]);
                Err(err)
            }
        }
    }

    pub(crate) fn take_pending_disconnect(&mut self) -> Option<(u16, Vec<u8>)> {
        self.pending_disconnect.take()
    }

    fn dispatch_state(&self) -> Dispatch {
        if self.state == ConnectionState::Open {
            Dispatch::Continue
        } else {
            Dispatch::Abort
        }
    }

    fn next_mask(&mut self) -> Option<[u8; 4]> {
        if !self.role.must_mask() {
            return None;
        }
        self.mask_seed = self.mask_seed.wrapping_add(0x9E37_79B9);
        let a = self.mask_seed;
        let b = a.wrapping_mul(0x85EB_CA6B);
        let c = b ^ (b >> 13);
        let d = c.wrapping_mul(0xC2B2_AE35);
        Some(d.to_le_bytes())
    }

    fn send_frame(
        &mut self,
        ctx: &mut GroupCtx,
        payload: &[u8],
        opcode: OpCode,
        compress: bool,
        callback: Option<SendCallback<T>>,
        shutdown_after: bool,
    ) {
        if self.state.is_closed() {
            if let Some(cb) = callback {
                cb(Some(&mut *self), true);
            }
            return;
        }

        let effective = compress
            && self.compression == CompressionStatus::Enabled
            && opcode.is_data()
            && !payload.is_empty();

        let mut frame = Vec::with_capacity(payload.len() + MAX_HEADER);
        if effective {
            let deflated = match self.sliding_window.as_mut() {
                Some(window) => window.deflate(payload),
                None => ctx.deflate(payload),
            };
            match deflated {
                Ok(deflated) => {
                    let mask = self.next_mask();
                    format_message(&mut frame, &deflated, opcode, true, mask);
                }
                Err(_) => {
                    // Resource failure is fatal for this connection only.
                    if let Some(cb) = callback {
                        cb(Some(&mut *self), true);
                    }
                    self.shutdown_now(CLOSE_CODE_ABNORMAL, &[]);
                    return;
                }
            }
        } else {
            let mask = self.next_mask();
            format_message(&mut frame, payload, opcode, false, mask);
        }

        self.write_or_queue(frame, callback, shutdown_after);
    }

    fn write_or_queue(
        &mut self,
        bytes: Vec<u8>,
        callback: Option<SendCallback<T>>,
        shutdown_after: bool,
    ) {
        if !self.queue.is_empty() {
            self.queue.push(QueuedWrite {
                bytes,
                offset: 0,
                callback,
                shutdown_after,
            });
            return;
        }

        if self.corked {
            let start = self.cork_buffer.len();
            self.cork_buffer.extend_from_slice(&bytes);
            self.cork_marks.push(CorkMark {
                start,
                end: self.cork_buffer.len(),
                callback,
                shutdown_after,
            });
            return;
        }

        match try_write(&mut self.transport, &bytes) {
            Ok(n) if n == bytes.len() => {
                if let Some(cb) = callback {
                    cb(Some(&mut *self), false);
                }
                if shutdown_after {
                    self.transport.shutdown_write();
                }
            }
            Ok(n) => {
                self.queue.push(QueuedWrite {
                    bytes,
                    offset: n,
                    callback,
                    shutdown_after,
                });
            }
            Err(_) => {
                self.queue.push(QueuedWrite {
                    bytes,
                    offset: 0,
                    callback,
                    shutdown_after,
                });
                self.shutdown_now(CLOSE_CODE_ABNORMAL, &[]);
            }
        }
    }

    /// Flush writes coalesced while corked. At most one transport write for
    /// everything the handlers produced during one read chunk.
    fn uncork(&mut self) {
        self.corked = false;
        if self.cork_buffer.is_empty() {
            return;
        }

        let buffer = std::mem::take(&mut self.cork_buffer);
        let marks = std::mem::take(&mut self.cork_marks);

        match try_write(&mut self.transport, &buffer) {
            Ok(written) => {
                // Queue unwritten tails before firing completions so a
                // callback that sends again cannot jump the FIFO.
                let mut completed = Vec::new();
                for mark in marks {
                    if mark.end <= written {
                        completed.push((mark.callback, mark.shutdown_after));
                    } else {
                        let start = mark.start.max(written);
                        self.queue.push(QueuedWrite {
                            bytes: buffer[start..mark.end].to_vec(),
                            offset: 0,
                            callback: mark.callback,
                            shutdown_after: mark.shutdown_after,
                        });
                    }
                }
                // These frames are on the wire; their completions fire even
                // if one of them tears the connection down.
                for (callback, shutdown_after) in completed {
                    if let Some(cb) = callback {
                        cb(Some(&mut *self), false);
                    }
                    if shutdown_after && !self.state.is_closed() {
                        self.transport.shutdown_write();
                    }
                }
            }
            Err(_) => {
                for mark in marks {
                    self.queue.push(QueuedWrite {
                        bytes: buffer[mark.start..mark.end].to_vec(),
                        offset: 0,
                        callback: mark.callback,
                        shutdown_after: mark.shutdown_after,
                    });
                }
                self.shutdown_now(CLOSE_CODE_ABNORMAL, &[]);
            }
        }
    }

    /// Terminal transition. Idempotent; cancels every pending write in FIFO
    /// order with a null connection, releases the sliding window and records
    /// the disconnection event if it has not fired yet.
    fn shutdown_now(&mut self, code: u16, reason: &[u8]) {
        if self.state.is_closed() {
            return;
        }
        self.state = ConnectionState::Closed;
        self.corked = false;
        self.transport.close();
        self.sliding_window = None;
        self.cork_buffer = Vec::new();

        let marks = std::mem::take(&mut self.cork_marks);
        let callbacks: Vec<Option<SendCallback<T>>> = self
            .queue
            .drain()
            .map(|entry| entry.callback)
            .chain(marks.into_iter().map(|mark| mark.callback))
            .collect();
        for callback in callbacks.into_iter().flatten() {
            callback(None, true);
        }

        if !self.disconnection_fired {
            self.disconnection_fired = true;
            self.pending_disconnect = Some((code, reason.to_vec()));
        }
    }
}

/// Glue between the frame parser and the group's handlers: reassembles
/// messages, tracks the interleaved control tip and dispatches control
/// frames.
struct InboundDispatch<'a, T> {
    conn: &'a mut Connection<T>,
    ctx: &'a mut GroupCtx,
    handlers: &'a mut Handlers<T>,
}

impl<T: Transport> InboundDispatch<'_, T> {
    fn finish_message(&mut self, payload: &[u8], opcode: OpCode) -> Result<Dispatch> {
        if opcode == OpCode::Text && !is_valid_utf8(payload) {
            return Err(Error::InvalidUtf8);
        }
        (self.handlers.message)(&mut *self.conn, &mut *self.ctx, payload, opcode);
        Ok(self.conn.dispatch_state())
    }

    fn data_fragment(
        &mut self,
        data: &[u8],
        remaining: usize,
        opcode: OpCode,
        fin: bool,
        compressed: bool,
    ) -> Result<Dispatch> {
        self.conn.message_compressed |= compressed;

        // Fast path: a whole single-frame message with nothing buffered is
        // delivered without touching the fragment buffer.
        if remaining == 0 && fin && self.conn.fragment_buffer.is_empty() {
            if self.conn.message_compressed {
                self.conn.message_compressed = false;
                let inflated = self.ctx.inflate(data)?;
                return self.finish_message(&inflated, opcode);
            }
            return self.finish_message(data, opcode);
        }

        let max = self.ctx.options().max_payload;
        if self.conn.fragment_buffer.len() + data.len() > max {
            return Err(Error::PayloadOverLimit {
                size: self.conn.fragment_buffer.len() + data.len(),
                max,
            });
        }
        self.conn.fragment_buffer.extend_from_slice(data);

        if remaining == 0 && fin {
            debug_assert_eq!(self.conn.control_tip_length, 0);
            let buffer = std::mem::take(&mut self.conn.fragment_buffer);
            let result = if self.conn.message_compressed {
                self.conn.message_compressed = false;
                match self.ctx.inflate(&buffer) {
                    Ok(inflated) => self.finish_message(&inflated, opcode),
                    Err(e) => Err(e),
                }
            } else {
                self.finish_message(&buffer, opcode)
            };
            // Keep the allocation for the next message.
            self.conn.fragment_buffer = buffer;
            self.conn.fragment_buffer.clear();
            return result;
        }

        Ok(Dispatch::Continue)
    }

    fn control_fragment(
        &mut self,
        data: &[u8],
        remaining: usize,
        opcode: OpCode,
    ) -> Result<Dispatch> {
        if remaining == 0 && self.conn.control_tip_length == 0 {
            return self.dispatch_control(opcode, data);
        }

        // A control frame split across reads while a data message may be in
        // flight: park its bytes at the tail of the fragment buffer.
        self.conn.fragment_buffer.extend_from_slice(data);
        self.conn.control_tip_length += data.len();

        if remaining == 0 {
            let buffer = std::mem::take(&mut self.conn.fragment_buffer);
            let tip_start = buffer.len() - self.conn.control_tip_length;
            let result = self.dispatch_control(opcode, &buffer[tip_start..]);
            self.conn.fragment_buffer = buffer;
            self.conn.fragment_buffer.truncate(tip_start);
            self.conn.control_tip_length = 0;
            return result;
        }

        Ok(Dispatch::Continue)
    }

    fn dispatch_control(&mut self, opcode: OpCode, payload: &[u8]) -> Result<Dispatch> {
        match opcode {
            OpCode::Close => {
                let close = parse_close_payload(payload);
                if payload.len() >= 2 {
                    if !is_valid_close_code(close.code) {
                        return Err(Error::InvalidCloseCode(close.code));
                    }
                    if !is_valid_utf8(close.reason) {
                        return Err(Error::InvalidUtf8);
                    }
                }
                if self.conn.state == ConnectionState::Open {
                    self.conn.close(&mut *self.ctx, close.code, close.reason);
                }
                Ok(Dispatch::Abort)
            }
            OpCode::Ping => {
                self.conn.send(&mut *self.ctx, payload, OpCode::Pong, false, None);
                (self.handlers.ping)(&mut *self.conn, &mut *self.ctx, payload);
                Ok(self.conn.dispatch_state())
            }
            OpCode::Pong => {
                self.conn.has_outstanding_pong = false;
                (self.handlers.pong)(&mut *self.conn, &mut *self.ctx, payload);
                Ok(self.conn.dispatch_state())
            }
            _ => Ok(Dispatch::Continue),
        }
    }
}

impl<T: Transport> FragmentSink for InboundDispatch<'_, T> {
    fn fragment(
        &mut self,
        data: &[u8],
        remaining: usize,
        opcode: OpCode,
        fin: bool,
        compressed: bool,
    ) -> Result<Dispatch> {
        if opcode.is_data() {
            self.data_fragment(data, remaining, opcode, fin, compressed)
        } else {
            self.control_fragment(data, remaining, opcode)
        }
    }
}
