//! Groups: containers of connections bound to one event loop.
//!
//! A group owns its connections, the embedder's handler set, and the shared
//! compression resources. All entry points the event loop drives
//! (`on_data`, `on_writable`, `on_eof`) go through the group, which also
//! fires the deferred disconnection event exactly once before returning to
//! the embedder.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::compression::{Deflater, Inflater};
use crate::config::{ExtensionOptions, GroupOptions};
use crate::connection::{Connection, ConnectionState, Role, SendCallback};
use crate::error::{Error, Result};
use crate::protocol::handshake::build_upgrade_response;
use crate::protocol::OpCode;
use crate::transport::{LoopId, Migrator, Transport, TransferRequest};

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a group. Stored by connections instead of a
/// back-pointer, so ownership stays strictly group-to-connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(u64);

/// Handle to a connection within its group. Slots are reused after a
/// connection dies, so a stale id can address a different connection;
/// embedders are expected to drop ids they were told disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(usize);

/// Shared per-group state that handlers may need while holding a
/// connection: options, the shared compressor and the inflater.
pub struct GroupCtx {
    id: GroupId,
    loop_id: LoopId,
    options: GroupOptions,
    shared_deflater: Option<Deflater>,
    inflater: Option<Inflater>,
}

impl GroupCtx {
    fn new(loop_id: LoopId, options: GroupOptions) -> Result<Self> {
        options.validate()?;
        let shared_deflater =
            (options.deflate_enabled() && !options.sliding_window()).then(Deflater::shared);
        let inflater = options.deflate_enabled().then(Inflater::new);
        Ok(Self {
            id: GroupId(NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed)),
            loop_id,
            options,
            shared_deflater,
            inflater,
        })
    }

    /// Group identity.
    #[must_use]
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// The loop this group is bound to.
    #[must_use]
    pub fn loop_id(&self) -> LoopId {
        self.loop_id
    }

    /// Group configuration.
    #[must_use]
    pub fn options(&self) -> &GroupOptions {
        &self.options
    }

    /// Deflate one message on the shared group compressor, resetting its
    /// context first.
    pub(crate) fn deflate(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        self.shared_deflater
            .as_mut()
            .ok_or_else(|| Error::Compression("no shared deflate stream".into()))?
            .deflate(payload)
    }

    /// Inflate one message, bounded by the group's maximum payload.
    pub(crate) fn inflate(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let max = self.options.max_payload;
        self.inflater
            .as_mut()
            .ok_or_else(|| Error::Compression("no inflate stream".into()))?
            .inflate(payload, max)
    }
}

/// The embedder's callback set. Defaults are no-ops.
pub struct Handlers<T> {
    pub(crate) message: Box<dyn FnMut(&mut Connection<T>, &mut GroupCtx, &[u8], OpCode) + Send>,
    pub(crate) ping: Box<dyn FnMut(&mut Connection<T>, &mut GroupCtx, &[u8]) + Send>,
    pub(crate) pong: Box<dyn FnMut(&mut Connection<T>, &mut GroupCtx, &[u8]) + Send>,
    pub(crate) disconnection: Box<dyn FnMut(&mut Connection<T>, &mut GroupCtx, u16, &[u8]) + Send>,
    pub(crate) transfer: Box<dyn FnMut(&mut Connection<T>, &mut GroupCtx) + Send>,
}

impl<T> Default for Handlers<T> {
    fn default() -> Self {
        Self {
            message: Box::new(|_, _, _, _| {}),
            ping: Box::new(|_, _, _| {}),
            pong: Box::new(|_, _, _| {}),
            disconnection: Box::new(|_, _, _, _| {}),
            transfer: Box::new(|_, _| {}),
        }
    }
}

/// A collection of connections on one event loop.
pub struct Group<T> {
    ctx: GroupCtx,
    handlers: Handlers<T>,
    slots: Vec<Option<Connection<T>>>,
    free: Vec<usize>,
    len: usize,
}

impl<T: Transport> Group<T> {
    /// Create a group bound to `loop_id`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` for inconsistent options.
    pub fn new(loop_id: LoopId, options: GroupOptions) -> Result<Self> {
        Ok(Self {
            ctx: GroupCtx::new(loop_id, options)?,
            handlers: Handlers::default(),
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        })
    }

    /// Group identity.
    #[must_use]
    pub fn id(&self) -> GroupId {
        self.ctx.id()
    }

    /// The loop this group is bound to.
    #[must_use]
    pub fn loop_id(&self) -> LoopId {
        self.ctx.loop_id()
    }

    /// Group configuration.
    #[must_use]
    pub fn options(&self) -> &GroupOptions {
        self.ctx.options()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the group has no connections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set the message handler.
    pub fn on_message(
        &mut self,
        f: impl FnMut(&mut Connection<T>, &mut GroupCtx, &[u8], OpCode) + Send + 'static,
    ) -> &mut Self {
        self.handlers.message = Box::new(f);
        self
    }

    /// Set the ping handler, invoked after the pong echo was queued.
    pub fn on_ping(
        &mut self,
        f: impl FnMut(&mut Connection<T>, &mut GroupCtx, &[u8]) + Send + 'static,
    ) -> &mut Self {
        self.handlers.ping = Box::new(f);
        self
    }

    /// Set the pong handler.
    pub fn on_pong(
        &mut self,
        f: impl FnMut(&mut Connection<T>, &mut GroupCtx, &[u8]) + Send + 'static,
    ) -> &mut Self {
        self.handlers.pong = Box::new(f);
        self
    }

    /// Set the disconnection handler. Invoked at most once per connection,
    /// with the close code and reason, strictly before any transfer handler
    /// could run for it.
    pub fn on_disconnection(
        &mut self,
        f: impl FnMut(&mut Connection<T>, &mut GroupCtx, u16, &[u8]) + Send + 'static,
    ) -> &mut Self {
        self.handlers.disconnection = Box::new(f);
        self
    }

    /// Set the transfer handler, invoked when a connection is adopted into
    /// this group.
    pub fn on_transfer(
        &mut self,
        f: impl FnMut(&mut Connection<T>, &mut GroupCtx) + Send + 'static,
    ) -> &mut Self {
        self.handlers.transfer = Box::new(f);
        self
    }

    /// Complete a server-side upgrade: write the 101 response through the
    /// connection's raw write path and link the new connection.
    ///
    /// `sec_key` is the already validated `Sec-WebSocket-Key`; `extensions`
    /// the negotiated extension string; `subprotocol` the client's offer
    /// (the first comma-token is selected).
    ///
    /// # Errors
    ///
    /// Returns an error when the key is malformed or the response could not
    /// be written. In the latter case the socket is already closed and no
    /// data frame was ever queued.
    pub fn accept(
        &mut self,
        transport: T,
        sec_key: &str,
        extensions: &str,
        subprotocol: &str,
    ) -> Result<ConnId> {
        let mut response = Vec::with_capacity(256);
        build_upgrade_response(
            &mut response,
            sec_key,
            extensions,
            subprotocol,
            &self.ctx.options().server_identity,
        )?;
        let mut conn = Connection::new(transport, Role::Server, &self.ctx);
        conn.write_raw(response)?;
        Ok(self.insert(conn))
    }

    /// Adopt a transport whose handshake completed elsewhere.
    pub fn attach(&mut self, transport: T, role: Role) -> ConnId {
        let conn = Connection::new(transport, role, &self.ctx);
        self.insert(conn)
    }

    /// Borrow a connection.
    #[must_use]
    pub fn connection(&self, id: ConnId) -> Option<&Connection<T>> {
        self.slots.get(id.0).and_then(|slot| slot.as_ref())
    }

    /// Mutably borrow a connection, e.g. to set user data.
    pub fn connection_mut(&mut self, id: ConnId) -> Option<&mut Connection<T>> {
        self.slots.get_mut(id.0).and_then(|slot| slot.as_mut())
    }

    /// Feed a read chunk into a connection.
    pub fn on_data(&mut self, id: ConnId, chunk: &[u8]) {
        self.dispatch(id, |conn, ctx, handlers| conn.on_data(ctx, handlers, chunk));
    }

    /// The loop reports a connection's socket writable.
    pub fn on_writable(&mut self, id: ConnId) {
        self.dispatch(id, |conn, _, _| conn.on_writable());
    }

    /// The read side of a connection hit EOF.
    pub fn on_eof(&mut self, id: ConnId) {
        self.dispatch(id, |conn, _, _| conn.on_eof());
    }

    /// Send a message on a connection. Unknown or dead ids fire the
    /// callback immediately with `cancelled = true`.
    pub fn send(
        &mut self,
        id: ConnId,
        payload: &[u8],
        opcode: OpCode,
        compress: bool,
        callback: Option<SendCallback<T>>,
    ) {
        if self.connection(id).is_none() {
            if let Some(cb) = callback {
                cb(None, true);
            }
            return;
        }
        self.dispatch(id, |conn, ctx, _| {
            conn.send(ctx, payload, opcode, compress, callback);
        });
    }

    /// Begin the closing handshake on a connection.
    ///
    /// The disconnection handler fires before this call returns, while the
    /// CLOSE frame may still be queued behind earlier writes.
    pub fn close(&mut self, id: ConnId, code: u16, reason: &[u8]) {
        self.dispatch(id, |conn, ctx, _| conn.close(ctx, code, reason));
    }

    /// Abruptly terminate a connection (close code 1006).
    pub fn terminate(&mut self, id: ConnId) {
        self.dispatch(id, |conn, _, _| conn.terminate());
    }

    /// Move a connection to another group on the same loop.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transfer` when the target does not accept transfers,
    /// lives on another loop, or the connection is unknown or not open.
    pub fn transfer(source: &mut Group<T>, target: &mut Group<T>, id: ConnId) -> Result<ConnId> {
        if !target.options().extensions.contains(ExtensionOptions::TRANSFERS) {
            return Err(Error::Transfer(
                "target group does not accept transfers".into(),
            ));
        }
        if source.loop_id() != target.loop_id() {
            return Err(Error::Transfer(
                "groups are bound to different loops".into(),
            ));
        }
        let conn = source
            .connection(id)
            .ok_or_else(|| Error::Transfer("unknown connection".into()))?;
        if conn.state() != ConnectionState::Open {
            return Err(Error::Transfer("connection is not open".into()));
        }

        let Some(mut conn) = source.remove(id) else {
            return Err(Error::Transfer("unknown connection".into()));
        };
        conn.set_group(target.id());
        let new_id = target.insert(conn);
        target.dispatch(new_id, |conn, ctx, handlers| (handlers.transfer)(&mut *conn, &mut *ctx));
        Ok(new_id)
    }

    /// Hand a connection to the socket layer for migration onto another
    /// loop. From this call until the target loop's
    /// [`complete_transfer`](Group::complete_transfer), the connection is
    /// owned by the request and must not be used; only its user data
    /// identity is guaranteed to survive.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transfer` when the connection is unknown or not open.
    pub fn transfer_to_loop(
        source: &mut Group<T>,
        id: ConnId,
        target_group: GroupId,
        target_loop: LoopId,
        migrator: &mut dyn Migrator<T>,
    ) -> Result<()> {
        let conn = source
            .connection(id)
            .ok_or_else(|| Error::Transfer("unknown connection".into()))?;
        if conn.state() != ConnectionState::Open {
            return Err(Error::Transfer("connection is not open".into()));
        }

        let Some(connection) = source.remove(id) else {
            return Err(Error::Transfer("unknown connection".into()));
        };
        migrator.submit(TransferRequest {
            connection,
            target_group,
            target_loop,
        });
        Ok(())
    }

    /// Adopt a migrated connection. Runs on the target loop's thread; the
    /// transfer handler fires here.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transfer` when this group was not configured with the
    /// `TRANSFERS` option.
    pub fn complete_transfer(&mut self, mut conn: Connection<T>) -> Result<ConnId> {
        if !self.options().extensions.contains(ExtensionOptions::TRANSFERS) {
            return Err(Error::Transfer(
                "group does not accept transfers".into(),
            ));
        }
        conn.set_group(self.id());
        let id = self.insert(conn);
        self.dispatch(id, |conn, ctx, handlers| (handlers.transfer)(&mut *conn, &mut *ctx));
        Ok(id)
    }

    /// Run `f` on a connection, then fire any deferred disconnection event
    /// and release the slot if the connection reached its terminal state.
    fn dispatch<R>(
        &mut self,
        id: ConnId,
        f: impl FnOnce(&mut Connection<T>, &mut GroupCtx, &mut Handlers<T>) -> R,
    ) -> Option<R> {
        let mut conn = self.slots.get_mut(id.0)?.take()?;
        let result = f(&mut conn, &mut self.ctx, &mut self.handlers);

        if let Some((code, reason)) = conn.take_pending_disconnect() {
            (self.handlers.disconnection)(&mut conn, &mut self.ctx, code, &reason);
        }

        if conn.is_closed() {
            self.free.push(id.0);
            self.len -= 1;
        } else {
            self.slots[id.0] = Some(conn);
        }
        Some(result)
    }

    fn insert(&mut self, conn: Connection<T>) -> ConnId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            self.slots[index] = Some(conn);
            ConnId(index)
        } else {
            self.slots.push(Some(conn));
            ConnId(self.slots.len() - 1)
        }
    }

    fn remove(&mut self, id: ConnId) -> Option<Connection<T>> {
        let conn = self.slots.get_mut(id.0)?.take()?;
        self.free.push(id.0);
        self.len -= 1;
        Some(conn)
    }
}
