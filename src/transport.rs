//! The socket contract consumed by the state machine.
//!
//! The event loop, poll registration and cross-thread wakeup all live
//! outside this crate. The core only needs a non-blocking byte sink, a way
//! to half-close after the closing handshake, and a hook for migrating a
//! live socket onto another loop.

use std::io;

use crate::connection::Connection;
use crate::group::GroupId;

/// A non-blocking byte stream owned by an external event loop.
///
/// `write` follows `io::Write` conventions: a short count means the kernel
/// buffer is full and the remainder must be queued until the loop reports
/// the socket writable again. `io::ErrorKind::WouldBlock` is equivalent to
/// accepting zero bytes; any other error is fatal for the connection.
pub trait Transport {
    /// Attempt a non-blocking write. Returns the number of bytes accepted.
    ///
    /// # Errors
    ///
    /// Propagates the underlying socket error. `WouldBlock` is handled by
    /// the caller and is not fatal.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Shut down the write side after the outbound CLOSE frame completed.
    fn shutdown_write(&mut self);

    /// Release the socket. Called once, on the terminal transition.
    fn close(&mut self);
}

/// Opaque identity of an event loop. Groups bound to the same loop share a
/// thread; transfers between them never leave it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopId(pub u64);

/// A cross-loop migration in flight.
///
/// Owning the connection makes the hand-off window explicit: between
/// `Migrator::submit` and `Group::complete_transfer` nobody can touch the
/// connection, and only its user data is guaranteed to survive unchanged.
pub struct TransferRequest<T: Transport> {
    /// The connection being moved, already unlinked from its source group.
    pub connection: Connection<T>,
    /// The group that must adopt the connection.
    pub target_group: GroupId,
    /// The loop that owns the target group.
    pub target_loop: LoopId,
}

/// Socket-layer hook for moving a connection to another loop.
///
/// The implementation deregisters the socket from the source loop, ships the
/// request to the target loop, and there calls [`Group::complete_transfer`]
/// with the carried connection.
///
/// [`Group::complete_transfer`]: crate::group::Group::complete_transfer
pub trait Migrator<T: Transport> {
    /// Hand a connection to the target loop.
    fn submit(&mut self, request: TransferRequest<T>);
}

/// Drive a full non-blocking write, treating `WouldBlock` as a short count.
///
/// Returns the number of bytes accepted by the transport.
pub(crate) fn try_write<T: Transport>(transport: &mut T, buf: &[u8]) -> io::Result<usize> {
    let mut written = 0;
    while written < buf.len() {
        match transport.write(&buf[written..]) {
            Ok(0) => break,
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}
