//! Events emitted by session I/O tasks.

use crate::arena::SlotId;
use bytes::Bytes;

/// Which pool a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// An accepted inbound connection.
    Client,
    /// An outbound connection to a peer service.
    Server,
}

/// Events emitted by sessions toward the reactor.
///
/// Events of one session arrive in wire order: `Connected` precedes every
/// `Frame`, and `Disconnected` follows the last one.
#[derive(Debug)]
pub enum SessionEvent {
    /// The connection is established and reads have started.
    Connected {
        /// Session id within its pool.
        id: SlotId,
        /// Pool the session belongs to.
        kind: SessionKind,
    },
    /// One complete frame arrived.
    Frame {
        /// Session id within its pool.
        id: SlotId,
        /// Pool the session belongs to.
        kind: SessionKind,
        /// Payload type tag.
        tag: u16,
        /// Owned payload bytes.
        payload: Bytes,
    },
    /// The connection ended; emitted at most once per established
    /// connection, never after `kill`.
    Disconnected {
        /// Session id within its pool.
        id: SlotId,
        /// Pool the session belongs to.
        kind: SessionKind,
    },
}
