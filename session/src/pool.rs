//! Session pool and per-session state.
//!
//! Every connection's state lives in a slot of a shared [`Arena`]; tasks,
//! the reactor, and user-held reference tokens all address it through a
//! generation-checked id. A slot is reclaimed only when the connection is
//! down, its disconnect has been notified (or the session was killed), the
//! I/O task has finished, and no user references remain.

use std::any::Any;
use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use protomux_wire::{encode_header, DoubleWriteBuf, WireError, WriteBuf};
use tokio::sync::mpsc;
use tracing::trace;

use crate::arena::{Arena, SlotId};
use crate::event::SessionKind;

/// Commands the owning thread sends to a session's I/O task.
#[derive(Debug)]
pub(crate) enum SessionCmd {
    /// Wake the writer; data is queued on the double buffer.
    Flush,
    /// Orderly close: notify the owner once.
    Close,
    /// Silent close: no further notifications.
    Kill,
    /// Half-close the socket, keep the session.
    Shutdown,
}

pub(crate) struct SessionCore {
    pub(crate) cmd_tx: mpsc::UnboundedSender<SessionCmd>,
    pub(crate) wbuf: DoubleWriteBuf,
    pub(crate) connected: bool,
    pub(crate) write_in_progress: bool,
    pub(crate) last_activity: Instant,
    pub(crate) refcount: usize,
    pub(crate) ops: usize,
    pub(crate) notified: bool,
    pub(crate) killed: bool,
    pub(crate) user_data: Option<Box<dyn Any>>,
    pub(crate) peer: Option<SocketAddr>,
}

impl SessionCore {
    fn destroyable(&self) -> bool {
        let settled = self.killed || (!self.connected && self.notified);
        settled && self.ops == 0 && self.refcount == 0
    }
}

/// Shared handle to one pool of sessions (inbound or outbound).
#[derive(Clone)]
pub struct Sessions {
    kind: SessionKind,
    inner: Rc<RefCell<Arena<SessionCore>>>,
}

impl Sessions {
    /// Create an empty pool of the given kind.
    pub fn new(kind: SessionKind) -> Self {
        Self {
            kind,
            inner: Rc::new(RefCell::new(Arena::new())),
        }
    }

    /// Which pool this is.
    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// Allocate a slot for a new session and hand back its command channel.
    ///
    /// The slot starts with one outstanding op: the I/O task about to run.
    pub(crate) fn register(
        &self,
        peer: Option<SocketAddr>,
    ) -> (SlotId, mpsc::UnboundedReceiver<SessionCmd>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let core = SessionCore {
            cmd_tx,
            wbuf: DoubleWriteBuf::new(),
            connected: false,
            write_in_progress: false,
            last_activity: Instant::now(),
            refcount: 0,
            ops: 1,
            notified: false,
            killed: false,
            user_data: None,
            peer,
        };
        let id = self.inner.borrow_mut().insert(core);
        (id, cmd_rx)
    }

    /// Frame-encode and queue a message; wakes the writer when idle.
    ///
    /// Silently ignored on a session that is gone or not connected, the
    /// same way a send raced against a disconnect is.
    pub fn send_frame(&self, id: SlotId, tag: u16, payload: &[u8]) -> Result<(), WireError> {
        let header = encode_header(tag, payload.len())?;
        let mut arena = self.inner.borrow_mut();
        let Some(core) = arena.get_mut(id) else {
            return Ok(());
        };
        if !core.connected {
            return Ok(());
        }
        core.wbuf.append(&header);
        core.wbuf.append(payload);
        if !core.write_in_progress {
            let _ = core.cmd_tx.send(SessionCmd::Flush);
        }
        Ok(())
    }

    /// Start a write: flip the filled buffer out if none is in flight.
    pub(crate) fn begin_write(&self, id: SlotId) -> Option<WriteBuf> {
        let mut arena = self.inner.borrow_mut();
        let core = arena.get_mut(id)?;
        if core.write_in_progress || core.wbuf.is_empty() {
            return None;
        }
        core.write_in_progress = true;
        Some(core.wbuf.flip())
    }

    /// Complete a write: recycle the flushed chunks, clear the flag.
    pub(crate) fn finish_write(&self, id: SlotId, buf: WriteBuf) {
        let mut arena = self.inner.borrow_mut();
        if let Some(core) = arena.get_mut(id) {
            core.wbuf.recycle(buf);
            core.write_in_progress = false;
        }
    }

    pub(crate) fn mark_connected(&self, id: SlotId) {
        let mut arena = self.inner.borrow_mut();
        if let Some(core) = arena.get_mut(id) {
            core.connected = true;
            core.notified = false;
            core.last_activity = Instant::now();
        }
    }

    pub(crate) fn mark_disconnected(&self, id: SlotId) {
        let mut arena = self.inner.borrow_mut();
        if let Some(core) = arena.get_mut(id) {
            core.connected = false;
        }
    }

    /// Refresh the activity timestamp after a completed read.
    pub(crate) fn touch(&self, id: SlotId) {
        let mut arena = self.inner.borrow_mut();
        if let Some(core) = arena.get_mut(id) {
            core.last_activity = Instant::now();
        }
    }

    /// True while the session believes its socket is up.
    pub fn connected(&self, id: SlotId) -> bool {
        self.inner
            .borrow()
            .get(id)
            .map(|core| core.connected)
            .unwrap_or(false)
    }

    /// True when the slot still holds a session (live or pinned).
    pub fn contains(&self, id: SlotId) -> bool {
        self.inner.borrow().contains(id)
    }

    /// Remote endpoint, where one is known (outbound sessions).
    pub fn peer(&self, id: SlotId) -> Option<SocketAddr> {
        self.inner.borrow().get(id).and_then(|core| core.peer)
    }

    /// Orderly close: the task shuts down and the owner is notified once.
    pub fn close(&self, id: SlotId) {
        let arena = self.inner.borrow();
        if let Some(core) = arena.get(id) {
            let _ = core.cmd_tx.send(SessionCmd::Close);
        }
    }

    /// Silent close: no notification reaches the owner after this.
    pub fn kill(&self, id: SlotId) {
        {
            let mut arena = self.inner.borrow_mut();
            if let Some(core) = arena.get_mut(id) {
                core.killed = true;
                let _ = core.cmd_tx.send(SessionCmd::Kill);
            }
        }
        // a kill after the task already finished must still free the slot
        self.reap(id);
    }

    /// Half-close the write side without dropping the session.
    pub fn shutdown(&self, id: SlotId) {
        let arena = self.inner.borrow();
        if let Some(core) = arena.get(id) {
            let _ = core.cmd_tx.send(SessionCmd::Shutdown);
        }
    }

    /// True once `kill` was requested; killed sessions emit no events.
    pub fn is_killed(&self, id: SlotId) -> bool {
        self.inner
            .borrow()
            .get(id)
            .map(|core| core.killed)
            .unwrap_or(true)
    }

    /// Close the session if it has been idle for longer than `threshold`.
    pub fn disconnect_if_idle(&self, id: SlotId, threshold: Duration) {
        let arena = self.inner.borrow();
        if let Some(core) = arena.get(id) {
            if core.connected && core.last_activity.elapsed() > threshold {
                trace!("closing idle session {:?}", id);
                let _ = core.cmd_tx.send(SessionCmd::Close);
            }
        }
    }

    /// Close every connected session idle for longer than `threshold`.
    pub fn close_idle(&self, threshold: Duration) {
        let now = Instant::now();
        let arena = self.inner.borrow();
        for (id, core) in arena.iter() {
            if core.connected && now.duration_since(core.last_activity) > threshold {
                trace!("closing idle session {:?}", id);
                let _ = core.cmd_tx.send(SessionCmd::Close);
            }
        }
    }

    /// Record that the disconnect notification has been delivered.
    pub fn mark_notified(&self, id: SlotId) {
        {
            let mut arena = self.inner.borrow_mut();
            if let Some(core) = arena.get_mut(id) {
                core.notified = true;
            }
        }
        self.reap(id);
    }

    /// Record that the session's I/O task has finished.
    pub fn task_finished(&self, id: SlotId) {
        {
            let mut arena = self.inner.borrow_mut();
            if let Some(core) = arena.get_mut(id) {
                debug_assert!(core.ops > 0);
                core.ops -= 1;
            }
        }
        self.reap(id);
    }

    /// Pin the session against slot reuse; see [`SessionRef`].
    pub fn take_ref(&self, id: SlotId) -> Option<SessionRef> {
        let mut arena = self.inner.borrow_mut();
        let core = arena.get_mut(id)?;
        core.refcount += 1;
        Some(SessionRef {
            pool: self.clone(),
            id,
        })
    }

    /// Attach typed user data to the session, replacing any previous value.
    pub fn set_user_data<T: 'static>(&self, id: SlotId, value: T) {
        let mut arena = self.inner.borrow_mut();
        if let Some(core) = arena.get_mut(id) {
            core.user_data = Some(Box::new(value));
        }
    }

    /// Run `f` against the session's user data if it exists and has type
    /// `T`; `None` on absence or type mismatch.
    pub fn with_user_data<T: 'static, R>(&self, id: SlotId, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut arena = self.inner.borrow_mut();
        let core = arena.get_mut(id)?;
        let data = core.user_data.as_mut()?.downcast_mut::<T>()?;
        Some(f(data))
    }

    /// Remove and return the session's user data, if it has type `T`.
    pub fn take_user_data<T: 'static>(&self, id: SlotId) -> Option<T> {
        let mut arena = self.inner.borrow_mut();
        let core = arena.get_mut(id)?;
        if core.user_data.as_ref()?.is::<T>() {
            return core.user_data.take()?.downcast::<T>().ok().map(|b| *b);
        }
        None
    }

    /// Ids of every session currently in the pool.
    pub fn live_ids(&self) -> Vec<SlotId> {
        self.inner.borrow().live_ids()
    }

    /// Number of sessions currently in the pool.
    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    /// Number of sessions whose socket is currently up.
    pub fn connected_count(&self) -> usize {
        self.inner
            .borrow()
            .iter()
            .filter(|(_, core)| core.connected)
            .count()
    }

    /// True when the pool holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the disconnect notification went out (or the session was
    /// killed); used to deliver the notification exactly once.
    pub fn is_notified(&self, id: SlotId) -> bool {
        self.inner
            .borrow()
            .get(id)
            .map(|core| core.notified || core.killed)
            .unwrap_or(true)
    }

    fn reap(&self, id: SlotId) {
        let destroy = {
            let arena = self.inner.borrow();
            arena.get(id).map(|core| core.destroyable()).unwrap_or(false)
        };
        if destroy {
            trace!("destroying session slot {:?}", id);
            self.inner.borrow_mut().remove(id);
        }
    }
}

/// Move-only token pinning a session slot against reuse.
///
/// Holding a token across deferred work keeps the slot from being recycled
/// for another connection; [`SessionRef::is_live`] reports whether the
/// session is still connected, and never dangles.
pub struct SessionRef {
    pool: Sessions,
    id: SlotId,
}

impl SessionRef {
    /// The pinned session's id.
    pub fn id(&self) -> SlotId {
        self.id
    }

    /// True while the pinned session is still connected.
    pub fn is_live(&self) -> bool {
        self.pool.connected(self.id)
    }
}

impl Drop for SessionRef {
    fn drop(&mut self) {
        {
            let mut arena = self.pool.inner.borrow_mut();
            if let Some(core) = arena.get_mut(self.id) {
                debug_assert!(core.refcount > 0);
                core.refcount -= 1;
            }
        }
        self.pool.reap(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settle(pool: &Sessions, id: SlotId) {
        // the order events arrive in practice: socket down, owner notified,
        // task gone
        pool.mark_disconnected(id);
        pool.mark_notified(id);
        pool.task_finished(id);
    }

    #[test]
    fn test_destruction_waits_for_all_gates() {
        let pool = Sessions::new(SessionKind::Client);
        let (id, _cmd_rx) = pool.register(None);
        pool.mark_connected(id);

        pool.mark_disconnected(id);
        assert!(pool.contains(id));
        pool.mark_notified(id);
        assert!(pool.contains(id), "task still outstanding");
        pool.task_finished(id);
        assert!(!pool.contains(id));
    }

    #[test]
    fn test_reference_token_pins_slot() {
        let pool = Sessions::new(SessionKind::Client);
        let (id, _cmd_rx) = pool.register(None);
        pool.mark_connected(id);

        let token = pool.take_ref(id).unwrap();
        assert!(token.is_live());

        settle(&pool, id);
        // the slot survives for the token, but the session is gone
        assert!(pool.contains(id));
        assert!(!token.is_live());

        drop(token);
        assert!(!pool.contains(id));
    }

    #[test]
    fn test_killed_session_reaps_without_notification() {
        let pool = Sessions::new(SessionKind::Client);
        let (id, _cmd_rx) = pool.register(None);
        pool.mark_connected(id);

        pool.kill(id);
        assert!(pool.is_notified(id), "killed sessions never notify");
        pool.mark_disconnected(id);
        pool.task_finished(id);
        assert!(!pool.contains(id));
    }

    #[test]
    fn test_send_after_disconnect_is_ignored() {
        let pool = Sessions::new(SessionKind::Client);
        let (id, mut cmd_rx) = pool.register(None);
        pool.mark_connected(id);
        pool.mark_disconnected(id);

        pool.send_frame(id, 3, b"late").unwrap();
        assert!(cmd_rx.try_recv().is_err());
    }

    #[test]
    fn test_send_wakes_writer_once() {
        let pool = Sessions::new(SessionKind::Client);
        let (id, mut cmd_rx) = pool.register(None);
        pool.mark_connected(id);

        pool.send_frame(id, 1, b"one").unwrap();
        assert!(matches!(cmd_rx.try_recv(), Ok(SessionCmd::Flush)));

        // a write is now in flight; further sends append silently
        let buf = pool.begin_write(id).unwrap();
        assert_eq!(buf.byte_len(), 4 + 3);
        pool.send_frame(id, 1, b"two").unwrap();
        assert!(cmd_rx.try_recv().is_err());

        pool.finish_write(id, buf);
        let next = pool.begin_write(id).unwrap();
        assert_eq!(next.byte_len(), 4 + 3);
        pool.finish_write(id, next);
    }

    #[test]
    fn test_user_data_round_trip() {
        let pool = Sessions::new(SessionKind::Client);
        let (id, _cmd_rx) = pool.register(None);

        pool.set_user_data(id, 41u32);
        assert_eq!(pool.with_user_data(id, |n: &mut u32| *n + 1), Some(42));
        // wrong type requested
        assert_eq!(pool.with_user_data(id, |s: &mut String| s.len()), None);
        assert_eq!(pool.take_user_data::<u32>(id), Some(41));
        assert_eq!(pool.take_user_data::<u32>(id), None);
    }
}
