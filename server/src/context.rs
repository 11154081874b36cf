//! The context handed to every module and component callback.
//!
//! A [`Context`] carries the invoker surface: sending messages, opening
//! and closing connections, reply subscriptions, timers, and reactor
//! control. It holds shared handles only; the module itself is passed
//! alongside it, so callbacks can borrow both at once.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::rc::Rc;
use std::time::Duration;

use protomux_proto::{identify, log_rejected, Cancelled, Correlator, Delivery, InProtocol};
use protomux_session::{
    spawn_outbound, SessionEvent, SessionKind, SessionRef, Sessions, SlotId,
};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::command::ServerHandle;
use crate::component::{post_first, ComponentSet};
use crate::module::{Conn, Module};
use crate::timer::{spawn_every, spawn_once, spawn_timer, Timer};

/// A closure queued for execution on the reactor thread.
pub(crate) type Task<M> = Box<dyn FnOnce(&mut M, &mut Context<M>)>;

/// A one-shot reply subscription bound to an outbound session.
pub(crate) type ServerSub<M> = Box<dyn for<'a> FnOnce(&mut M, &mut Context<M>, Delivery<'a>)>;

/// Invoker surface available to module and component callbacks.
pub struct Context<M: Module> {
    pub(crate) clients: Sessions,
    pub(crate) servers: Sessions,
    pub(crate) events_tx: mpsc::UnboundedSender<SessionEvent>,
    pub(crate) tasks_tx: mpsc::UnboundedSender<Task<M>>,
    pub(crate) control: ServerHandle,
    pub(crate) components: Rc<RefCell<ComponentSet<M>>>,
    pub(crate) correlators: Rc<RefCell<HashMap<SlotId, Correlator<ServerSub<M>>>>>,
    pub(crate) unhandled: Rc<Cell<u64>>,
}

impl<M: Module> Context<M> {
    pub(crate) fn pool(&self, kind: SessionKind) -> &Sessions {
        match kind {
            SessionKind::Client => &self.clients,
            SessionKind::Server => &self.servers,
        }
    }

    /// Send a typed message on a connection under its canonical tag.
    pub fn send_message<T: InProtocol<M::Protocol>>(&mut self, conn: Conn, msg: &T) {
        let mut buf = Vec::new();
        if let Err(err) = msg.encode_to(&mut buf) {
            error!("message encode failed: {}", err);
            return;
        }
        self.send_raw(conn, identify::<M::Protocol, T>(), &buf);
    }

    /// Send pre-encoded payload bytes under an explicit tag.
    ///
    /// Bypasses the protocol check; intended for forwarding frames whose
    /// payload type the module does not need to know.
    pub fn send_raw(&mut self, conn: Conn, tag: u16, payload: &[u8]) {
        if let Err(err) = self.pool(conn.kind).send_frame(conn.id, tag, payload) {
            error!("outgoing frame rejected: {}", err);
        }
    }

    /// Orderly close: the owner is notified once; an outbound session
    /// reconnects afterwards.
    pub fn close(&mut self, conn: Conn) {
        self.pool(conn.kind).close(conn.id);
    }

    /// Silent close: no further notifications; pending reply subscriptions
    /// on the session are cancelled.
    pub fn kill(&mut self, conn: Conn) {
        self.pool(conn.kind).kill(conn.id);
        if conn.is_server() {
            self.cancel_correlator(conn.id, true);
        }
    }

    /// Half-close the write side of a connection.
    pub fn shutdown(&mut self, conn: Conn) {
        self.pool(conn.kind).shutdown(conn.id);
    }

    /// True while the connection's socket is up.
    pub fn connected(&self, conn: Conn) -> bool {
        self.pool(conn.kind).connected(conn.id)
    }

    /// Pin the session behind `conn` against slot reuse.
    ///
    /// The token is the only safe way to retain a connection handle across
    /// handler invocations; check [`SessionRef::is_live`] before use.
    pub fn take_ref(&self, conn: Conn) -> Option<SessionRef> {
        self.pool(conn.kind).take_ref(conn.id)
    }

    /// Attach typed user data to the connection.
    pub fn set_user_data<T: 'static>(&mut self, conn: Conn, value: T) {
        self.pool(conn.kind).set_user_data(conn.id, value);
    }

    /// Run `f` against the connection's user data; `None` on absence or
    /// type mismatch.
    pub fn with_user_data<T: 'static, R>(
        &mut self,
        conn: Conn,
        f: impl FnOnce(&mut T) -> R,
    ) -> Option<R> {
        self.pool(conn.kind).with_user_data(conn.id, f)
    }

    /// Remove and return the connection's user data.
    pub fn take_user_data<T: 'static>(&mut self, conn: Conn) -> Option<T> {
        self.pool(conn.kind).take_user_data(conn.id)
    }

    /// Dial a peer service asynchronously; the returned handle becomes
    /// connected once the dial succeeds, retrying on a fixed backoff until
    /// it does.
    pub fn async_connect(&mut self, ip: &str, port: u16) -> Result<Conn, AddrParseError> {
        let addr = SocketAddr::new(ip.parse::<IpAddr>()?, port);
        let id = spawn_outbound(&self.servers, addr, self.events_tx.clone(), None);
        self.correlators
            .borrow_mut()
            .insert(id, Correlator::new());
        Ok(Conn {
            kind: SessionKind::Server,
            id,
        })
    }

    /// Dial a peer service, blocking until the socket is connected.
    ///
    /// Intended for `on_initialized`. A failed dial is not an error: the
    /// session falls into the standard retry loop instead.
    pub fn connect_to_server(&mut self, ip: &str, port: u16) -> Result<Conn, AddrParseError> {
        let addr = SocketAddr::new(ip.parse::<IpAddr>()?, port);
        let initial = match std::net::TcpStream::connect(addr) {
            Ok(stream) => match stream.set_nonblocking(true) {
                Ok(()) => tokio::net::TcpStream::from_std(stream).ok(),
                Err(_) => None,
            },
            Err(err) => {
                warn!("dial {} failed: {}; entering retry", addr, err);
                None
            }
        };
        let id = spawn_outbound(&self.servers, addr, self.events_tx.clone(), initial);
        self.correlators
            .borrow_mut()
            .insert(id, Correlator::new());
        Ok(Conn {
            kind: SessionKind::Server,
            id,
        })
    }

    /// Queue a one-shot reply subscription on an outbound connection.
    ///
    /// The oldest subscription for `T`'s tag consumes the next matching
    /// frame before module dispatch sees it. Subscribing on a connection
    /// that is not an established outbound session cancels immediately.
    pub fn subscribe<T, F>(&mut self, conn: Conn, f: F)
    where
        T: InProtocol<M::Protocol>,
        F: FnOnce(&mut M, &mut Context<M>, T, Result<(), Cancelled>) + 'static,
    {
        let tag = identify::<M::Protocol, T>();
        let sub: ServerSub<M> = Box::new(move |module, cx, delivery| match delivery {
            Delivery::Frame(buf) => match T::decode(buf) {
                Ok(msg) => f(module, cx, msg, Ok(())),
                Err(err) => {
                    log_rejected(tag, buf, &err);
                    f(module, cx, T::default(), Err(Cancelled));
                }
            },
            Delivery::Cancelled => f(module, cx, T::default(), Err(Cancelled)),
        });

        if conn.is_server() && self.servers.connected(conn.id) {
            let mut map = self.correlators.borrow_mut();
            if let Some(corr) = map.get_mut(&conn.id) {
                corr.subscribe(tag, sub);
                return;
            }
        }
        self.defer(move |module, cx| sub(module, cx, Delivery::Cancelled));
    }

    /// Run `f` once after `delay`.
    pub fn schedule_after(
        &mut self,
        delay: Duration,
        f: impl FnOnce(&mut M, &mut Context<M>) + 'static,
    ) {
        spawn_once(self.tasks_tx.clone(), delay, f);
    }

    /// Run `f` every `period` until the reactor stops.
    pub fn schedule_every(
        &mut self,
        period: Duration,
        f: impl FnMut(&mut M, &mut Context<M>) + 'static,
    ) {
        spawn_every(self.tasks_tx.clone(), period, f);
    }

    /// Create a pausable periodic timer.
    pub fn create_timer(
        &mut self,
        period: Duration,
        f: impl FnMut(&mut M, &mut Context<M>) + 'static,
    ) -> Timer {
        spawn_timer(self.tasks_tx.clone(), period, f)
    }

    /// Close every inbound connection idle for longer than `threshold`.
    pub fn async_disconnect_inactive_clients(&mut self, threshold: Duration) {
        self.clients.close_idle(threshold);
    }

    /// Close every outbound connection idle for longer than `threshold`.
    pub fn async_disconnect_inactive_servers(&mut self, threshold: Duration) {
        self.servers.close_idle(threshold);
    }

    /// Queue a closure for execution on the reactor thread, FIFO with
    /// other posts.
    pub fn post(&mut self, f: impl FnOnce(&mut M, &mut Context<M>) + 'static) {
        self.defer(f);
    }

    /// Deliver an in-process message to the first component that handles
    /// its type; returns the handler's value.
    pub fn post_component<T: 'static, R: 'static>(
        &mut self,
        module: &mut M,
        msg: T,
    ) -> Option<R> {
        let set = self.components.clone();
        post_first(&set, module, self, Box::new(msg))
            .and_then(|boxed| boxed.downcast::<R>().ok())
            .map(|boxed| *boxed)
    }

    /// Stop the reactor.
    pub fn stop(&mut self) {
        self.control.stop();
    }

    /// Number of inbound connections currently up.
    pub fn client_count(&self) -> usize {
        self.clients.connected_count()
    }

    /// Number of outbound connections currently up.
    pub fn server_count(&self) -> usize {
        self.servers.connected_count()
    }

    /// Frames seen with a tag no handler claimed.
    pub fn unhandled_messages(&self) -> u64 {
        self.unhandled.get()
    }

    pub(crate) fn note_unhandled(&self, tag: u16) {
        debug!("no handler for tag {}; frame dropped", tag);
        self.unhandled.set(self.unhandled.get() + 1);
    }

    pub(crate) fn defer(&self, task: impl FnOnce(&mut M, &mut Context<M>) + 'static) {
        let _ = self.tasks_tx.send(Box::new(task));
    }

    /// Cancel every pending subscription of one outbound session. The
    /// cancellations run as a posted task so the current handler finishes
    /// first.
    pub(crate) fn cancel_correlator(&mut self, id: SlotId, remove: bool) {
        let subs = {
            let mut map = self.correlators.borrow_mut();
            if remove {
                map.remove(&id).map(|mut corr| corr.cancel())
            } else {
                map.get_mut(&id).map(|corr| corr.cancel())
            }
        };
        let Some(subs) = subs else { return };
        if subs.is_empty() {
            return;
        }
        self.defer(move |module, cx| {
            for sub in subs {
                sub(module, cx, Delivery::Cancelled);
            }
        });
    }
}
