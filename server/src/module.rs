//! The module API: what an application implements to react to events.

use protomux_proto::ProtocolSpec;
use protomux_session::{SessionKind, SlotId};

use crate::command::Command;
use crate::component::ComponentSet;
use crate::config::Options;
use crate::context::Context;
use crate::registry::ModuleRegistry;

/// Copyable handle to a connection, client- or server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Conn {
    pub(crate) kind: SessionKind,
    pub(crate) id: SlotId,
}

impl Conn {
    /// True for accepted inbound connections.
    pub fn is_client(&self) -> bool {
        self.kind == SessionKind::Client
    }

    /// True for outbound connections to peer services.
    pub fn is_server(&self) -> bool {
        self.kind == SessionKind::Server
    }

    /// The session id behind this handle.
    pub fn id(&self) -> SlotId {
        self.id
    }
}

/// A user-written module: a protocol plus reactions to its events.
///
/// Every callback defaults to a no-op, so a module implements exactly the
/// events it cares about. Typed message handlers are registered once at
/// construction in [`Module::register`]; connection lifecycle, timers, and
/// outbound dialing go through the [`Context`] passed to every callback.
pub trait Module: Sized + 'static {
    /// The wire protocol this module speaks.
    type Protocol: ProtocolSpec;

    /// Register typed message handlers. Runs once before the reactor
    /// starts; registering two handlers for one payload type panics here
    /// rather than missing at runtime.
    fn register(_reg: &mut ModuleRegistry<Self>) {}

    /// Declare the component pack. Components receive every event after
    /// the module, in declaration order. Runs once before the reactor
    /// starts; the module may hand shared state to its components here.
    fn components(&self, _set: &mut ComponentSet<Self>) {}

    /// The reactor is up; outbound dialing belongs here.
    fn on_initialized(&mut self, _cx: &mut Context<Self>) {}

    /// The reactor is stopping; called exactly once.
    fn on_deinitialized(&mut self, _cx: &mut Context<Self>) {}

    /// Configuration is available; called once, right after
    /// `on_initialized`, with the full options map.
    fn on_configuration(&mut self, _cx: &mut Context<Self>, _opts: &Options) {}

    /// A connection was established (inbound or outbound; check
    /// [`Conn::is_server`]). Strictly precedes any message from it.
    fn on_connected(&mut self, _cx: &mut Context<Self>, _conn: Conn) {}

    /// A connection ended. Fires exactly once per established connection,
    /// after its last message, and never after `kill`.
    fn on_disconnected(&mut self, _cx: &mut Context<Self>, _conn: Conn) {}

    /// A stdin command arrived (built-ins included).
    fn on_command(&mut self, _cx: &mut Context<Self>, _cmd: &Command) {}
}
