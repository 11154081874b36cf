//! Components: reusable handler packs composed with a module.
//!
//! A component contributes its own typed handlers and lifecycle reactions;
//! the dispatch layer fans every event out to the module first, then to
//! each component in declaration order. A component-level miss is silent.
//!
//! Fan-out lifts the entry being called out of the set for the duration of
//! the call, so a component may post messages to its peers without
//! aliasing itself.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use protomux_proto::{log_rejected, InProtocol};

use crate::config::Options;
use crate::context::Context;
use crate::module::{Conn, Module};

/// A handler pack composed with module `M`.
///
/// All callbacks default to no-ops; a component implements the subset it
/// cares about and registers typed handlers in [`Component::register`].
pub trait Component<M: Module>: 'static {
    /// Register typed message and post handlers.
    fn register(_reg: &mut ComponentRegistry<Self, M>)
    where
        Self: Sized,
    {
    }

    /// The reactor is up.
    fn on_initialized(&mut self, _module: &mut M, _cx: &mut Context<M>) {}

    /// The reactor is stopping.
    fn on_deinitialized(&mut self, _module: &mut M, _cx: &mut Context<M>) {}

    /// Configuration is available.
    fn on_configuration(&mut self, _module: &mut M, _cx: &mut Context<M>, _opts: &Options) {}

    /// A connection was established.
    fn on_connected(&mut self, _module: &mut M, _cx: &mut Context<M>, _conn: Conn) {}

    /// A connection ended.
    fn on_disconnected(&mut self, _module: &mut M, _cx: &mut Context<M>, _conn: Conn) {}
}

type Handler<C, M> = Box<dyn FnMut(&mut C, &mut M, &mut Context<M>, Conn, &[u8])>;
type PostHandler<C, M> = Box<dyn FnMut(&mut C, &mut M, &mut Context<M>, Box<dyn Any>) -> Box<dyn Any>>;

/// Typed handlers of one component.
pub struct ComponentRegistry<C, M: Module> {
    handlers: HashMap<u16, Handler<C, M>>,
    posts: HashMap<TypeId, PostHandler<C, M>>,
}

impl<C: Component<M>, M: Module> ComponentRegistry<C, M> {
    fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            posts: HashMap::new(),
        }
    }

    /// Register a handler for payload type `T`.
    pub fn on<T, F>(&mut self, mut f: F)
    where
        T: InProtocol<M::Protocol>,
        F: FnMut(&mut C, &mut M, &mut Context<M>, Conn, T) + 'static,
    {
        self.insert(
            T::TAG,
            Box::new(move |comp, module, cx, conn, buf| match T::decode(buf) {
                Ok(msg) => f(comp, module, cx, conn, msg),
                Err(err) => log_rejected(T::TAG, buf, &err),
            }),
        );
    }

    /// Register a handler whose return value is sent back on the
    /// connection under its canonical tag.
    pub fn on_reply<T, R, F>(&mut self, mut f: F)
    where
        T: InProtocol<M::Protocol>,
        R: InProtocol<M::Protocol>,
        F: FnMut(&mut C, &mut M, &mut Context<M>, Conn, T) -> R + 'static,
    {
        self.insert(
            T::TAG,
            Box::new(move |comp, module, cx, conn, buf| match T::decode(buf) {
                Ok(msg) => {
                    let reply = f(comp, module, cx, conn, msg);
                    cx.send_message(conn, &reply);
                }
                Err(err) => log_rejected(T::TAG, buf, &err),
            }),
        );
    }

    /// Register a handler for in-process messages of type `T`.
    ///
    /// `post_component` delivers to the first component in declaration
    /// order that registered the message's type and returns its value.
    pub fn on_post<T, R, F>(&mut self, mut f: F)
    where
        T: 'static,
        R: 'static,
        F: FnMut(&mut C, &mut M, &mut Context<M>, T) -> R + 'static,
    {
        let prev = self.posts.insert(
            TypeId::of::<T>(),
            Box::new(move |comp, module, cx, any| {
                let msg = any
                    .downcast::<T>()
                    .expect("post handler called with mismatched message type");
                Box::new(f(comp, module, cx, *msg)) as Box<dyn Any>
            }),
        );
        if prev.is_some() {
            panic!("duplicate post handler for one message type");
        }
    }

    fn insert(&mut self, tag: u16, handler: Handler<C, M>) {
        if self.handlers.insert(tag, handler).is_some() {
            panic!("duplicate component handler for tag {tag}");
        }
    }
}

pub(crate) trait ComponentSlot<M: Module> {
    fn initialized(&mut self, module: &mut M, cx: &mut Context<M>);
    fn deinitialized(&mut self, module: &mut M, cx: &mut Context<M>);
    fn configured(&mut self, module: &mut M, cx: &mut Context<M>, opts: &Options);
    fn connected(&mut self, module: &mut M, cx: &mut Context<M>, conn: Conn);
    fn disconnected(&mut self, module: &mut M, cx: &mut Context<M>, conn: Conn);
    fn dispatch(
        &mut self,
        module: &mut M,
        cx: &mut Context<M>,
        conn: Conn,
        tag: u16,
        payload: &[u8],
    ) -> bool;
    fn takes_post(&self, type_id: TypeId) -> bool;
    fn post(&mut self, module: &mut M, cx: &mut Context<M>, msg: Box<dyn Any>) -> Box<dyn Any>;
}

struct Entry<C: Component<M>, M: Module> {
    component: C,
    registry: ComponentRegistry<C, M>,
}

impl<C: Component<M>, M: Module> ComponentSlot<M> for Entry<C, M> {
    fn initialized(&mut self, module: &mut M, cx: &mut Context<M>) {
        self.component.on_initialized(module, cx);
    }

    fn deinitialized(&mut self, module: &mut M, cx: &mut Context<M>) {
        self.component.on_deinitialized(module, cx);
    }

    fn configured(&mut self, module: &mut M, cx: &mut Context<M>, opts: &Options) {
        self.component.on_configuration(module, cx, opts);
    }

    fn connected(&mut self, module: &mut M, cx: &mut Context<M>, conn: Conn) {
        self.component.on_connected(module, cx, conn);
    }

    fn disconnected(&mut self, module: &mut M, cx: &mut Context<M>, conn: Conn) {
        self.component.on_disconnected(module, cx, conn);
    }

    fn dispatch(
        &mut self,
        module: &mut M,
        cx: &mut Context<M>,
        conn: Conn,
        tag: u16,
        payload: &[u8],
    ) -> bool {
        match self.registry.handlers.get_mut(&tag) {
            Some(handler) => {
                handler(&mut self.component, module, cx, conn, payload);
                true
            }
            None => false,
        }
    }

    fn takes_post(&self, type_id: TypeId) -> bool {
        self.registry.posts.contains_key(&type_id)
    }

    fn post(&mut self, module: &mut M, cx: &mut Context<M>, msg: Box<dyn Any>) -> Box<dyn Any> {
        let type_id = msg.as_ref().type_id();
        let handler = self
            .registry
            .posts
            .get_mut(&type_id)
            .expect("post dispatched to a component without a matching handler");
        handler(&mut self.component, module, cx, msg)
    }
}

/// The declaration-ordered component pack of a module.
pub struct ComponentSet<M: Module> {
    entries: Vec<Option<Box<dyn ComponentSlot<M>>>>,
}

impl<M: Module> ComponentSet<M> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append a component; later components receive events later.
    pub fn add<C: Component<M>>(&mut self, component: C) {
        let mut registry = ComponentRegistry::new();
        C::register(&mut registry);
        self.entries
            .push(Some(Box::new(Entry { component, registry })));
    }

    pub(crate) fn count(&self) -> usize {
        self.entries.len()
    }

    fn lift(&mut self, index: usize) -> Option<Box<dyn ComponentSlot<M>>> {
        self.entries.get_mut(index)?.take()
    }

    fn restore(&mut self, index: usize, slot: Box<dyn ComponentSlot<M>>) {
        self.entries[index] = Some(slot);
    }

    fn takes_post_at(&self, index: usize, type_id: TypeId) -> bool {
        self.entries
            .get(index)
            .and_then(Option::as_ref)
            .map(|slot| slot.takes_post(type_id))
            .unwrap_or(false)
    }
}

/// Visit every component in declaration order, lifting each out of the set
/// for the duration of its call.
pub(crate) fn each_slot<M: Module>(
    set: &Rc<RefCell<ComponentSet<M>>>,
    mut f: impl FnMut(&mut dyn ComponentSlot<M>),
) {
    let count = set.borrow().count();
    for index in 0..count {
        let lifted = set.borrow_mut().lift(index);
        if let Some(mut slot) = lifted {
            f(slot.as_mut());
            set.borrow_mut().restore(index, slot);
        }
    }
}

/// Deliver an in-process message to the first component that registered a
/// handler for its type; returns the handler's boxed value.
pub(crate) fn post_first<M: Module>(
    set: &Rc<RefCell<ComponentSet<M>>>,
    module: &mut M,
    cx: &mut Context<M>,
    msg: Box<dyn Any>,
) -> Option<Box<dyn Any>> {
    let type_id = msg.as_ref().type_id();
    let count = set.borrow().count();
    for index in 0..count {
        if !set.borrow().takes_post_at(index, type_id) {
            continue;
        }
        let mut slot = set.borrow_mut().lift(index)?;
        let out = slot.post(module, cx, msg);
        set.borrow_mut().restore(index, slot);
        return Some(out);
    }
    None
}
