//! Tag-keyed handler registry for module-level dispatch.
//!
//! Handlers are registered once at construction; dispatch is a map lookup
//! on the wire tag followed by a typed decode. A decode failure is routed
//! through the reject hook and the frame is dropped.

use std::collections::HashMap;

use protomux_proto::{log_rejected, InProtocol};

use crate::context::Context;
use crate::module::{Conn, Module};

type Handler<M> = Box<dyn FnMut(&mut M, &mut Context<M>, Conn, &[u8])>;

/// Typed message handlers of a module.
pub struct ModuleRegistry<M: Module> {
    handlers: HashMap<u16, Handler<M>>,
}

impl<M: Module> ModuleRegistry<M> {
    pub(crate) fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for payload type `T`.
    pub fn on<T, F>(&mut self, mut f: F)
    where
        T: InProtocol<M::Protocol>,
        F: FnMut(&mut M, &mut Context<M>, Conn, T) + 'static,
    {
        self.insert(
            T::TAG,
            Box::new(move |module, cx, conn, buf| match T::decode(buf) {
                Ok(msg) => f(module, cx, conn, msg),
                Err(err) => log_rejected(T::TAG, buf, &err),
            }),
        );
    }

    /// Register a handler whose return value is sent back on the
    /// connection under its canonical tag (implicit reply).
    pub fn on_reply<T, R, F>(&mut self, mut f: F)
    where
        T: InProtocol<M::Protocol>,
        R: InProtocol<M::Protocol>,
        F: FnMut(&mut M, &mut Context<M>, Conn, T) -> R + 'static,
    {
        self.insert(
            T::TAG,
            Box::new(move |module, cx, conn, buf| match T::decode(buf) {
                Ok(msg) => {
                    let reply = f(module, cx, conn, msg);
                    cx.send_message(conn, &reply);
                }
                Err(err) => log_rejected(T::TAG, buf, &err),
            }),
        );
    }

    fn insert(&mut self, tag: u16, handler: Handler<M>) {
        if self.handlers.insert(tag, handler).is_some() {
            panic!("duplicate message handler for tag {tag}");
        }
    }

    /// Dispatch one frame; false when no handler matches the tag.
    pub(crate) fn dispatch(
        &mut self,
        module: &mut M,
        cx: &mut Context<M>,
        conn: Conn,
        tag: u16,
        payload: &[u8],
    ) -> bool {
        match self.handlers.get_mut(&tag) {
            Some(handler) => {
                handler(module, cx, conn, payload);
                true
            }
            None => false,
        }
    }
}
