//! The reactor: one thread, one loop, every event.
//!
//! `run_server` owns the accept socket, both session pools, the control
//! channel fed by stdin and external handles, the posted-task queue that
//! timers and `post` feed, and the session event stream. All module and
//! component callbacks run here, sequentially; nothing in a callback may
//! block.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use protomux_proto::Delivery;
use protomux_session::{spawn_inbound, SessionEvent, SessionKind, Sessions};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::command::{handle_builtin, spawn_stdin_reader, Control, ControlReceiver, ServerHandle};
use crate::component::{each_slot, ComponentSet};
use crate::config::{Options, ServerConfig};
use crate::context::Context;
use crate::error::ServerError;
use crate::module::{Conn, Module};
use crate::registry::ModuleRegistry;

/// Run a module's server until it is stopped.
///
/// Binds the configured listen address, dispatches `on_initialized` and
/// `on_configuration`, then runs the event loop until `exit` arrives on
/// stdin or the paired [`crate::ServerHandle`] stops it. Configuration and
/// bind failures are fatal and returned to the caller.
pub fn run_server<M: Module>(
    module: M,
    opts: &Options,
    ctrl: ControlReceiver,
) -> Result<(), ServerError> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&rt, run_inner(module, opts, ctrl))
}

async fn run_inner<M: Module>(
    mut module: M,
    opts: &Options,
    ctrl: ControlReceiver,
) -> Result<(), ServerError> {
    let config = ServerConfig::from_options(opts)?;
    let listener = TcpListener::bind((config.ip, config.port))
        .await
        .map_err(ServerError::Bind)?;
    info!("listening on {}:{}", config.ip, config.port);

    let ControlReceiver {
        rx: mut control_rx,
        tx: control_tx,
    } = ctrl;
    let handle = ServerHandle { tx: control_tx };
    spawn_stdin_reader(handle.clone());

    let clients = Sessions::new(SessionKind::Client);
    let servers = Sessions::new(SessionKind::Server);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (tasks_tx, mut tasks_rx) = mpsc::unbounded_channel();

    let mut registry = ModuleRegistry::new();
    M::register(&mut registry);

    let components = Rc::new(RefCell::new(ComponentSet::new()));
    module.components(&mut components.borrow_mut());

    let mut cx = Context {
        clients: clients.clone(),
        servers,
        events_tx: events_tx.clone(),
        tasks_tx,
        control: handle,
        components: components.clone(),
        correlators: Rc::new(RefCell::new(HashMap::new())),
        unhandled: Rc::new(Cell::new(0)),
    };

    module.on_initialized(&mut cx);
    each_slot(&components, |slot| slot.initialized(&mut module, &mut cx));
    module.on_configuration(&mut cx, opts);
    each_slot(&components, |slot| slot.configured(&mut module, &mut cx, opts));

    let mut running = true;
    while running {
        tokio::select! {
            biased;

            ctrl = control_rx.recv() => match ctrl {
                Some(Control::Stop) | None => running = false,
                Some(Control::Command(cmd)) => {
                    let stop = handle_builtin(&cmd);
                    module.on_command(&mut cx, &cmd);
                    if stop {
                        running = false;
                    }
                }
            },

            task = tasks_rx.recv() => if let Some(task) = task {
                task(&mut module, &mut cx);
            },

            event = events_rx.recv() => if let Some(event) = event {
                handle_session_event(&mut module, &mut registry, &components, &mut cx, event);
            },

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("accepted connection from {}", peer);
                    spawn_inbound(&clients, stream, events_tx.clone());
                }
                Err(err) => warn!("accept failed: {}", err),
            },
        }
    }

    drop(listener);
    shutdown(&mut module, &components, &mut cx);
    Ok(())
}

fn handle_session_event<M: Module>(
    module: &mut M,
    registry: &mut ModuleRegistry<M>,
    components: &Rc<RefCell<ComponentSet<M>>>,
    cx: &mut Context<M>,
    event: SessionEvent,
) {
    match event {
        SessionEvent::Connected { id, kind } => {
            if cx.pool(kind).is_killed(id) {
                return;
            }
            let conn = Conn { kind, id };
            module.on_connected(cx, conn);
            each_slot(components, |slot| slot.connected(module, cx, conn));
        }

        SessionEvent::Frame {
            id,
            kind,
            tag,
            payload,
        } => {
            if cx.pool(kind).is_killed(id) {
                return;
            }
            let conn = Conn { kind, id };

            // reply subscriptions consume server frames before dispatch
            if kind == SessionKind::Server {
                let sub = cx
                    .correlators
                    .borrow_mut()
                    .get_mut(&id)
                    .and_then(|corr| corr.take(tag));
                if let Some(sub) = sub {
                    sub(module, cx, Delivery::Frame(&payload));
                    return;
                }
            }

            let handled_module = registry.dispatch(module, cx, conn, tag, &payload);
            let mut handled_component = false;
            each_slot(components, |slot| {
                handled_component |= slot.dispatch(module, cx, conn, tag, &payload);
            });
            if !handled_module && !handled_component {
                cx.note_unhandled(tag);
            }
        }

        SessionEvent::Disconnected { id, kind } => {
            let pool = cx.pool(kind);
            if pool.is_killed(id) || pool.is_notified(id) {
                return;
            }
            let conn = Conn { kind, id };
            module.on_disconnected(cx, conn);
            each_slot(components, |slot| slot.disconnected(module, cx, conn));
            cx.pool(kind).mark_notified(id);
            if kind == SessionKind::Server {
                cx.cancel_correlator(id, false);
            }
        }
    }
}

fn shutdown<M: Module>(
    module: &mut M,
    components: &Rc<RefCell<ComponentSet<M>>>,
    cx: &mut Context<M>,
) {
    info!("reactor stopping");

    // every still-connected session emits its disconnect exactly once
    for kind in [SessionKind::Client, SessionKind::Server] {
        let pool = cx.pool(kind).clone();
        for id in pool.live_ids() {
            if pool.connected(id) && !pool.is_notified(id) {
                let conn = Conn { kind, id };
                module.on_disconnected(cx, conn);
                each_slot(components, |slot| slot.disconnected(module, cx, conn));
                pool.mark_notified(id);
            }
        }
    }

    // every pending reply subscription resolves as cancelled
    let drained: Vec<_> = {
        let mut map = cx.correlators.borrow_mut();
        map.drain()
            .flat_map(|(_, mut corr)| corr.cancel())
            .collect()
    };
    for sub in drained {
        sub(module, cx, Delivery::Cancelled);
    }

    module.on_deinitialized(cx);
    each_slot(components, |slot| slot.deinitialized(module, cx));
}
