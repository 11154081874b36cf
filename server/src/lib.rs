//! Single-threaded, event-driven TCP server framework for length-prefixed,
//! type-tagged binary messages.
//!
//! An application declares a protocol (an ordered list of payload types),
//! implements [`Module`] for its state, and hands both to [`run_server`].
//! The reactor multiplexes inbound connections, outbound connections with
//! automatic reconnection, timers, and stdin commands onto one thread;
//! every callback runs there and must not block.
//!
//! ## Example
//!
//! ```no_run
//! use protomux_proto::protocol;
//! use protomux_server::{control_channel, run_server, Module, ModuleRegistry, Options};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Clone, Serialize, Deserialize)]
//! struct Probe { seq: u64 }
//!
//! protocol! {
//!     pub proto EchoProto { Probe }
//! }
//!
//! struct Echo;
//!
//! impl Module for Echo {
//!     type Protocol = EchoProto;
//!
//!     fn register(reg: &mut ModuleRegistry<Self>) {
//!         reg.on_reply(|_echo, _cx, _conn, probe: Probe| probe);
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut opts = Options::new();
//!     opts.insert("Port".into(), "5999".into());
//!     let (_handle, ctrl) = control_channel();
//!     run_server(Echo, &opts, ctrl)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod command;
pub mod component;
pub mod config;
pub mod context;
pub mod error;
pub mod module;
pub mod reactor;
pub mod registry;
pub mod timer;

pub use command::{control_channel, Command, ControlReceiver, ServerHandle};
pub use component::{Component, ComponentRegistry, ComponentSet};
pub use config::{ConfigError, Options, ServerConfig};
pub use context::Context;
pub use error::ServerError;
pub use module::{Conn, Module};
pub use reactor::run_server;
pub use registry::ModuleRegistry;
pub use timer::Timer;

// the session-level types modules interact with through Context
pub use protomux_session::{SessionRef, SlotId};
