//! Session pool, I/O loops, and outbound connector for protomux.
//!
//! A session is the per-TCP-connection state and I/O machinery: framing
//! buffers, the send queue, lifecycle flags, and the reference bookkeeping
//! that makes deferred callbacks against a gone connection safe.
//!
//! ## Features
//!
//! - **Arena pool**: sessions live in generational slab slots; stale
//!   handles compare generations instead of chasing free lists.
//! - **Recurring reads**: each completed read schedules the next, growing
//!   the read buffer only when forced.
//! - **Double-buffered writes**: at most one write in flight; appends made
//!   during the flight land on the idle buffer.
//! - **Reference tokens**: user-held references pin a slot against reuse
//!   until dropped; destruction waits for I/O, notification, and the last
//!   reference.
//! - **Auto-reconnect**: outbound sessions re-dial on a fixed backoff with
//!   no retry cap.
//!
//! All I/O runs as local tasks on the owning thread; events flow to the
//! reactor over an unbounded channel in per-session wire order.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arena;
pub mod event;
pub mod io;
pub mod pool;

pub use arena::{Arena, SlotId};
pub use event::{SessionEvent, SessionKind};
pub use io::{spawn_inbound, spawn_outbound, RECONNECT_DELAY};
pub use pool::{SessionRef, Sessions};
