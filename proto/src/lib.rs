//! Payload codec, protocol registry, and reply correlator for protomux.
//!
//! A protocol is an ordered list of payload types; a type's tag is its
//! declaration index. Subprotocols are subset views that keep the parent's
//! tags. Tags resolve at compile time: identifying a type that is not part
//! of a protocol is a missing trait impl, never a runtime miss.
//!
//! ## Example
//!
//! ```rust
//! use protomux_proto::{identify, protocol, subprotocol};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Clone, Serialize, Deserialize)]
//! struct Ping { seq: u64 }
//!
//! #[derive(Debug, Default, Clone, Serialize, Deserialize)]
//! struct Note { text: String }
//!
//! protocol! {
//!     pub proto Wire { Ping, Note }
//! }
//!
//! subprotocol! {
//!     pub proto NotesOnly : Wire { Note }
//! }
//!
//! assert_eq!(identify::<Wire, Ping>(), 0);
//! assert_eq!(identify::<Wire, Note>(), 1);
//! // subset views keep the parent's tags
//! assert_eq!(identify::<NotesOnly, Note>(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod correlator;
pub mod payload;
pub mod protocol;

pub use correlator::{Cancelled, Correlator, Delivery};
pub use payload::{log_rejected, DecodeError, EncodeError, Payload};
pub use protocol::{identify, InProtocol, ProtocolSpec};
