//! Wire framing and session buffers for protomux.
//!
//! This crate provides the lowest layer of the framework: the on-wire frame
//! format and the buffer machinery sessions use to read and write it.
//!
//! ## Wire format
//!
//! ```text
//! +----------------------+----------------------------+
//! | u16 total_len (LE)   | frame length incl. header  |
//! +----------------------+----------------------------+
//! | u16 type_tag (LE)    | payload type index         |
//! +----------------------+----------------------------+
//! | payload              | total_len - 4 bytes        |
//! +----------------------+----------------------------+
//! ```
//!
//! A frame is at most 65 535 bytes; a header that claims fewer than 4 bytes
//! is malformed; a header that claims more bytes than are buffered is a
//! parse stall, not an error.
//!
//! ## Buffers
//!
//! - [`RollingBuffer`]: growable read buffer with head/tail indexes that
//!   compacts before it reallocates.
//! - [`WriteBuf`]/[`DoubleWriteBuf`]: chunked send queues drawn from a
//!   free list, flipped so one side takes appends while the other is in
//!   flight.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunks;
pub mod error;
pub mod frame;
pub mod rolling;

pub use chunks::{Chunk, DoubleWriteBuf, WriteBuf, CHUNK_SIZE};
pub use error::WireError;
pub use frame::{
    encode_header, peek_frame, FrameView, FRAME_HEADER_LEN, MAX_FRAME_LEN, MAX_PAYLOAD_LEN,
};
pub use rolling::RollingBuffer;
