//! Frame encoding and stall-aware parsing.
//!
//! Frames are length-prefixed and type-tagged; both header fields are
//! little-endian `u16`. [`peek_frame`] never consumes input: callers advance
//! their read buffer by [`FrameView::total_len`] once the frame has been
//! handed off.

use crate::error::WireError;

/// Frame header size in bytes (`total_len` + `type_tag`)
pub const FRAME_HEADER_LEN: usize = 4;

/// Maximum total frame size (header included)
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Maximum payload size within a single frame
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - FRAME_HEADER_LEN;

/// Non-owning view of one complete frame inside a read buffer.
///
/// Valid only while the underlying buffer is unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameView<'a> {
    /// Payload type tag
    pub tag: u16,
    /// Payload bytes, header excluded
    pub payload: &'a [u8],
    /// Total frame length, header included
    pub total_len: usize,
}

/// Encode the 4-byte frame header for a payload of `payload_len` bytes.
///
/// The header and payload together must fit the 65 535-byte frame ceiling.
pub fn encode_header(tag: u16, payload_len: usize) -> Result<[u8; FRAME_HEADER_LEN], WireError> {
    let total = FRAME_HEADER_LEN + payload_len;
    if total > MAX_FRAME_LEN {
        return Err(WireError::Oversize(total));
    }

    let len = (total as u16).to_le_bytes();
    let tag = tag.to_le_bytes();
    Ok([len[0], len[1], tag[0], tag[1]])
}

/// Parse the first complete frame out of `buf`, if one is there.
///
/// Returns `Ok(None)` when fewer than `total_len` bytes are buffered (the
/// caller waits for more data). A `total_len` below the header size is a
/// protocol error; so is one above `max_frame`.
pub fn peek_frame(buf: &[u8], max_frame: usize) -> Result<Option<FrameView<'_>>, WireError> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }

    let total_len = u16::from_le_bytes([buf[0], buf[1]]);
    if (total_len as usize) < FRAME_HEADER_LEN {
        return Err(WireError::BadLength(total_len));
    }
    if total_len as usize > max_frame {
        return Err(WireError::Oversize(total_len as usize));
    }
    if buf.len() < total_len as usize {
        return Ok(None);
    }

    let tag = u16::from_le_bytes([buf[2], buf[3]]);
    Ok(Some(FrameView {
        tag,
        payload: &buf[FRAME_HEADER_LEN..total_len as usize],
        total_len: total_len as usize,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rolling::RollingBuffer;

    fn frame_bytes(tag: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = encode_header(tag, payload.len()).unwrap().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_header_layout() {
        let header = encode_header(0x0102, 3).unwrap();
        assert_eq!(header, [7, 0, 0x02, 0x01]);
    }

    #[test]
    fn test_roundtrip() {
        let bytes = frame_bytes(42, b"hello world");
        let view = peek_frame(&bytes, MAX_FRAME_LEN).unwrap().unwrap();
        assert_eq!(view.tag, 42);
        assert_eq!(view.payload, b"hello world");
        assert_eq!(view.total_len, bytes.len());
    }

    #[test]
    fn test_roundtrip_through_rolling_buffer() {
        // Property 1: parse(encode(tag, bytes)) == (tag, bytes) and the
        // buffer is empty afterwards.
        let payload = vec![0xAB; 1500];
        let bytes = frame_bytes(u16::MAX, &payload);

        let mut buf = RollingBuffer::with_capacity(4096);
        let free = buf.writable_tail();
        free[..bytes.len()].copy_from_slice(&bytes);
        buf.commit(bytes.len());

        let view = peek_frame(buf.readable(), MAX_FRAME_LEN).unwrap().unwrap();
        assert_eq!(view.tag, u16::MAX);
        assert_eq!(view.payload, &payload[..]);
        let advance = view.total_len;
        buf.consume(advance);
        assert!(buf.readable().is_empty());
    }

    #[test]
    fn test_empty_payload_is_valid() {
        let bytes = frame_bytes(7, b"");
        assert_eq!(bytes.len(), FRAME_HEADER_LEN);
        let view = peek_frame(&bytes, MAX_FRAME_LEN).unwrap().unwrap();
        assert_eq!(view.tag, 7);
        assert!(view.payload.is_empty());
    }

    #[test]
    fn test_partial_frame_stalls() {
        let bytes = frame_bytes(1, b"abcdef");
        assert!(peek_frame(&bytes[..3], MAX_FRAME_LEN).unwrap().is_none());
        assert!(peek_frame(&bytes[..7], MAX_FRAME_LEN).unwrap().is_none());
        assert!(peek_frame(&bytes, MAX_FRAME_LEN).unwrap().is_some());
    }

    #[test]
    fn test_bad_length_rejected() {
        let bytes = [3u8, 0, 0, 0];
        assert_eq!(
            peek_frame(&bytes, MAX_FRAME_LEN),
            Err(WireError::BadLength(3))
        );
    }

    #[test]
    fn test_ceiling_enforced() {
        let bytes = frame_bytes(1, &[0u8; 100]);
        assert_eq!(
            peek_frame(&bytes, 64),
            Err(WireError::Oversize(bytes.len()))
        );
    }

    #[test]
    fn test_oversize_payload_rejected_on_encode() {
        assert_eq!(
            encode_header(0, MAX_PAYLOAD_LEN + 1),
            Err(WireError::Oversize(MAX_FRAME_LEN + 1))
        );
        assert!(encode_header(0, MAX_PAYLOAD_LEN).is_ok());
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut bytes = frame_bytes(1, b"one");
        bytes.extend_from_slice(&frame_bytes(2, b"two"));

        let first = peek_frame(&bytes, MAX_FRAME_LEN).unwrap().unwrap();
        assert_eq!(first.tag, 1);
        assert_eq!(first.payload, b"one");

        let rest = &bytes[first.total_len..];
        let second = peek_frame(rest, MAX_FRAME_LEN).unwrap().unwrap();
        assert_eq!(second.tag, 2);
        assert_eq!(second.payload, b"two");
    }
}
