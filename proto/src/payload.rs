//! Payload encoding and decoding.
//!
//! The framework below the frame envelope moves only `(tag, bytes)`; this
//! module defines how payload types become bytes. The canonical codec is
//! CBOR via `ciborium`, provided for every serde-capable type.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// Payload encode failure
#[derive(Error, Debug)]
#[error("payload encode failed: {0}")]
pub struct EncodeError(#[from] ciborium::ser::Error<std::io::Error>);

/// Payload decode failure
#[derive(Error, Debug)]
#[error("payload decode failed: {0}")]
pub struct DecodeError(#[from] ciborium::de::Error<std::io::Error>);

/// A message payload the framework can move across the wire.
///
/// Blanket-implemented for every `Serialize + DeserializeOwned + Default`
/// type; the `Default` bound supplies the placeholder value delivered with
/// cancelled subscriptions.
pub trait Payload: Default + 'static {
    /// Append the encoded payload to `out`.
    fn encode_to(&self, out: &mut Vec<u8>) -> Result<(), EncodeError>;

    /// Decode a payload from `buf`.
    fn decode(buf: &[u8]) -> Result<Self, DecodeError>;
}

impl<T> Payload for T
where
    T: Serialize + DeserializeOwned + Default + 'static,
{
    fn encode_to(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        ciborium::ser::into_writer(self, out)?;
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        Ok(ciborium::de::from_reader(buf)?)
    }
}

/// Log an undecodable frame and move on.
///
/// The decode-failure policy: the offending bytes are logged with a bounded
/// hex prefix and the frame is dropped. The process never terminates over a
/// bad payload.
pub fn log_rejected(tag: u16, buf: &[u8], err: &DecodeError) {
    const PREVIEW: usize = 32;
    let shown = &buf[..buf.len().min(PREVIEW)];
    let mut hex = String::with_capacity(shown.len() * 3);
    for byte in shown {
        hex.push_str(&format!("{byte:02x} "));
    }
    let suffix = if buf.len() > PREVIEW { "…" } else { "" };
    warn!(
        "rejected payload: tag={} len={} bytes=[{}{}] error={}",
        tag,
        buf.len(),
        hex.trim_end(),
        suffix,
        err
    );
}
