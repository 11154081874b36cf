//! The echo service's wire protocol.

use protomux_proto::protocol;
use serde::{Deserialize, Serialize};

/// A timestamped probe; echoed back unchanged.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct EchoProbe {
    /// Caller-chosen sequence number.
    pub seq: u64,
    /// Free-form note carried alongside.
    pub note: String,
}

/// An opaque payload; echoed back unchanged.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct EchoBlob {
    /// The bytes to bounce.
    pub body: Vec<u8>,
}

protocol! {
    /// Probes and blobs, echoed verbatim.
    pub proto EchoProto { EchoProbe, EchoBlob }
}
