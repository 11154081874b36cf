//! Wire framing error types.

use thiserror::Error;

/// Framing errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// Header claims fewer bytes than the header itself occupies
    #[error("frame length below header size: {0}")]
    BadLength(u16),

    /// Frame exceeds the configured ceiling
    #[error("frame size limit exceeded: {0}")]
    Oversize(usize),
}
