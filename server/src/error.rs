//! Server error types.

use crate::config::ConfigError;
use thiserror::Error;

/// Fatal errors surfaced by `run_server`.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Missing or invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The listen socket could not be bound.
    #[error("bind failed: {0}")]
    Bind(std::io::Error),

    /// Runtime construction or other I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
