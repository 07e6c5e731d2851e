use thiserror::Error;

/// Logical error categories surfaced by the public API (see the error
/// handling design notes for which paths return this vs. log-and-transition).
#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("buffer overflow")]
    BufferOverflow,

    #[error("not connected")]
    NotConnected,

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
