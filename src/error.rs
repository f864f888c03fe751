use std::io;

use thiserror::Error;

/// Crate-wide error type.
///
/// Retry-later conditions on non-blocking sockets are not errors; they are
/// reported through [`crate::buffer::Transfer`] so that callers can re-arm
/// and return to the reactor.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("no space for the write, remaining: {remaining}, write: {requested}")]
    BufferFull { requested: usize, remaining: usize },

    #[error("malformed input: {0}")]
    Decode(String),

    #[error("cannot encode response: {0}")]
    Encode(String),

    #[error("factory already registered for protocol '{0}'")]
    DuplicateFactory(String),

    #[error("no factories registered for protocol '{0}'")]
    UnknownProtocol(String),

    #[error("no listening socket added")]
    NoListeners,

    #[error("no processor factory registered")]
    NoProcessors,

    #[error("io worker is gone")]
    WorkerGone,
}

pub type Result<T> = std::result::Result<T, Error>;
