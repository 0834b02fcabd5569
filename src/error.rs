//! Crate-wide error surface.
//!
//! Each subsystem keeps its own error enum (`HeaderError`, `IndexError`,
//! `CodecError`) the way the teacher crate splits `SuperblockError` from
//! `CodecError` from `CryptoError`. [`EngineError`] is the one callers of
//! the public API actually see; it wraps every subsystem error via `#[from]`.

use std::io;
use thiserror::Error;

use crate::codec::CodecError;
use crate::header::HeaderError;
use crate::index::IndexError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A `set` with `update_validation_enabled` read back a different value
    /// than it just wrote.
    #[error("validation failed: read-back did not match the written value ({key_len} byte key)")]
    ValidationFailure { key_len: usize },

    /// The rebuilt compaction file's header did not round-trip.
    #[error("compaction verification failed: {0}")]
    CompactVerifyFailure(String),

    #[error("key length {actual} exceeds max_key_length {max}")]
    KeyTooLong { max: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
