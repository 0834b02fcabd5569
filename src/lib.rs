//! # fskv — embedded, single-file, persistent key-value store
//!
//! Format guarantees:
//! - A single 64-byte header at offset 0 declares format version and the
//!   three frozen codec identities (compression, encryption, hash); they
//!   never change for the life of a file (§3 invariant 5, §4.2)
//! - The header is checksummed with FNV-1a; a corrupt header is a hard
//!   `Header` error, never a silent fallback
//! - Values live in an append-mostly region; the index region (an on-disk
//!   mirror of the in-memory `DashMap`) is reconstructible by scanning for
//!   the `"IDXE"` magic without needing the in-memory state
//! - `file_length` only grows in normal operation; only `compact()` shrinks it
//! - Encryption, when enabled, seals both the header body and every index
//!   entry with the same AEAD; value bytes are sealed independently per write

pub mod appender;
pub mod codec;
pub mod compactor;
pub mod engine;
pub mod error;
pub mod flush_driver;
pub mod header;
pub mod index;

pub use codec::{CompressionId, EncryptionId, HashId};
pub use engine::{Engine, EngineConfig, FileUpdateMode, Stats};
pub use error::{EngineError, Result};
pub use flush_driver::FlushDriver;
pub use header::Header;
