//! Codec layer: compressor, AEAD cipher, hash — pure `bytes -> bytes` transforms.
//!
//! Three independent one-byte identities are stamped into the file header and
//! are immutable for the life of a database file (§4.1, §3 invariant 5). Each
//! identity dispatches through a small match, the way the teacher crate's
//! `CodecId` dispatches to `NoneCodec`/`ZstdCodec`/... — no trait objects are
//! required for the compressor set since the pipeline only ever needs one
//! codec at a time, but a `Compressor` trait still keeps call sites uniform.

pub mod cipher;
pub mod compression;
pub mod hash;

use std::io;
use thiserror::Error;

pub use cipher::EncryptionId;
pub use compression::CompressionId;
pub use hash::HashId;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("compression error: {0}")]
    Compression(String),
    #[error("decompression error: {0}")]
    Decompression(String),
    #[error("encryption error: {0}")]
    Encryption(String),
    #[error("decryption failed — wrong key or corrupted data")]
    AuthFailure,
    #[error("unsupported codec id {0}")]
    UnsupportedCodec(u8),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Run the value write pipeline: compress, then (optionally) encrypt.
pub fn encode_value(
    data: &[u8],
    compression: CompressionId,
    encryption: EncryptionId,
    key: Option<&[u8; 32]>,
) -> Result<Vec<u8>, CodecError> {
    let compressed = compression::compress(compression, data)?;
    match (encryption, key) {
        (EncryptionId::None, _) => Ok(compressed),
        (enc, Some(k)) => cipher::seal(enc, k, &compressed),
        (_, None) => Err(CodecError::Encryption("encryption enabled but no key provided".into())),
    }
}

/// Run the value read pipeline: decrypt, then decompress.
pub fn decode_value(
    data: &[u8],
    compression: CompressionId,
    encryption: EncryptionId,
    key: Option<&[u8; 32]>,
) -> Result<Vec<u8>, CodecError> {
    let plain = match (encryption, key) {
        (EncryptionId::None, _) => data.to_vec(),
        (enc, Some(k)) => cipher::open(enc, k, data)?,
        (_, None) => return Err(CodecError::Encryption("decryption requested but no key provided".into())),
    };
    compression::decompress(compression, &plain)
}
