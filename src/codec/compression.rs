//! Compressor identities: `{None, Gzip, Deflate, Brotli, LZ4, Zstd, Snappy, LZMA}`.
//!
//! One-byte IDs are frozen on disk in the file header (`compression_id`).
//! Adding a codec means adding a variant at the end and never renumbering
//! an existing one — the same discipline the teacher crate documents for
//! its codec UUIDs, just with a u8 instead of a 16-byte UUID since this
//! format has no plugin ABI.

use std::io::{Read, Write};

use super::CodecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionId {
    None    = 0,
    Gzip    = 1,
    Deflate = 2,
    Brotli  = 3,
    Lz4     = 4,
    Zstd    = 5,
    Snappy  = 6,
    Lzma    = 7,
}

impl CompressionId {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Gzip),
            2 => Some(Self::Deflate),
            3 => Some(Self::Brotli),
            4 => Some(Self::Lz4),
            5 => Some(Self::Zstd),
            6 => Some(Self::Snappy),
            7 => Some(Self::Lzma),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

const DEFAULT_ZSTD_LEVEL: i32 = 3;
const DEFAULT_BROTLI_QUALITY: u32 = 9;

pub fn compress(id: CompressionId, data: &[u8]) -> Result<Vec<u8>, CodecError> {
    match id {
        CompressionId::None => Ok(data.to_vec()),
        CompressionId::Gzip => {
            use flate2::write::GzEncoder;
            use flate2::Compression;
            let mut enc = GzEncoder::new(Vec::new(), Compression::default());
            enc.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
            enc.finish().map_err(|e| CodecError::Compression(e.to_string()))
        }
        CompressionId::Deflate => {
            use flate2::write::DeflateEncoder;
            use flate2::Compression;
            let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
            enc.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
            enc.finish().map_err(|e| CodecError::Compression(e.to_string()))
        }
        CompressionId::Brotli => {
            let mut out = Vec::new();
            {
                let mut w = brotli::CompressorWriter::new(&mut out, 4096, DEFAULT_BROTLI_QUALITY, 22);
                w.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
            }
            Ok(out)
        }
        CompressionId::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionId::Zstd => {
            zstd::encode_all(data, DEFAULT_ZSTD_LEVEL).map_err(|e| CodecError::Compression(e.to_string()))
        }
        CompressionId::Snappy => {
            let mut enc = snap::raw::Encoder::new();
            enc.compress_vec(data).map_err(|e| CodecError::Compression(e.to_string()))
        }
        CompressionId::Lzma => {
            let mut out = Vec::new();
            lzma_rs::lzma_compress(&mut std::io::Cursor::new(data), &mut out)
                .map_err(|e| CodecError::Compression(e.to_string()))?;
            Ok(out)
        }
    }
}

pub fn decompress(id: CompressionId, data: &[u8]) -> Result<Vec<u8>, CodecError> {
    match id {
        CompressionId::None => Ok(data.to_vec()),
        CompressionId::Gzip => {
            use flate2::read::GzDecoder;
            let mut out = Vec::new();
            GzDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| CodecError::Decompression(e.to_string()))?;
            Ok(out)
        }
        CompressionId::Deflate => {
            use flate2::read::DeflateDecoder;
            let mut out = Vec::new();
            DeflateDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| CodecError::Decompression(e.to_string()))?;
            Ok(out)
        }
        CompressionId::Brotli => {
            let mut out = Vec::new();
            brotli::Decompressor::new(data, 4096)
                .read_to_end(&mut out)
                .map_err(|e| CodecError::Decompression(e.to_string()))?;
            Ok(out)
        }
        CompressionId::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| CodecError::Decompression(e.to_string())),
        CompressionId::Zstd => {
            zstd::decode_all(data).map_err(|e| CodecError::Decompression(e.to_string()))
        }
        CompressionId::Snappy => {
            let mut dec = snap::raw::Decoder::new();
            dec.decompress_vec(data).map_err(|e| CodecError::Decompression(e.to_string()))
        }
        CompressionId::Lzma => {
            let mut out = Vec::new();
            lzma_rs::lzma_decompress(&mut std::io::Cursor::new(data), &mut out)
                .map_err(|e| CodecError::Decompression(e.to_string()))?;
            Ok(out)
        }
    }
}
