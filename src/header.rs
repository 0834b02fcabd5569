//! File header — fixed 64-byte preamble at offset 0 (§4.2).
//!
//! ```text
//! Offset  Size  Field
//!    0      4   magic              = "FSKV"
//!    4      1   version
//!    5      1   compression_id
//!    6      1   encryption_id
//!    7      1   hash_id
//!    8      8   created_epoch_ms
//!   16      8   last_update_epoch_ms
//!   24      8   index_start
//!   32      4   index_used
//!   36      4   index_space
//!   40      4   index_count
//!   44     16   kdf_salt
//!   60      4   checksum           FNV-1a 32-bit, this field zeroed during the sum
//! ```
//!
//! `kdf_salt` occupies what would otherwise be reserved padding (see
//! SPEC_FULL.md §11d). When encryption is enabled the 64-byte body is
//! AEAD-sealed as a whole (landing 64 + [`crate::codec::cipher::AEAD_PAD`]
//! bytes), but the salt has to be readable *before* a password can be turned
//! into a key — so on disk, and only on disk, an encrypted file carries a
//! 16-byte cleartext copy of `kdf_salt` immediately before the sealed body.
//! [`peek_kdf_salt`] reads that prefix; the engine calls it, derives the key,
//! then calls [`read`] with the derived key.

use std::io::{self, Read, Seek, SeekFrom, Write};

use thiserror::Error;

use crate::codec::cipher::{self, EncryptionId, AEAD_PAD};
use crate::codec::{CompressionId, HashId};

pub const MAGIC: &[u8; 4] = b"FSKV";
pub const CURRENT_VERSION: u8 = 1;
pub const HEADER_SIZE: usize = 64;
pub const KDF_SALT_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("invalid magic — not an FSKV file")]
    InvalidMagic,
    #[error("unsupported format version {0} (current: {CURRENT_VERSION})")]
    UnsupportedVersion(u8),
    #[error("header checksum mismatch — file is corrupted")]
    ChecksumMismatch,
    #[error("header authentication failed — wrong key or corrupted data")]
    AuthFailure,
    #[error("configured {field} does not match the file's header")]
    ConfigMismatch { field: &'static str },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct Header {
    pub version: u8,
    pub compression_id: CompressionId,
    pub encryption_id: EncryptionId,
    pub hash_id: HashId,
    pub created_epoch_ms: u64,
    pub last_update_epoch_ms: u64,
    pub index_start: u64,
    pub index_used: u32,
    pub index_space: u32,
    pub index_count: u32,
    pub kdf_salt: [u8; KDF_SALT_LEN],
}

impl Header {
    pub fn create(
        compression_id: CompressionId,
        encryption_id: EncryptionId,
        hash_id: HashId,
        now_ms: u64,
        kdf_salt: [u8; KDF_SALT_LEN],
    ) -> Self {
        Self {
            version: CURRENT_VERSION,
            compression_id,
            encryption_id,
            hash_id,
            created_epoch_ms: now_ms,
            last_update_epoch_ms: now_ms,
            index_start: HEADER_SIZE as u64,
            index_used: 0,
            index_space: 0,
            index_count: 0,
            kdf_salt,
        }
    }

    fn encode_unchecksummed(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4] = self.version;
        buf[5] = self.compression_id.as_u8();
        buf[6] = self.encryption_id.as_u8();
        buf[7] = self.hash_id.as_u8();
        buf[8..16].copy_from_slice(&self.created_epoch_ms.to_le_bytes());
        buf[16..24].copy_from_slice(&self.last_update_epoch_ms.to_le_bytes());
        buf[24..32].copy_from_slice(&self.index_start.to_le_bytes());
        buf[32..36].copy_from_slice(&self.index_used.to_le_bytes());
        buf[36..40].copy_from_slice(&self.index_space.to_le_bytes());
        buf[40..44].copy_from_slice(&self.index_count.to_le_bytes());
        buf[44..60].copy_from_slice(&self.kdf_salt);
        // buf[60..64] (checksum) left zeroed.
        buf
    }

    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = self.encode_unchecksummed();
        let sum = fnv1a32(&buf[..60]);
        buf[60..64].copy_from_slice(&sum.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self, HeaderError> {
        if &buf[0..4] != MAGIC {
            return Err(HeaderError::InvalidMagic);
        }
        let version = buf[4];
        if version > CURRENT_VERSION {
            return Err(HeaderError::UnsupportedVersion(version));
        }
        let expected_sum = u32::from_le_bytes(buf[60..64].try_into().unwrap());
        let mut zeroed = *buf;
        zeroed[60..64].fill(0);
        if fnv1a32(&zeroed[..60]) != expected_sum {
            return Err(HeaderError::ChecksumMismatch);
        }

        let compression_id = CompressionId::from_u8(buf[5]).ok_or(HeaderError::InvalidMagic)?;
        let encryption_id = EncryptionId::from_u8(buf[6]).ok_or(HeaderError::InvalidMagic)?;
        let hash_id = HashId::from_u8(buf[7]).ok_or(HeaderError::InvalidMagic)?;
        let created_epoch_ms = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        let last_update_epoch_ms = u64::from_le_bytes(buf[16..24].try_into().unwrap());
        let index_start = u64::from_le_bytes(buf[24..32].try_into().unwrap());
        let index_used = u32::from_le_bytes(buf[32..36].try_into().unwrap());
        let index_space = u32::from_le_bytes(buf[36..40].try_into().unwrap());
        let index_count = u32::from_le_bytes(buf[40..44].try_into().unwrap());
        let mut kdf_salt = [0u8; KDF_SALT_LEN];
        kdf_salt.copy_from_slice(&buf[44..60]);

        Ok(Self {
            version,
            compression_id,
            encryption_id,
            hash_id,
            created_epoch_ms,
            last_update_epoch_ms,
            index_start,
            index_used,
            index_space,
            index_count,
            kdf_salt,
        })
    }

    /// Write this header at offset 0, sealing it if encryption is enabled.
    ///
    /// For encrypted files the on-disk layout is `kdf_salt (16 B, clear) ||
    /// sealed body (92 B)`; [`peek_kdf_salt`] reads the former before a key
    /// is available.
    pub fn write<F: Write + Seek>(
        &mut self,
        file: &mut F,
        now_ms: u64,
        key: Option<&[u8; 32]>,
    ) -> Result<(), HeaderError> {
        self.last_update_epoch_ms = now_ms;
        let plain = self.encode();

        file.seek(SeekFrom::Start(0))?;
        if self.encryption_id.is_enabled() {
            let key = key.expect("encryption enabled but no key supplied to Header::write");
            file.write_all(&self.kdf_salt)?;
            let sealed = cipher::seal(self.encryption_id, key, &plain)
                .map_err(|_| HeaderError::AuthFailure)?;
            file.write_all(&sealed)?;
        } else {
            file.write_all(&plain)?;
        }
        Ok(())
    }

    /// On-disk size of this header given its encryption state.
    pub fn on_disk_size(&self) -> usize {
        if self.encryption_id.is_enabled() {
            KDF_SALT_LEN + HEADER_SIZE + AEAD_PAD
        } else {
            HEADER_SIZE
        }
    }

    /// Read the cleartext `kdf_salt` prefix of an encrypted file without a
    /// key. Returns `None` for unencrypted files, where no prefix exists.
    pub fn peek_kdf_salt<F: Read + Seek>(
        file: &mut F,
        encryption_id: EncryptionId,
    ) -> Result<Option<[u8; KDF_SALT_LEN]>, HeaderError> {
        if !encryption_id.is_enabled() {
            return Ok(None);
        }
        file.seek(SeekFrom::Start(0))?;
        let mut salt = [0u8; KDF_SALT_LEN];
        file.read_exact(&mut salt)?;
        Ok(Some(salt))
    }

    /// Read the header from offset 0 (or, for encrypted files, from just past
    /// the cleartext `kdf_salt` prefix). `key` must already be derived — use
    /// [`peek_kdf_salt`] first when opening with a password.
    pub fn read<F: Read + Seek>(
        file: &mut F,
        encryption_id: EncryptionId,
        key: Option<&[u8; 32]>,
    ) -> Result<Self, HeaderError> {
        let plain_buf: [u8; HEADER_SIZE] = if encryption_id.is_enabled() {
            let key = key.expect("encryption enabled but no key supplied to Header::read");
            file.seek(SeekFrom::Start(KDF_SALT_LEN as u64))?;
            let mut sealed = vec![0u8; HEADER_SIZE + AEAD_PAD];
            file.read_exact(&mut sealed)?;
            let plain = cipher::open(encryption_id, key, &sealed).map_err(|_| HeaderError::AuthFailure)?;
            plain.try_into().map_err(|_| HeaderError::InvalidMagic)?
        } else {
            file.seek(SeekFrom::Start(0))?;
            let mut buf = [0u8; HEADER_SIZE];
            file.read_exact(&mut buf)?;
            buf
        };
        Self::decode(&plain_buf)
    }

    /// The three codec identities are frozen at creation; any mismatch with
    /// the opening configuration is a hard failure (§3 invariant 5).
    pub fn validate_compatibility(
        &self,
        compression_id: CompressionId,
        encryption_id: EncryptionId,
        hash_id: HashId,
    ) -> Result<(), HeaderError> {
        if self.compression_id != compression_id {
            return Err(HeaderError::ConfigMismatch { field: "compression_id" });
        }
        if self.encryption_id != encryption_id {
            return Err(HeaderError::ConfigMismatch { field: "encryption_id" });
        }
        if self.hash_id != hash_id {
            return Err(HeaderError::ConfigMismatch { field: "hash_id" });
        }
        Ok(())
    }
}

/// FNV-1a 32-bit, offset basis `0x811c9dc5`, prime `0x01000193`.
fn fnv1a32(data: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for &b in data {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_header() -> Header {
        Header::create(
            CompressionId::Zstd,
            EncryptionId::None,
            HashId::Blake3,
            1_700_000_000_000,
            [7u8; KDF_SALT_LEN],
        )
    }

    #[test]
    fn roundtrip_unencrypted() {
        let mut header = sample_header();
        header.index_used = 120;
        header.index_space = 256;
        header.index_count = 3;

        let mut buf = Cursor::new(Vec::new());
        header.write(&mut buf, 1_700_000_001_000, None).unwrap();
        buf.set_position(0);

        let read_back = Header::read(&mut buf, EncryptionId::None, None).unwrap();
        assert_eq!(read_back.compression_id, CompressionId::Zstd);
        assert_eq!(read_back.index_used, 120);
        assert_eq!(read_back.index_space, 256);
        assert_eq!(read_back.index_count, 3);
        assert_eq!(read_back.kdf_salt, [7u8; KDF_SALT_LEN]);
        assert_eq!(read_back.last_update_epoch_ms, 1_700_000_001_000);
    }

    #[test]
    fn roundtrip_encrypted() {
        let key = cipher::derive_key("hunter2hunter2", &[9u8; 16]).unwrap();
        let mut header = Header::create(
            CompressionId::None,
            EncryptionId::Aes256Gcm,
            HashId::Xxh3,
            1,
            [1u8; KDF_SALT_LEN],
        );

        let mut buf = Cursor::new(Vec::new());
        header.write(&mut buf, 2, Some(&key)).unwrap();
        assert_eq!(buf.get_ref().len(), header.on_disk_size());
        assert_eq!(buf.get_ref().len(), KDF_SALT_LEN + HEADER_SIZE + AEAD_PAD);

        let salt = Header::peek_kdf_salt(&mut buf, EncryptionId::Aes256Gcm)
            .unwrap()
            .unwrap();
        assert_eq!(salt, [1u8; KDF_SALT_LEN]);

        let read_back = Header::read(&mut buf, EncryptionId::Aes256Gcm, Some(&key)).unwrap();
        assert_eq!(read_back.encryption_id, EncryptionId::Aes256Gcm);
        assert_eq!(read_back.kdf_salt, [1u8; KDF_SALT_LEN]);
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let header = sample_header();
        let mut buf = Cursor::new(Vec::new());
        let mut h = header;
        h.write(&mut buf, 1, None).unwrap();
        let mut bytes = buf.into_inner();
        bytes[10] ^= 0xFF;
        let mut cursor = Cursor::new(bytes);
        let err = Header::read(&mut cursor, EncryptionId::None, None).unwrap_err();
        assert!(matches!(err, HeaderError::ChecksumMismatch));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(b"NOPE");
        let mut cursor = Cursor::new(bytes);
        let err = Header::read(&mut cursor, EncryptionId::None, None).unwrap_err();
        assert!(matches!(err, HeaderError::InvalidMagic));
    }

    #[test]
    fn config_mismatch_is_detected() {
        let header = sample_header();
        let err = header
            .validate_compatibility(CompressionId::None, EncryptionId::None, HashId::Blake3)
            .unwrap_err();
        assert!(matches!(err, HeaderError::ConfigMismatch { field: "compression_id" }));
    }
}
