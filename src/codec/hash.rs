//! Hash identities used for the stored `value_hash` integrity stamp.
//!
//! `value_hash` on disk is always 8 bytes (§4.1): XXH3-64 of the processed
//! bytes directly when `hash_id == Xxh3`, otherwise XXH3-64 of the configured
//! hash's own digest. This reduction is intentional — see SPEC_FULL.md §11c —
//! and is documented here rather than hidden, the way the teacher crate
//! documents its BLAKE3-as-CAS-key choice in `block.rs`.

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest as Sha2Digest, Sha256, Sha384, Sha512};
use sha3::Sha3_384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HashId {
    Md5     = 0,
    Sha1    = 1,
    Sha256  = 2,
    Sha3_384 = 3,
    Sha384  = 4,
    Sha512  = 5,
    Blake3  = 6,
    Xxh3    = 7,
    Xxh128  = 8,
}

impl HashId {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Md5),
            1 => Some(Self::Sha1),
            2 => Some(Self::Sha256),
            3 => Some(Self::Sha3_384),
            4 => Some(Self::Sha384),
            5 => Some(Self::Sha512),
            6 => Some(Self::Blake3),
            7 => Some(Self::Xxh3),
            8 => Some(Self::Xxh128),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Full digest of `data` under the configured algorithm.
pub fn digest(id: HashId, data: &[u8]) -> Vec<u8> {
    match id {
        HashId::Md5 => Md5::digest(data).to_vec(),
        HashId::Sha1 => Sha1::digest(data).to_vec(),
        HashId::Sha256 => Sha256::digest(data).to_vec(),
        HashId::Sha3_384 => Sha3_384::digest(data).to_vec(),
        HashId::Sha384 => Sha384::digest(data).to_vec(),
        HashId::Sha512 => Sha512::digest(data).to_vec(),
        HashId::Blake3 => blake3::hash(data).as_bytes().to_vec(),
        HashId::Xxh3 => xxhash_rust::xxh3::xxh3_64(data).to_le_bytes().to_vec(),
        HashId::Xxh128 => xxhash_rust::xxh3::xxh3_128(data).to_le_bytes().to_vec(),
    }
}

/// The 8-byte `value_hash` stamped into every index entry.
pub fn value_hash(id: HashId, data: &[u8]) -> [u8; 8] {
    if id == HashId::Xxh3 {
        xxhash_rust::xxh3::xxh3_64(data).to_le_bytes()
    } else {
        let d = digest(id, data);
        xxhash_rust::xxh3::xxh3_64(&d).to_le_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_hash_is_always_eight_bytes_and_deterministic() {
        for id in [
            HashId::Md5,
            HashId::Sha1,
            HashId::Sha256,
            HashId::Sha3_384,
            HashId::Sha384,
            HashId::Sha512,
            HashId::Blake3,
            HashId::Xxh3,
            HashId::Xxh128,
        ] {
            let a = value_hash(id, b"some value bytes");
            let b = value_hash(id, b"some value bytes");
            assert_eq!(a, b);
            let c = value_hash(id, b"different value bytes");
            assert_ne!(a, c);
        }
    }

    #[test]
    fn xxh3_value_hash_matches_direct_xxh3() {
        let direct = xxhash_rust::xxh3::xxh3_64(b"abc").to_le_bytes();
        assert_eq!(value_hash(HashId::Xxh3, b"abc"), direct);
    }
}
