//! AEAD cipher identities: `{None, AES-256-GCM, ChaCha20-Poly1305}`.
//!
//! Sealed payload layout is always `nonce (12 B) || ciphertext || tag (16 B)`
//! — the teacher crate's `crypto::encrypt`/`crypto::decrypt` layout, extended
//! with a second AEAD so the header's `encryption_id` has somewhere to point
//! besides AES. Key derivation is Argon2id exactly as in the teacher's
//! `derive_key`, just salted with this format's `kdf_salt` instead of an
//! archive UUID (see SPEC_FULL.md §11d).

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng};
use aes_gcm::Aes256Gcm;
use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::ChaCha20Poly1305;

use super::CodecError;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const AEAD_PAD: usize = NONCE_LEN + TAG_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EncryptionId {
    None            = 0,
    Aes256Gcm       = 1,
    ChaCha20Poly1305 = 2,
}

impl EncryptionId {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Aes256Gcm),
            2 => Some(Self::ChaCha20Poly1305),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_enabled(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// A fresh random salt for a newly-created file's `kdf_salt` field.
pub fn random_salt() -> [u8; 16] {
    let mut salt = [0u8; 16];
    AeadOsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit key from a password with Argon2id, salted per-file.
///
/// Mirrors the teacher's conservative parameters (64 MiB, 3 passes, 1 lane).
pub fn derive_key(password: &str, salt: &[u8]) -> Result<[u8; 32], CodecError> {
    let params = Params::new(64 * 1024, 3, 1, Some(32))
        .map_err(|e| CodecError::Encryption(format!("argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = [0u8; 32];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| CodecError::Encryption(format!("key derivation failed: {e}")))?;
    Ok(key)
}

/// Seal `plaintext`, returning `nonce || ciphertext || tag`.
pub fn seal(id: EncryptionId, key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
    match id {
        EncryptionId::None => Ok(plaintext.to_vec()),
        EncryptionId::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key)
                .map_err(|_| CodecError::Encryption("bad AES-256-GCM key length".into()))?;
            let nonce = Aes256Gcm::generate_nonce(&mut AeadOsRng);
            let ciphertext = cipher
                .encrypt(&nonce, plaintext)
                .map_err(|_| CodecError::Encryption("AES-256-GCM seal failed".into()))?;
            let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
            out.extend_from_slice(nonce.as_slice());
            out.extend_from_slice(&ciphertext);
            Ok(out)
        }
        EncryptionId::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new_from_slice(key)
                .map_err(|_| CodecError::Encryption("bad ChaCha20-Poly1305 key length".into()))?;
            let nonce = ChaCha20Poly1305::generate_nonce(&mut AeadOsRng);
            let ciphertext = cipher
                .encrypt(&nonce, plaintext)
                .map_err(|_| CodecError::Encryption("ChaCha20-Poly1305 seal failed".into()))?;
            let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
            out.extend_from_slice(nonce.as_slice());
            out.extend_from_slice(&ciphertext);
            Ok(out)
        }
    }
}

/// Open a payload produced by [`seal`].
pub fn open(id: EncryptionId, key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>, CodecError> {
    match id {
        EncryptionId::None => Ok(data.to_vec()),
        EncryptionId::Aes256Gcm => {
            if data.len() < NONCE_LEN {
                return Err(CodecError::AuthFailure);
            }
            let cipher = Aes256Gcm::new_from_slice(key)
                .map_err(|_| CodecError::AuthFailure)?;
            let nonce = aes_gcm::Nonce::from_slice(&data[..NONCE_LEN]);
            cipher
                .decrypt(nonce, &data[NONCE_LEN..])
                .map_err(|_| CodecError::AuthFailure)
        }
        EncryptionId::ChaCha20Poly1305 => {
            if data.len() < NONCE_LEN {
                return Err(CodecError::AuthFailure);
            }
            let cipher = ChaCha20Poly1305::new_from_slice(key)
                .map_err(|_| CodecError::AuthFailure)?;
            let nonce = chacha20poly1305::Nonce::from_slice(&data[..NONCE_LEN]);
            cipher
                .decrypt(nonce, &data[NONCE_LEN..])
                .map_err(|_| CodecError::AuthFailure)
        }
    }
}
