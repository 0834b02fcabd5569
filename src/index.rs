//! Primary index: the in-memory concurrent map (§4.4) and its on-disk
//! persistence strategies (§4.5).
//!
//! ```text
//! Plaintext entry (40 B fixed + key bytes):
//! Offset  Size  Field
//!    0      4   magic = "IDXE"
//!    4      1   is_deleted
//!    5      4   key_length
//!    9      8   value_position   (-1 as i64 little-endian => unassigned)
//!   17      4   value_length
//!   21      8   value_hash
//!   29      8   timestamp_ms
//!   37      3   reserved
//!   40      N   key bytes
//!
//! Encrypted envelope (20 B fixed + sealed payload):
//! Offset  Size  Field
//!    0      4   magic = "IDXE"
//!    4      1   is_deleted
//!    5      8   hash            value_hash of the sealed payload
//!   13      4   length          sealed payload length
//!   17      3   reserved
//!   20      L   sealed payload  AEAD-sealed (40 B fixed entry ++ key bytes)
//! ```
//!
//! `is_deleted` lives at byte offset 4 in *both* forms, which is what makes
//! the tombstone patch (flip one byte, leave the rest of the entry — sealed
//! payload included — untouched) work without knowing which form is in play.

use std::io::{self, Read, Seek, SeekFrom, Write};

use dashmap::DashMap;
use thiserror::Error;

use crate::codec::cipher::{self, EncryptionId};
use crate::codec::hash::{self, HashId};
use crate::codec::CodecError;

pub const ENTRY_MAGIC: &[u8; 4] = b"IDXE";
pub const PLAIN_FIXED_SIZE: usize = 40;
pub const ENCRYPTED_ENVELOPE_SIZE: usize = 20;
pub const MIN_GROWTH_PAD_BYTES: usize = 256;
/// Sanity clamp for a scanned key length — not a protocol limit, just a guard
/// against treating garbage bytes as a plausible entry during recovery scans.
const MAX_PLAUSIBLE_KEY_LEN: usize = 1 << 20;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("corrupt index entry at offset {offset}: {reason}")]
    CorruptEntry { offset: u64, reason: String },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub is_deleted: bool,
    pub value_position: i64,
    pub value_length: u32,
    pub value_hash: [u8; 8],
    pub timestamp_ms: u64,
    /// Dirty flag: touched since the last successful flush.
    pub is_updated: bool,
    /// File-absolute offset of this entry's on-disk record, or -1 if it has
    /// never been persisted (only ever true for brand-new entries).
    pub key_position: i64,
}

impl IndexEntry {
    pub fn new(value_position: u64, value_length: u32, value_hash: [u8; 8], timestamp_ms: u64) -> Self {
        Self {
            is_deleted: false,
            value_position: value_position as i64,
            value_length,
            value_hash,
            timestamp_ms,
            is_updated: true,
            key_position: -1,
        }
    }
}

pub type IndexMap = DashMap<Vec<u8>, IndexEntry>;

fn encode_plain_fixed(key_len: u32, entry: &IndexEntry) -> [u8; PLAIN_FIXED_SIZE] {
    let mut buf = [0u8; PLAIN_FIXED_SIZE];
    buf[0..4].copy_from_slice(ENTRY_MAGIC);
    buf[4] = entry.is_deleted as u8;
    buf[5..9].copy_from_slice(&key_len.to_le_bytes());
    buf[9..17].copy_from_slice(&entry.value_position.to_le_bytes());
    buf[17..21].copy_from_slice(&entry.value_length.to_le_bytes());
    buf[21..29].copy_from_slice(&entry.value_hash);
    buf[29..37].copy_from_slice(&entry.timestamp_ms.to_le_bytes());
    buf
}

fn encode_plain_entry(key: &[u8], entry: &IndexEntry) -> Vec<u8> {
    let mut out = encode_plain_fixed(key.len() as u32, entry).to_vec();
    out.extend_from_slice(key);
    out
}

fn encode_encrypted_entry(
    key: &[u8],
    entry: &IndexEntry,
    encryption_id: EncryptionId,
    aead_key: &[u8; 32],
    hash_id: HashId,
) -> Result<Vec<u8>, IndexError> {
    let plaintext = encode_plain_entry(key, entry);
    let sealed = cipher::seal(encryption_id, aead_key, &plaintext)?;
    let value_hash8 = hash::value_hash(hash_id, &sealed);

    let mut envelope = Vec::with_capacity(ENCRYPTED_ENVELOPE_SIZE + sealed.len());
    envelope.extend_from_slice(ENTRY_MAGIC);
    envelope.push(entry.is_deleted as u8);
    envelope.extend_from_slice(&value_hash8);
    envelope.extend_from_slice(&(sealed.len() as u32).to_le_bytes());
    envelope.extend_from_slice(&[0u8; 3]);
    envelope.extend_from_slice(&sealed);
    Ok(envelope)
}

/// Parse a plaintext entry at `buf[at..]`. Returns `(bytes consumed, key, entry)`.
fn parse_plain_at(buf: &[u8], at: usize) -> Result<(usize, Vec<u8>, IndexEntry), String> {
    if at + PLAIN_FIXED_SIZE > buf.len() {
        return Err("truncated fixed entry".into());
    }
    let fixed: &[u8; PLAIN_FIXED_SIZE] = buf[at..at + PLAIN_FIXED_SIZE].try_into().unwrap();
    let is_deleted = fixed[4] != 0;
    let key_length = u32::from_le_bytes(fixed[5..9].try_into().unwrap()) as usize;
    if key_length > MAX_PLAUSIBLE_KEY_LEN {
        return Err(format!("implausible key_length {key_length}"));
    }
    let value_position = i64::from_le_bytes(fixed[9..17].try_into().unwrap());
    let value_length = u32::from_le_bytes(fixed[17..21].try_into().unwrap());
    let mut value_hash = [0u8; 8];
    value_hash.copy_from_slice(&fixed[21..29]);
    let timestamp_ms = u64::from_le_bytes(fixed[29..37].try_into().unwrap());

    let total = PLAIN_FIXED_SIZE + key_length;
    if at + total > buf.len() {
        return Err("key bytes run past end of index region".into());
    }
    let key = buf[at + PLAIN_FIXED_SIZE..at + total].to_vec();

    Ok((
        total,
        key,
        IndexEntry {
            is_deleted,
            value_position,
            value_length,
            value_hash,
            timestamp_ms,
            is_updated: false,
            key_position: -1,
        },
    ))
}

/// Parse an encrypted envelope at `buf[at..]`. The returned `is_deleted`
/// comes from the envelope, not the sealed plaintext — a tombstone patch
/// only ever rewrites the envelope byte.
fn parse_encrypted_at(
    buf: &[u8],
    at: usize,
    encryption_id: EncryptionId,
    aead_key: &[u8; 32],
    hash_id: HashId,
) -> Result<(usize, Vec<u8>, IndexEntry), String> {
    if at + ENCRYPTED_ENVELOPE_SIZE > buf.len() {
        return Err("truncated envelope".into());
    }
    let is_deleted = buf[at + 4] != 0;
    let mut stored_hash = [0u8; 8];
    stored_hash.copy_from_slice(&buf[at + 5..at + 13]);
    let length = u32::from_le_bytes(buf[at + 13..at + 17].try_into().unwrap()) as usize;
    if length > MAX_PLAUSIBLE_KEY_LEN + PLAIN_FIXED_SIZE + 64 {
        return Err(format!("implausible sealed payload length {length}"));
    }
    let sealed_start = at + ENCRYPTED_ENVELOPE_SIZE;
    if sealed_start + length > buf.len() {
        return Err("sealed payload runs past end of index region".into());
    }
    let sealed = &buf[sealed_start..sealed_start + length];
    if hash::value_hash(hash_id, sealed) != stored_hash {
        return Err("envelope hash mismatch".into());
    }
    let plaintext = cipher::open(encryption_id, aead_key, sealed).map_err(|e| e.to_string())?;
    if plaintext.len() < PLAIN_FIXED_SIZE {
        return Err("sealed plaintext shorter than fixed entry".into());
    }
    let (_, key, mut entry) = parse_plain_at(&plaintext, 0)?;
    entry.is_deleted = is_deleted;
    Ok((ENCRYPTED_ENVELOPE_SIZE + length, key, entry))
}

/// Load `[index_start, index_start + index_used)` into a fresh concurrent map.
///
/// Scans for the `"IDXE"` magic byte-by-byte (§4.5 "Loading at open"),
/// accepting only entries that parse cleanly, are live, and have an assigned
/// `value_position`. Duplicate keys resolve to the last valid occurrence,
/// which falls out naturally from scanning in ascending file order and
/// overwriting the map on each hit.
pub fn load<F: Read + Seek>(
    file: &mut F,
    index_start: u64,
    index_used: u32,
    encryption_id: EncryptionId,
    key: Option<&[u8; 32]>,
    hash_id: HashId,
) -> Result<IndexMap, IndexError> {
    let map = IndexMap::new();
    if index_used == 0 {
        return Ok(map);
    }
    file.seek(SeekFrom::Start(index_start))?;
    let mut buf = vec![0u8; index_used as usize];
    file.read_exact(&mut buf)?;

    let mut cursor = 0usize;
    while cursor + 4 <= buf.len() {
        if &buf[cursor..cursor + 4] != ENTRY_MAGIC {
            cursor += 1;
            continue;
        }
        let parsed = if encryption_id.is_enabled() {
            parse_encrypted_at(&buf, cursor, encryption_id, key.expect("encryption enabled but no key"), hash_id)
        } else {
            parse_plain_at(&buf, cursor)
        };
        match parsed {
            Ok((consumed, parsed_key, mut entry)) => {
                if !entry.is_deleted && entry.value_position > 0 {
                    entry.key_position = (index_start + cursor as u64) as i64;
                    entry.is_updated = false;
                    map.insert(parsed_key, entry);
                }
                cursor += consumed.max(1);
            }
            Err(reason) => {
                log::warn!("skipping corrupt index entry at offset {}: {reason}", index_start + cursor as u64);
                cursor += 1;
            }
        }
    }
    Ok(map)
}

fn growth_pad_size(entry_count: usize, used_bytes: usize, index_rebuild_threshold: u8) -> usize {
    if entry_count < 10 || index_rebuild_threshold == 0 {
        return 0;
    }
    let raw = used_bytes * index_rebuild_threshold as usize / 100;
    raw.max(MIN_GROWTH_PAD_BYTES)
}

pub struct RebuildOutcome {
    pub index_start: u64,
    pub index_used: u32,
    pub index_space: u32,
    /// New `key_position` for every persisted entry, keyed by its key bytes.
    pub positions: Vec<(Vec<u8>, u64)>,
}

/// Strategy 1: full rebuild. Serializes every live entry sequentially
/// starting at `start_offset`, appends a growth pad, and returns the new
/// index region bounds.
pub fn full_rebuild<F: Write + Seek>(
    file: &mut F,
    start_offset: u64,
    entries: &[(Vec<u8>, IndexEntry)],
    encryption_id: EncryptionId,
    aead_key: Option<&[u8; 32]>,
    hash_id: HashId,
    index_rebuild_threshold: u8,
) -> Result<RebuildOutcome, IndexError> {
    let mut payload = Vec::new();
    let mut positions = Vec::with_capacity(entries.len());
    for (k, e) in entries {
        let pos = start_offset + payload.len() as u64;
        let encoded = if encryption_id.is_enabled() {
            encode_encrypted_entry(k, e, encryption_id, aead_key.expect("encryption enabled but no key"), hash_id)?
        } else {
            encode_plain_entry(k, e)
        };
        positions.push((k.clone(), pos));
        payload.extend_from_slice(&encoded);
    }
    let used = payload.len();
    let pad = growth_pad_size(entries.len(), used, index_rebuild_threshold);
    payload.resize(used + pad, 0u8);

    file.seek(SeekFrom::Start(start_offset))?;
    file.write_all(&payload)?;

    Ok(RebuildOutcome {
        index_start: start_offset,
        index_used: used as u32,
        index_space: (used + pad) as u32,
        positions,
    })
}

pub struct TailAppendOutcome {
    pub new_index_used: u32,
    pub positions: Vec<(Vec<u8>, u64)>,
    /// Entries that didn't fit in the remaining pad — caller should fall
    /// back to a full rebuild for these.
    pub remaining: Vec<(Vec<u8>, IndexEntry)>,
}

/// Strategy 2: tail append. Writes brand-new, never-persisted entries into
/// the growth pad, switching to "doesn't fit" the moment the pad runs out.
pub fn tail_append<F: Write + Seek>(
    file: &mut F,
    index_start: u64,
    index_used: u32,
    index_space: u32,
    entries: &[(Vec<u8>, IndexEntry)],
    encryption_id: EncryptionId,
    aead_key: Option<&[u8; 32]>,
    hash_id: HashId,
) -> Result<TailAppendOutcome, IndexError> {
    let mut offset = index_used as u64;
    let mut buf = Vec::new();
    let mut positions = Vec::new();
    let mut i = 0;
    while i < entries.len() {
        let (k, e) = &entries[i];
        let encoded = if encryption_id.is_enabled() {
            encode_encrypted_entry(k, e, encryption_id, aead_key.expect("encryption enabled but no key"), hash_id)?
        } else {
            encode_plain_entry(k, e)
        };
        if offset + buf.len() as u64 + encoded.len() as u64 > index_space as u64 {
            break;
        }
        positions.push((k.clone(), index_start + offset + buf.len() as u64));
        buf.extend_from_slice(&encoded);
        i += 1;
    }
    if !buf.is_empty() {
        file.seek(SeekFrom::Start(index_start + offset))?;
        file.write_all(&buf)?;
        offset += buf.len() as u64;
    }
    Ok(TailAppendOutcome {
        new_index_used: offset as u32,
        positions,
        remaining: entries[i..].to_vec(),
    })
}

/// Strategy 3: in-place patch. For plaintext entries this rewrites only the
/// 40-byte fixed header — the key bytes are untouched since key length never
/// changes for an existing entry. Encrypted entries have no granular update
/// path (the AEAD tag covers the whole sealed blob), so the full envelope and
/// payload are regenerated; the sealed length is unchanged since the
/// plaintext it covers is the same size as before.
pub fn in_place_patch<F: Write + Seek>(
    file: &mut F,
    key: &[u8],
    key_position: u64,
    entry: &IndexEntry,
    encryption_id: EncryptionId,
    aead_key: Option<&[u8; 32]>,
    hash_id: HashId,
) -> Result<(), IndexError> {
    file.seek(SeekFrom::Start(key_position))?;
    if encryption_id.is_enabled() {
        let encoded = encode_encrypted_entry(key, entry, encryption_id, aead_key.expect("encryption enabled but no key"), hash_id)?;
        file.write_all(&encoded)?;
    } else {
        let fixed = encode_plain_fixed(key.len() as u32, entry);
        file.write_all(&fixed)?;
    }
    Ok(())
}

/// Strategy 4: tombstone patch. `is_deleted` sits at byte offset 4 in both
/// on-disk forms, so a single one-byte write retires an entry regardless of
/// whether encryption is enabled.
pub fn tombstone_patch<F: Write + Seek>(file: &mut F, key_position: u64) -> Result<(), IndexError> {
    file.seek(SeekFrom::Start(key_position + 4))?;
    file.write_all(&[1u8])?;
    Ok(())
}
