//! Engine core (§4.6): orchestrates `set`/`get`/`delete`/batch/`flush`/`compact`
//! and owns the write lock, the read-protection lock, and the dirty/compacting
//! state bits.
//!
//! Grounded on the teacher's `archive.rs` high-level API (one struct owning a
//! writer, an index, and a recovery map) generalized from "pack a `.6cy`
//! archive" to "maintain one live key-value file," with concurrency borrowed
//! from `rskv`'s bitcask engine (`DashMap` index, `parking_lot` locks).

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::appender::BufferedAppender;
use crate::codec::cipher::{self, EncryptionId};
use crate::codec::hash::{self, HashId};
use crate::codec::{self, CompressionId};
use crate::error::{EngineError, Result};
use crate::flush_driver::{FlushDriver, WriteBufferTimer};
use crate::header::Header;
use crate::index::{self, IndexEntry, IndexMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileUpdateMode {
    Append,
    Replace,
}

impl Default for FileUpdateMode {
    fn default() -> Self {
        Self::Append
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub compression_id: CompressionId,
    pub encryption_id: EncryptionId,
    pub hash_id: HashId,
    pub encryption_key: Option<String>,
    pub max_key_length: usize,
    pub file_stream_buffer_kb: usize,
    pub write_buffer_enabled: bool,
    pub write_buffer_kb: usize,
    pub write_buffer_time_threshold_ms: u64,
    pub flush_interval_s: u64,
    pub file_update_mode: FileUpdateMode,
    pub auto_compact_enabled: bool,
    pub auto_compact_threshold: u8,
    pub index_rebuild_threshold: u8,
    pub update_validation_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            compression_id: CompressionId::None,
            encryption_id: EncryptionId::None,
            hash_id: HashId::Xxh3,
            encryption_key: None,
            max_key_length: 4096,
            file_stream_buffer_kb: 64,
            write_buffer_enabled: true,
            write_buffer_kb: 1024,
            write_buffer_time_threshold_ms: 5000,
            flush_interval_s: 5,
            file_update_mode: FileUpdateMode::Append,
            auto_compact_enabled: false,
            auto_compact_threshold: 50,
            index_rebuild_threshold: 20,
            update_validation_enabled: false,
        }
    }
}

impl EngineConfig {
    /// Clamp the floored fields and reject combinations that can never be
    /// served, per §6's "recognized options and their effects".
    pub fn validate(&mut self) -> Result<()> {
        if self.file_stream_buffer_kb < 4 {
            self.file_stream_buffer_kb = 4;
        }
        if self.write_buffer_kb < 4 {
            self.write_buffer_kb = 4;
        }
        if self.write_buffer_time_threshold_ms < 100 {
            self.write_buffer_time_threshold_ms = 100;
        }
        if self.index_rebuild_threshold > 100 {
            return Err(EngineError::InvalidConfig("index_rebuild_threshold must be 0-100"));
        }
        if self.encryption_id.is_enabled() {
            match &self.encryption_key {
                Some(k) if k.len() >= 16 => {}
                Some(_) => return Err(EngineError::InvalidConfig("encryption_key must be at least 16 characters")),
                None => return Err(EngineError::InvalidConfig("encryption_id set but no encryption_key provided")),
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Stats {
    pub count: usize,
    pub file_length: u64,
    pub index_used: u32,
    pub index_space: u32,
    pub compression_id: CompressionId,
    pub encryption_id: EncryptionId,
    pub hash_id: HashId,
    pub dirty: bool,
}

pub(crate) const AEAD_PAD: u64 = crate::codec::cipher::AEAD_PAD as u64;

pub struct Engine {
    pub(crate) path: PathBuf,
    pub(crate) config: EngineConfig,
    pub(crate) aead_key: Option<[u8; 32]>,
    pub(crate) header: Mutex<Header>,
    pub(crate) index: IndexMap,
    /// Removed keys awaiting an on-disk tombstone patch at next flush, with
    /// the on-disk position of their entry (-1 if never persisted, meaning
    /// the add and the delete happened in the same flush epoch).
    pub(crate) tombstones: Mutex<Vec<(Vec<u8>, i64)>>,
    pub(crate) appender: Mutex<BufferedAppender<File>>,
    pub(crate) write_lock: Mutex<()>,
    pub(crate) read_protect: Mutex<()>,
    pub(crate) compacting: AtomicBool,
    pub(crate) dirty: AtomicBool,
    /// Background durability timer (§4.6.7), `None` when `flush_interval_s`
    /// is 0. Holds only a `Weak` reference to `self`, so it never keeps the
    /// engine alive past its last external `Arc`.
    pub(crate) flush_driver: Mutex<Option<FlushDriver>>,
    /// Background buffer-flush timer (§4.3), `None` when write buffering is
    /// disabled. Same `Weak`-reference discipline as `flush_driver`.
    pub(crate) write_buffer_timer: Mutex<Option<WriteBufferTimer>>,
}

/// One item of a `set_batch` call after encoding, carrying what `set`'s
/// single-key rollback needs: the previous index entry, if any, to restore
/// on a validation failure.
struct PreparedItem {
    key: Vec<u8>,
    value: Vec<u8>,
    processed: Vec<u8>,
    value_hash: [u8; 8],
    previous: Option<IndexEntry>,
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}

impl Engine {
    /// Open (or create) the database file at `path`. The returned `Arc`
    /// lets the engine hand `Weak` references to its own background timers
    /// (§4.6.7, §4.3) without creating a reference cycle between itself and
    /// the threads it owns — an ordinary `self.clone()` into the timer
    /// closures would keep the engine alive for as long as the threads run,
    /// and the threads only stop when the engine (which owns them) drops.
    pub fn open(path: impl AsRef<Path>, mut config: EngineConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let existed = path.exists();

        let mut file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;

        let aead_key = if existed {
            let salt = Header::peek_kdf_salt(&mut file, config.encryption_id)?;
            match (config.encryption_id.is_enabled(), &config.encryption_key, salt) {
                (true, Some(pw), Some(salt)) => Some(cipher::derive_key(pw, &salt)?),
                (false, _, _) => None,
                _ => unreachable!("validate() already ensured a key is present when encryption is enabled"),
            }
        } else if config.encryption_id.is_enabled() {
            None // resolved below once the salt is freshly generated
        } else {
            None
        };

        let header = if existed {
            let header = Header::read(&mut file, config.encryption_id, aead_key.as_ref())?;
            header.validate_compatibility(config.compression_id, config.encryption_id, config.hash_id)?;
            header
        } else {
            let salt = if config.encryption_id.is_enabled() {
                cipher::random_salt()
            } else {
                [0u8; 16]
            };
            Header::create(config.compression_id, config.encryption_id, config.hash_id, now_ms(), salt)
        };

        // For a brand-new encrypted file the key couldn't be derived until
        // the salt existed; derive it now and persist the header sealed.
        let aead_key = if !existed && config.encryption_id.is_enabled() {
            Some(cipher::derive_key(config.encryption_key.as_ref().unwrap(), &header.kdf_salt)?)
        } else {
            aead_key
        };

        let mut header = header;
        if !existed {
            header.write(&mut file, now_ms(), aead_key.as_ref())?;
        }

        let index = if existed {
            index::load(&mut file, header.index_start, header.index_used, config.encryption_id, aead_key.as_ref(), config.hash_id)?
        } else {
            IndexMap::new()
        };

        let file_length = file.metadata()?.len();
        let appender = BufferedAppender::new(file, file_length, config.write_buffer_kb * 1024);

        let flush_interval_s = config.flush_interval_s;
        let write_buffer_enabled = config.write_buffer_enabled;
        let write_buffer_time_threshold_ms = config.write_buffer_time_threshold_ms;

        let engine = Arc::new(Self {
            path,
            config,
            aead_key,
            header: Mutex::new(header),
            index,
            tombstones: Mutex::new(Vec::new()),
            appender: Mutex::new(appender),
            write_lock: Mutex::new(()),
            read_protect: Mutex::new(()),
            compacting: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            flush_driver: Mutex::new(None),
            write_buffer_timer: Mutex::new(None),
        });

        if flush_interval_s > 0 {
            *engine.flush_driver.lock() = Some(FlushDriver::spawn(&engine, flush_interval_s));
        }
        if write_buffer_enabled {
            *engine.write_buffer_timer.lock() = Some(WriteBufferTimer::spawn(&engine, write_buffer_time_threshold_ms));
        }

        Ok(engine)
    }

    /// Stop the background timers and flush durably. Background timers are
    /// also stopped on drop, but `close` makes the shutdown deterministic
    /// instead of depending on when the last `Arc<Engine>` handle goes away.
    pub fn close(&self) -> Result<()> {
        if let Some(driver) = self.flush_driver.lock().take() {
            driver.stop();
        }
        if let Some(timer) = self.write_buffer_timer.lock().take() {
            timer.stop();
        }
        self.flush()
    }

    /// Flush just the buffered appender, without touching the index or
    /// header — the body of the background write-buffer timer (§4.3).
    pub(crate) fn flush_write_buffer(&self) -> Result<()> {
        self.appender.lock().flush()?;
        Ok(())
    }

    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.len() > self.config.max_key_length {
            return Err(EngineError::KeyTooLong { max: self.config.max_key_length, actual: key.len() });
        }
        let processed = codec::encode_value(value, self.config.compression_id, self.config.encryption_id, self.aead_key.as_ref())?;
        let value_hash = hash::value_hash(self.config.hash_id, &processed);

        let _guard = self.write_lock.lock();

        if let Some(existing) = self.index.get(key) {
            if existing.value_hash == value_hash {
                return Ok(());
            }
        }

        let previous = self.index.get(key).map(|e| e.clone());
        let existing_slot = previous.as_ref().filter(|e| !e.is_deleted).map(|e| (e.value_position, e.value_length));

        let mut appender = self.appender.lock();
        let (value_position, replace_backup) =
            if self.config.file_update_mode == FileUpdateMode::Replace {
                match existing_slot {
                    Some((pos, len)) if pos >= 0 && len as usize >= processed.len() => {
                        let backup = if self.config.update_validation_enabled {
                            Some(appender.read_at(pos as u64, len as usize)?)
                        } else {
                            None
                        };
                        appender.write_at(pos as u64, &processed)?;
                        (pos as u64, backup.map(|b| (pos as u64, b)))
                    }
                    _ => (appender.append(&processed)?, None),
                }
            } else {
                (appender.append(&processed)?, None)
            };
        drop(appender);

        let key_position = previous.as_ref().map(|e| e.key_position).unwrap_or(-1);
        let new_entry = IndexEntry {
            is_deleted: false,
            value_position: value_position as i64,
            value_length: processed.len() as u32,
            value_hash,
            timestamp_ms: now_ms(),
            is_updated: true,
            key_position,
        };
        self.index.insert(key.to_vec(), new_entry);

        if self.config.update_validation_enabled {
            self.validate_or_rollback(key, value, value_position, processed.len(), previous, replace_backup)?;
        }

        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// Re-read what was just written at `value_position` and compare it
    /// against `expected`. A mismatch — decode failure or simply different
    /// bytes — means the write didn't land as intended; roll the index back
    /// to `previous` (restoring `replace_backup`'s bytes first, if any) and
    /// report `ValidationFailure` rather than leaving a silently-wrong entry
    /// live (§4.6.5/§8 scenario 6).
    fn validate_or_rollback(
        &self,
        key: &[u8],
        expected: &[u8],
        value_position: u64,
        processed_len: usize,
        previous: Option<IndexEntry>,
        replace_backup: Option<(u64, Vec<u8>)>,
    ) -> Result<()> {
        let raw = {
            let mut appender = self.appender.lock();
            appender.read_at(value_position, processed_len)?
        };
        let matches = codec::decode_value(&raw, self.config.compression_id, self.config.encryption_id, self.aead_key.as_ref())
            .map(|roundtrip| roundtrip == expected)
            .unwrap_or(false);
        if matches {
            return Ok(());
        }

        if let Some((pos, bytes)) = replace_backup {
            self.appender.lock().write_at(pos, &bytes)?;
        }
        match previous {
            Some(p) => {
                self.index.insert(key.to_vec(), p);
            }
            None => {
                self.index.remove(key);
            }
        }
        Err(EngineError::ValidationFailure { key_len: key.len() })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let entry = match self.index.get(key) {
            Some(e) if !e.is_deleted => e.clone(),
            _ => return Ok(None),
        };

        let entry = if self.compacting.load(Ordering::Acquire) {
            let _rp = self.read_protect.lock();
            match self.index.get(key) {
                Some(e) if !e.is_deleted => e.clone(),
                _ => return Ok(None),
            }
        } else {
            entry
        };

        let raw = {
            let mut appender = self.appender.lock();
            appender.read_at(entry.value_position as u64, entry.value_length as usize)?
        };

        // A value whose on-disk bytes fail to decrypt/decompress is a
        // corrupt entry (§4.6.2 `CorruptEntry`) surfaced as "not found", not
        // as an error — the engine never crashes a read over one bad value.
        match codec::decode_value(&raw, self.config.compression_id, self.config.encryption_id, self.aead_key.as_ref()) {
            Ok(plain) => Ok(Some(plain)),
            Err(e) => {
                log::warn!("corrupt value for key ({} bytes): {e}", key.len());
                Ok(None)
            }
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.index.get(key).map(|e| !e.is_deleted).unwrap_or(false)
    }

    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let _guard = self.write_lock.lock();
        match self.index.remove(key) {
            Some((_, entry)) => {
                self.tombstones.lock().push((key.to_vec(), entry.key_position));
                self.dirty.store(true, Ordering::Release);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Batch write (§4.6.5): pre-serializes and hashes every item up front,
    /// partitions them into an in-place "reuse" group (replace-mode updates
    /// that fit in their existing slot) and an "append" group, preallocates
    /// the append group's total size once, and writes it as a single
    /// contiguous buffer through one `appender.append` call rather than one
    /// call per item. When `update_validation_enabled`, samples up to 10 of
    /// the written entries — read back concurrently, one thread per sample
    /// — and rolls the whole batch back if any sample fails to round-trip.
    pub fn set_batch(&self, items: &[(Vec<u8>, Vec<u8>)], skip_duplicates: bool) -> Result<usize> {
        let _guard = self.write_lock.lock();

        let mut seen = std::collections::HashSet::new();
        let mut prepared = Vec::with_capacity(items.len());
        for (key, value) in items {
            if key.len() > self.config.max_key_length {
                return Err(EngineError::KeyTooLong { max: self.config.max_key_length, actual: key.len() });
            }
            if skip_duplicates && !seen.insert(key.clone()) {
                continue;
            }
            let processed = codec::encode_value(value, self.config.compression_id, self.config.encryption_id, self.aead_key.as_ref())?;
            let value_hash = hash::value_hash(self.config.hash_id, &processed);
            if self.index.get(key).map(|e| e.value_hash == value_hash).unwrap_or(false) {
                continue; // identical bytes already stored; a true no-op
            }
            let previous = self.index.get(key).map(|e| e.clone());
            prepared.push(PreparedItem { key: key.clone(), value: value.clone(), processed, value_hash, previous });
        }

        if prepared.is_empty() {
            return Ok(0);
        }

        let mut reuse = Vec::new();
        let mut append_group = Vec::new();
        for item in prepared {
            let existing_slot = item.previous.as_ref().filter(|e| !e.is_deleted).map(|e| (e.value_position, e.value_length));
            match (self.config.file_update_mode, existing_slot) {
                (FileUpdateMode::Replace, Some((pos, len))) if pos >= 0 && len as usize >= item.processed.len() => {
                    reuse.push((item, pos as u64));
                }
                _ => append_group.push(item),
            }
        }

        let mut appender = self.appender.lock();

        let mut reuse_backups = Vec::with_capacity(if self.config.update_validation_enabled { reuse.len() } else { 0 });
        for (item, pos) in &reuse {
            if self.config.update_validation_enabled {
                reuse_backups.push((*pos, appender.read_at(*pos, item.processed.len())?));
            }
            appender.write_at(*pos, &item.processed)?;
        }

        let total_append_size: usize = append_group.iter().map(|i| i.processed.len()).sum();
        let mut append_positions = Vec::with_capacity(append_group.len());
        if total_append_size > 0 {
            appender.preallocate(total_append_size as u64)?;
            let mut buf = Vec::with_capacity(total_append_size);
            for item in &append_group {
                buf.extend_from_slice(&item.processed);
            }
            let start = appender.append(&buf)?;
            let mut offset = 0u64;
            for item in &append_group {
                append_positions.push(start + offset);
                offset += item.processed.len() as u64;
            }
        }
        drop(appender);

        let written: Vec<(PreparedItem, u64)> = reuse.into_iter().chain(append_group.into_iter().zip(append_positions)).collect();

        for (item, pos) in &written {
            let key_position = item.previous.as_ref().map(|e| e.key_position).unwrap_or(-1);
            self.index.insert(
                item.key.clone(),
                IndexEntry {
                    is_deleted: false,
                    value_position: *pos as i64,
                    value_length: item.processed.len() as u32,
                    value_hash: item.value_hash,
                    timestamp_ms: now_ms(),
                    is_updated: true,
                    key_position,
                },
            );
        }

        if self.config.update_validation_enabled {
            if let Err(e) = self.validate_batch_sample(&written) {
                for (pos, bytes) in &reuse_backups {
                    self.appender.lock().write_at(*pos, bytes)?;
                }
                for (item, _) in &written {
                    match &item.previous {
                        Some(p) => {
                            self.index.insert(item.key.clone(), p.clone());
                        }
                        None => {
                            self.index.remove(&item.key);
                        }
                    }
                }
                return Err(e);
            }
        }

        self.dirty.store(true, Ordering::Release);
        Ok(written.len())
    }

    /// Read back up to 10 of `written`'s entries concurrently (one thread
    /// per sample) and confirm each decodes to the value it was written
    /// with. Samples are spread evenly across the batch rather than just
    /// its head, so a batch-ending corruption isn't systematically missed.
    fn validate_batch_sample(&self, written: &[(PreparedItem, u64)]) -> Result<()> {
        let sample_count = written.len().min(10);
        let stride = written.len() / sample_count;
        let sample_indices: Vec<usize> = (0..sample_count).map(|i| i * stride).collect();

        std::thread::scope(|scope| {
            let handles: Vec<_> = sample_indices
                .iter()
                .map(|&i| {
                    let (item, pos) = &written[i];
                    scope.spawn(move || {
                        let raw = {
                            let mut appender = self.appender.lock();
                            appender.read_at(*pos, item.processed.len())
                        };
                        let raw = raw.map_err(EngineError::from)?;
                        let plain = codec::decode_value(&raw, self.config.compression_id, self.config.encryption_id, self.aead_key.as_ref())?;
                        if plain != item.value {
                            return Err(EngineError::ValidationFailure { key_len: item.key.len() });
                        }
                        Ok::<(), EngineError>(())
                    })
                })
                .collect();
            for handle in handles {
                handle.join().expect("validation sample thread panicked")?;
            }
            Ok(())
        })
    }

    pub fn delete_batch(&self, keys: &[Vec<u8>]) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let mut count = 0;
        for key in keys {
            if let Some((_, entry)) = self.index.remove(key.as_slice()) {
                self.tombstones.lock().push((key.clone(), entry.key_position));
                count += 1;
            }
        }
        if count > 0 {
            self.dirty.store(true, Ordering::Release);
        }
        Ok(count)
    }

    pub fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.index.clear();
        self.tombstones.lock().clear();

        let mut appender = self.appender.lock();
        let mut header = self.header.lock();
        let new_size = header.on_disk_size() as u64;
        appender.get_mut().set_len(new_size)?;
        appender.reset_file_length(new_size);

        header.index_start = new_size;
        header.index_used = 0;
        header.index_space = 0;
        header.index_count = 0;
        header.write(appender.get_mut(), now_ms(), self.aead_key.as_ref())?;

        self.dirty.store(false, Ordering::Release);
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.flush_locked()
    }

    /// Shared flush body — assumes the write lock is already held.
    pub(crate) fn flush_locked(&self) -> Result<()> {
        {
            let mut appender = self.appender.lock();
            appender.flush()?;
        }

        if !self.dirty.load(Ordering::Acquire) {
            return Ok(());
        }

        self.persist_index()?;

        let live_count = self.index.len() as u32;
        {
            let mut header = self.header.lock();
            header.index_count = live_count;
            let mut appender = self.appender.lock();
            header.write(appender.get_mut(), now_ms(), self.aead_key.as_ref())?;
            appender.get_mut().sync_all()?;
        }

        self.dirty.store(false, Ordering::Release);
        self.tombstones.lock().clear();

        if self.config.auto_compact_enabled && self.should_compact() {
            self.compact_locked(false)?;
        }
        Ok(())
    }

    /// Persist the index following the strategy rules in §4.5: new entries
    /// (tail append, falling back to full rebuild) first, then in-place
    /// patches, then tombstone patches. The header is updated by the caller.
    fn persist_index(&self) -> Result<()> {
        let new_entries: Vec<(Vec<u8>, IndexEntry)> = self
            .index
            .iter()
            .filter(|r| r.value().key_position < 0 && r.value().is_updated)
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        let patch_entries: Vec<(Vec<u8>, IndexEntry)> = self
            .index
            .iter()
            .filter(|r| r.value().key_position >= 0 && r.value().is_updated)
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();

        let total_live = self.index.len();
        let (mut header_snapshot, index_start, index_used, index_space) = {
            let h = self.header.lock();
            (h.clone(), h.index_start, h.index_used, h.index_space)
        };

        let rebuild_deletion_waste = {
            let tombstone_count = self.tombstones.lock().len();
            if index_used == 0 {
                0.0
            } else {
                tombstone_count as f64 * index::PLAIN_FIXED_SIZE as f64 / index_used as f64
            }
        };

        let force_rebuild = total_live < 10
            || self.config.index_rebuild_threshold == 0
            || rebuild_deletion_waste > self.config.index_rebuild_threshold as f64 / 100.0;

        let mut remaining_new = new_entries;

        if !force_rebuild && !remaining_new.is_empty() {
            let mut appender = self.appender.lock();
            let file = appender.get_mut();
            let outcome = index::tail_append(
                file,
                index_start,
                index_used,
                index_space,
                &remaining_new,
                self.config.encryption_id,
                self.aead_key.as_ref(),
                self.config.hash_id,
            )?;
            drop(appender);
            for (key, pos) in outcome.positions {
                if let Some(mut e) = self.index.get_mut(&key) {
                    e.key_position = pos as i64;
                    e.is_updated = false;
                }
            }
            header_snapshot.index_used = outcome.new_index_used;
            remaining_new = outcome.remaining;
        }

        if force_rebuild || !remaining_new.is_empty() {
            let all_live: Vec<(Vec<u8>, IndexEntry)> = self
                .index
                .iter()
                .map(|r| (r.key().clone(), r.value().clone()))
                .collect();
            let start_offset = {
                let mut appender = self.appender.lock();
                appender.flush()?;
                appender.current_end_position()
            };
            let mut appender = self.appender.lock();
            let file = appender.get_mut();
            let outcome = index::full_rebuild(
                file,
                start_offset,
                &all_live,
                self.config.encryption_id,
                self.aead_key.as_ref(),
                self.config.hash_id,
                self.config.index_rebuild_threshold,
            )?;
            appender.advance_file_length(outcome.index_space as u64);
            drop(appender);
            for (key, pos) in outcome.positions {
                if let Some(mut e) = self.index.get_mut(&key) {
                    e.key_position = pos as i64;
                    e.is_updated = false;
                }
            }
            header_snapshot.index_start = outcome.index_start;
            header_snapshot.index_used = outcome.index_used;
            header_snapshot.index_space = outcome.index_space;
        } else {
            for (key, entry) in &patch_entries {
                let mut appender = self.appender.lock();
                let file = appender.get_mut();
                index::in_place_patch(
                    file,
                    key,
                    entry.key_position as u64,
                    entry,
                    self.config.encryption_id,
                    self.aead_key.as_ref(),
                    self.config.hash_id,
                )?;
                drop(appender);
                if let Some(mut e) = self.index.get_mut(key) {
                    e.is_updated = false;
                }
            }
        }

        let tombstones: Vec<(Vec<u8>, i64)> = self.tombstones.lock().clone();
        for (_, key_position) in &tombstones {
            if *key_position >= 0 {
                let mut appender = self.appender.lock();
                let file = appender.get_mut();
                index::tombstone_patch(file, *key_position as u64)?;
            }
        }

        let mut header = self.header.lock();
        header.index_start = header_snapshot.index_start;
        header.index_used = header_snapshot.index_used;
        header.index_space = header_snapshot.index_space;
        Ok(())
    }

    pub fn compact(&self, all_compact: bool) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.compact_locked(all_compact)
    }

    fn compact_locked(&self, all_compact: bool) -> Result<()> {
        crate::compactor::perform_compact(self, all_compact)
    }

    fn should_compact(&self) -> bool {
        let header = self.header.lock();
        let file_length = self.appender.lock().file_length();
        let live_value_lengths: u64 = self.index.iter().map(|r| r.value().value_length as u64).sum();
        let aead_pad = if self.config.encryption_id.is_enabled() { AEAD_PAD } else { 0 };
        crate::compactor::should_compact(
            file_length,
            live_value_lengths,
            header.index_used as u64,
            header.on_disk_size() as u64,
            aead_pad,
            header.index_space as u64,
            self.config.auto_compact_threshold,
        )
    }

    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.index.iter().map(|r| r.key().clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.index.len()
    }

    pub fn stats(&self) -> Stats {
        let header = self.header.lock();
        Stats {
            count: self.index.len(),
            file_length: self.appender.lock().file_length(),
            index_used: header.index_used,
            index_space: header.index_space,
            compression_id: self.config.compression_id,
            encryption_id: self.config.encryption_id,
            hash_id: self.config.hash_id,
            dirty: self.dirty.load(Ordering::Acquire),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
