//! Compactor (§4.7): atomic file rewrite that produces a new value region and
//! a fresh contiguous index region, then swaps it in behind the
//! read-protection lock.
//!
//! Grounded on the teacher's rename-pair pattern from `archive.rs::finalize`
//! (write to a temp path, verify, then become the real file) generalized
//! into a full value-region rewrite rather than an in-place superblock patch.

use std::fs::OpenOptions;
use std::sync::atomic::Ordering;

use crate::appender::BufferedAppender;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::header::Header;
use crate::index::{self, IndexEntry};

/// `free_bytes = file_length − sum(live_value_lengths) − index_used −
/// header_size − aead_pad − (index_space − index_used)`, which reduces to
/// `file_length − sum(live_value_lengths) − index_space − header_size −
/// aead_pad`; kept unreduced here to mirror the spec text.
pub fn should_compact(
    file_length: u64,
    live_value_lengths: u64,
    index_used: u64,
    header_size: u64,
    aead_pad: u64,
    index_space: u64,
    auto_compact_threshold: u8,
) -> bool {
    let free_bytes = file_length as i64
        - live_value_lengths as i64
        - index_used as i64
        - header_size as i64
        - aead_pad as i64
        - (index_space as i64 - index_used as i64);
    let threshold_bytes = (auto_compact_threshold as i64 * file_length as i64) / 100;
    free_bytes > threshold_bytes
}

pub(crate) fn perform_compact(engine: &Engine, all_compact: bool) -> Result<()> {
    engine.compacting.store(true, Ordering::Release);
    let result = perform_compact_inner(engine, all_compact);
    engine.compacting.store(false, Ordering::Release);
    result
}

fn perform_compact_inner(engine: &Engine, all_compact: bool) -> Result<()> {
    {
        let mut appender = engine.appender.lock();
        appender.flush()?;
    }

    let temp_path = temp_path_for(&engine.path);
    let backup_path = backup_path_for(&engine.path);

    let mut temp_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;

    let old_header = engine.header.lock().clone();
    let placeholder = vec![0u8; old_header.on_disk_size()];
    {
        use std::io::{Seek, SeekFrom, Write};
        temp_file.seek(SeekFrom::Start(0))?;
        temp_file.write_all(&placeholder)?;
    }

    let mut live_entries: Vec<(Vec<u8>, IndexEntry)> = engine
        .index
        .iter()
        .map(|r| (r.key().clone(), r.value().clone()))
        .collect();
    live_entries.sort_by_key(|(_, e)| e.value_position);

    let mut cursor = old_header.on_disk_size() as u64;
    let mut copied: Vec<(Vec<u8>, IndexEntry)> = Vec::with_capacity(live_entries.len());
    {
        let mut appender = engine.appender.lock();
        for (key, mut entry) in live_entries {
            let raw = match appender.read_at(entry.value_position as u64, entry.value_length as usize) {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::error!("compaction: failed to read value for a key, dropping it: {e}");
                    continue;
                }
            };
            {
                use std::io::{Seek, SeekFrom, Write};
                temp_file.seek(SeekFrom::Start(cursor))?;
                temp_file.write_all(&raw)?;
            }
            entry.value_position = cursor as i64;
            entry.key_position = -1;
            entry.is_updated = true;
            cursor += raw.len() as u64;
            copied.push((key, entry));
        }
    }

    let index_rebuild_threshold = if all_compact { 0 } else { engine.config.index_rebuild_threshold };
    let rebuild = index::full_rebuild(
        &mut temp_file,
        cursor,
        &copied,
        engine.config.encryption_id,
        engine.aead_key.as_ref(),
        engine.config.hash_id,
        index_rebuild_threshold,
    )?;

    for (key, pos) in &rebuild.positions {
        if let Some(entry) = copied.iter_mut().find(|(k, _)| k == key).map(|(_, e)| e) {
            entry.key_position = *pos as i64;
        }
    }

    let mut new_header = Header::create(
        engine.config.compression_id,
        engine.config.encryption_id,
        engine.config.hash_id,
        old_header.created_epoch_ms,
        old_header.kdf_salt,
    );
    new_header.index_start = rebuild.index_start;
    new_header.index_used = rebuild.index_used;
    new_header.index_space = rebuild.index_space;
    new_header.index_count = copied.len() as u32;

    new_header.write(&mut temp_file, crate::engine::now_ms(), engine.aead_key.as_ref())?;
    temp_file.sync_all()?;

    {
        use std::io::{Seek, SeekFrom};
        temp_file.seek(SeekFrom::Start(0))?;
    }
    let reread = Header::read(&mut temp_file, engine.config.encryption_id, engine.aead_key.as_ref())
        .map_err(|e| EngineError::CompactVerifyFailure(e.to_string()))?;
    if reread.index_start != new_header.index_start
        || reread.index_used != new_header.index_used
        || reread.index_space != new_header.index_space
        || reread.index_count != new_header.index_count
    {
        return Err(EngineError::CompactVerifyFailure("rebuilt header did not round-trip".into()));
    }

    {
        let _rp = engine.read_protect.lock();
        let swap_result = (|| -> std::io::Result<()> {
            std::fs::rename(&engine.path, &backup_path)?;
            if let Err(e) = std::fs::rename(&temp_path, &engine.path) {
                // best-effort restore; surface the rename failure, not this one
                let _ = std::fs::rename(&backup_path, &engine.path);
                return Err(e);
            }
            Ok(())
        })();
        swap_result?;

        let new_file = OpenOptions::new().read(true).write(true).open(&engine.path)?;
        let new_file_length = new_file.metadata()?.len();

        *engine.header.lock() = new_header;
        let mut appender = engine.appender.lock();
        *appender = BufferedAppender::new(new_file, new_file_length, engine.config.write_buffer_kb * 1024);
        drop(appender);

        engine.index.clear();
        for (key, entry) in copied {
            engine.index.insert(key, entry);
        }
        engine.tombstones.lock().clear();
        engine.dirty.store(false, Ordering::Release);
    }

    let _ = std::fs::remove_file(&backup_path);
    let _ = std::fs::remove_file(&temp_path);

    Ok(())
}

fn temp_path_for(path: &std::path::Path) -> std::path::PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".compact.tmp");
    std::path::PathBuf::from(s)
}

fn backup_path_for(path: &std::path::Path) -> std::path::PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".backup");
    std::path::PathBuf::from(s)
}
