use fskv::{CompressionId, Engine, EngineConfig, EncryptionId, FileUpdateMode, HashId};
use std::collections::HashMap;

fn config() -> EngineConfig {
    EngineConfig::default()
}

fn db_path(dir: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
    dir.path().join(name)
}

// ── end-to-end scenario 1 ───────────────────────────────────────────────────

#[test]
fn basic_set_get_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir, "db.fskv");

    {
        let engine = Engine::open(&path, config()).unwrap();
        engine.set(b"alpha", b"one").unwrap();
        engine.set(b"beta", b"two").unwrap();
        engine.flush().unwrap();
    }

    let engine = Engine::open(&path, config()).unwrap();
    assert_eq!(engine.get(b"alpha").unwrap().as_deref(), Some(b"one".as_slice()));
    assert_eq!(engine.get(b"beta").unwrap().as_deref(), Some(b"two".as_slice()));
    assert_eq!(engine.count(), 2);
}

// ── end-to-end scenario 2 ───────────────────────────────────────────────────

#[test]
fn encrypted_reopen_with_right_and_wrong_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir, "secret.fskv");

    let right_key = "MySecure32ByteEncryptionKey12345".to_string();
    let mut cfg = config();
    cfg.encryption_id = EncryptionId::Aes256Gcm;
    cfg.encryption_key = Some(right_key.clone());

    {
        let engine = Engine::open(&path, cfg.clone()).unwrap();
        engine.set(b"k", b"v").unwrap();
        engine.flush().unwrap();
    }

    let engine = Engine::open(&path, cfg.clone()).unwrap();
    assert_eq!(engine.get(b"k").unwrap().as_deref(), Some(b"v".as_slice()));
    drop(engine);

    let mut wrong_cfg = cfg;
    wrong_cfg.encryption_key = Some("ADifferent32ByteEncryptionKey123".to_string());
    let err = Engine::open(&path, wrong_cfg).unwrap_err();
    assert!(matches!(err, fskv::EngineError::Header(_)));
}

// ── end-to-end scenario 3 ───────────────────────────────────────────────────

#[test]
fn replace_mode_reuses_the_same_slot() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir, "replace.fskv");

    let mut cfg = config();
    cfg.file_update_mode = FileUpdateMode::Replace;
    let engine = Engine::open(&path, cfg).unwrap();

    engine.set(b"k", b"AAAA").unwrap();
    let pos_after_first = engine.stats().file_length;
    engine.set(b"k", b"BBBB").unwrap();
    engine.flush().unwrap();

    assert_eq!(engine.stats().file_length, pos_after_first);
    assert_eq!(engine.get(b"k").unwrap().as_deref(), Some(b"BBBB".as_slice()));
}

// ── end-to-end scenario 4 (shrunk for test speed: 2,000 keys, not 100,000) ──

#[test]
fn delete_half_then_compact_reclaims_space() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir, "compact.fskv");
    let engine = Engine::open(&path, config()).unwrap();

    for i in 0..2000 {
        let key = format!("k{i}");
        let value = format!("v{i}");
        engine.set(key.as_bytes(), value.as_bytes()).unwrap();
    }
    for i in (0..2000).step_by(2) {
        engine.delete(format!("k{i}").as_bytes()).unwrap();
    }
    engine.flush().unwrap();
    assert_eq!(engine.count(), 1000);

    let length_before = engine.stats().file_length;
    engine.compact(false).unwrap();
    let length_after = engine.stats().file_length;

    assert!(length_after <= length_before);
    assert_eq!(engine.count(), 1000);
    assert_eq!(engine.get(b"k1").unwrap().as_deref(), Some(b"v1".as_slice()));
    assert_eq!(engine.get(b"k0").unwrap(), None);
    for i in (1..2000).step_by(2) {
        let key = format!("k{i}");
        let expected = format!("v{i}");
        assert_eq!(engine.get(key.as_bytes()).unwrap().as_deref(), Some(expected.as_bytes()));
    }
}

// ── end-to-end scenario 5 ───────────────────────────────────────────────────

#[test]
fn batch_insert_reopen_and_sample() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir, "batch.fskv");

    let items: Vec<(Vec<u8>, Vec<u8>)> = (0..2000)
        .map(|i| (format!("key-{i}").into_bytes(), format!("value-{i}").into_bytes()))
        .collect();

    {
        let engine = Engine::open(&path, config()).unwrap();
        let inserted = engine.set_batch(&items, false).unwrap();
        assert_eq!(inserted, 2000);
        engine.flush().unwrap();
    }

    let engine = Engine::open(&path, config()).unwrap();
    assert_eq!(engine.count(), 2000);
    for i in (0..2000).step_by(20) {
        let key = format!("key-{i}");
        let expected = format!("value-{i}");
        assert_eq!(engine.get(key.as_bytes()).unwrap().as_deref(), Some(expected.as_bytes()));
    }
}

// ── end-to-end scenario 6 ───────────────────────────────────────────────────
//
// The rollback mechanics themselves (a sample that doesn't round-trip
// restores the prior value/backup bytes) are exercised directly against the
// internal `validate_or_rollback`/`validate_batch_sample` seams in
// `src/engine.rs`'s own `#[cfg(test)]` module — there's no window in the
// public API to inject a mismatch between a write and its own synchronous
// validation read-back, since by the time an external caller could read the
// file, any "corruption" would just be read back as ground truth. What's
// left to cover from out here is that validation being enabled doesn't
// change behavior on the non-corrupted path, and that a genuinely corrupt
// on-disk value is reported as missing rather than as an error (§4.6.2).

#[test]
fn validated_writes_round_trip_normally() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir, "validate.fskv");

    let mut cfg = config();
    cfg.update_validation_enabled = true;
    cfg.file_update_mode = FileUpdateMode::Replace;
    let engine = Engine::open(&path, cfg).unwrap();

    engine.set(b"k", b"original").unwrap();
    engine.flush().unwrap();
    assert_eq!(engine.get(b"k").unwrap().as_deref(), Some(b"original".as_slice()));

    // A same-size overwrite goes through the validated reuse path and must
    // still read back correctly.
    engine.set(b"k", b"replaced").unwrap();
    assert_eq!(engine.get(b"k").unwrap().as_deref(), Some(b"replaced".as_slice()));

    let items: Vec<(Vec<u8>, Vec<u8>)> = (0..30).map(|i| (format!("b{i}").into_bytes(), format!("v{i}").into_bytes())).collect();
    assert_eq!(engine.set_batch(&items, false).unwrap(), 30);
    for i in 0..30 {
        let expected = format!("v{i}");
        assert_eq!(engine.get(format!("b{i}").as_bytes()).unwrap().as_deref(), Some(expected.as_bytes()));
    }
}

#[test]
fn corrupted_value_bytes_are_reported_as_not_found() {
    use std::io::{Read, Seek, SeekFrom, Write};

    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir, "corrupt.fskv");

    let mut cfg = config();
    cfg.compression_id = CompressionId::Zstd;
    let engine = Engine::open(&path, cfg).unwrap();
    engine.set(b"k", b"a value long enough for zstd to build real frame bytes around it").unwrap();
    engine.flush().unwrap();
    drop(engine);

    // Flip a byte inside the value region, past the 64-byte header, without
    // going through the crate's own API.
    let mut file = std::fs::OpenOptions::new().read(true).write(true).open(&path).unwrap();
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(64)).unwrap();
    file.read_exact(&mut byte).unwrap();
    byte[0] ^= 0xFF;
    file.seek(SeekFrom::Start(64)).unwrap();
    file.write_all(&byte).unwrap();
    drop(file);

    let reopened = Engine::open(&path, config_zstd()).unwrap();
    assert_eq!(reopened.get(b"k").unwrap(), None);
}

fn config_zstd() -> EngineConfig {
    let mut cfg = config();
    cfg.compression_id = CompressionId::Zstd;
    cfg
}

// ── universal invariants (§8) ────────────────────────────────────────────────

#[test]
fn invariant_set_then_get_after_flush() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(db_path(&dir, "a.fskv"), config()).unwrap();
    engine.set(b"k", b"v").unwrap();
    engine.flush().unwrap();
    assert_eq!(engine.get(b"k").unwrap().as_deref(), Some(b"v".as_slice()));
}

#[test]
fn invariant_last_write_wins() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(db_path(&dir, "a.fskv"), config()).unwrap();
    engine.set(b"k", b"v1").unwrap();
    engine.set(b"k", b"v2").unwrap();
    engine.flush().unwrap();
    assert_eq!(engine.get(b"k").unwrap().as_deref(), Some(b"v2".as_slice()));
}

#[test]
fn invariant_delete_then_flush_is_gone() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(db_path(&dir, "a.fskv"), config()).unwrap();
    engine.set(b"k", b"v").unwrap();
    engine.delete(b"k").unwrap();
    engine.flush().unwrap();
    assert_eq!(engine.get(b"k").unwrap(), None);
    assert!(!engine.contains(b"k"));
}

#[test]
fn invariant_count_matches_distinct_live_keys() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(db_path(&dir, "a.fskv"), config()).unwrap();
    engine.set(b"a", b"1").unwrap();
    engine.set(b"b", b"2").unwrap();
    engine.set(b"a", b"3").unwrap();
    engine.delete(b"b").unwrap();
    assert_eq!(engine.count(), 1);
}

#[test]
fn invariant_reopen_matches_last_flush() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir, "a.fskv");
    {
        let engine = Engine::open(&path, config()).unwrap();
        engine.set(b"a", b"1").unwrap();
        engine.set(b"b", b"2").unwrap();
        engine.delete(b"b").unwrap();
        engine.flush().unwrap();
    }
    let engine = Engine::open(&path, config()).unwrap();
    assert_eq!(engine.get(b"a").unwrap().as_deref(), Some(b"1".as_slice()));
    assert_eq!(engine.get(b"b").unwrap(), None);
    assert_eq!(engine.count(), 1);
}

#[test]
fn invariant_compact_then_reopen_matches_live_set() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir, "a.fskv");
    let engine = Engine::open(&path, config()).unwrap();
    for i in 0..50 {
        engine.set(format!("k{i}").as_bytes(), format!("v{i}").as_bytes()).unwrap();
    }
    engine.delete(b"k0").unwrap();
    engine.flush().unwrap();
    engine.compact(true).unwrap();
    drop(engine);

    let engine = Engine::open(&path, config()).unwrap();
    assert_eq!(engine.count(), 49);
    assert_eq!(engine.get(b"k0").unwrap(), None);
    assert_eq!(engine.get(b"k1").unwrap().as_deref(), Some(b"v1".as_slice()));
}

#[test]
fn invariant_flush_idempotent_when_clean() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(db_path(&dir, "a.fskv"), config()).unwrap();
    engine.set(b"k", b"v").unwrap();
    engine.flush().unwrap();
    let file_length = engine.stats().file_length;
    engine.flush().unwrap();
    assert_eq!(engine.stats().file_length, file_length);
    assert!(!engine.stats().dirty);
}

#[test]
fn invariant_file_length_grows_until_compact() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(db_path(&dir, "a.fskv"), config()).unwrap();
    let mut last = engine.stats().file_length;
    for i in 0..100 {
        engine.set(format!("k{i}").as_bytes(), b"value").unwrap();
        engine.flush().unwrap();
        let now = engine.stats().file_length;
        assert!(now >= last);
        last = now;
    }
    for i in 0..90 {
        engine.delete(format!("k{i}").as_bytes()).unwrap();
    }
    engine.flush().unwrap();
    let before_compact = engine.stats().file_length;
    engine.compact(false).unwrap();
    assert!(engine.stats().file_length <= before_compact);
}

// ── boundary behaviors (§8) ──────────────────────────────────────────────────

#[test]
fn config_mismatch_on_reopen_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir, "a.fskv");
    {
        let engine = Engine::open(&path, config()).unwrap();
        engine.set(b"k", b"v").unwrap();
        engine.flush().unwrap();
    }
    let mut mismatched = config();
    mismatched.compression_id = CompressionId::Zstd;
    let err = Engine::open(&path, mismatched).unwrap_err();
    assert!(matches!(err, fskv::EngineError::Header(_)));
}

#[test]
fn key_at_max_length_accepted_one_over_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config();
    cfg.max_key_length = 16;
    let engine = Engine::open(db_path(&dir, "a.fskv"), cfg).unwrap();

    let exact = vec![b'k'; 16];
    assert!(engine.set(&exact, b"v").is_ok());

    let over = vec![b'k'; 17];
    assert!(matches!(engine.set(&over, b"v"), Err(fskv::EngineError::KeyTooLong { .. })));
}

#[test]
fn append_mode_value_position_strictly_increases() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config();
    cfg.file_update_mode = FileUpdateMode::Append;
    let engine = Engine::open(db_path(&dir, "a.fskv"), cfg).unwrap();

    engine.set(b"k", b"AAAA").unwrap();
    let first_length = engine.stats().file_length;
    engine.set(b"k", b"BBBB").unwrap();
    let second_length = engine.stats().file_length;
    assert!(second_length > first_length);
}

#[test]
fn clear_drops_file_to_header_size_and_rebuilds_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(db_path(&dir, "a.fskv"), config()).unwrap();
    engine.set(b"k", b"v").unwrap();
    engine.flush().unwrap();

    engine.clear().unwrap();
    assert_eq!(engine.count(), 0);

    engine.set(b"k2", b"v2").unwrap();
    engine.flush().unwrap();
    assert_eq!(engine.get(b"k2").unwrap().as_deref(), Some(b"v2".as_slice()));
    assert_eq!(engine.count(), 1);
}

#[test]
fn auto_compact_triggers_during_flush_past_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config();
    cfg.auto_compact_enabled = true;
    cfg.auto_compact_threshold = 10;
    let engine = Engine::open(db_path(&dir, "a.fskv"), cfg).unwrap();

    for i in 0..200 {
        engine.set(format!("k{i}").as_bytes(), b"some moderately sized value").unwrap();
    }
    engine.flush().unwrap();
    for i in 0..190 {
        engine.delete(format!("k{i}").as_bytes()).unwrap();
    }
    let before = engine.stats().file_length;
    engine.flush().unwrap();
    let after = engine.stats().file_length;
    assert!(after <= before);
    assert_eq!(engine.count(), 10);
}

// ── oracle-style check against a reference HashMap ──────────────────────────

#[test]
fn matches_reference_hashmap_over_a_mixed_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(db_path(&dir, "a.fskv"), config()).unwrap();
    let mut oracle: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();

    let ops: Vec<(&str, &str, &str)> = vec![
        ("set", "a", "1"),
        ("set", "b", "2"),
        ("del", "a", ""),
        ("set", "a", "3"),
        ("set", "c", "4"),
        ("del", "b", ""),
    ];
    for (op, k, v) in ops {
        match op {
            "set" => {
                engine.set(k.as_bytes(), v.as_bytes()).unwrap();
                oracle.insert(k.as_bytes().to_vec(), v.as_bytes().to_vec());
            }
            "del" => {
                engine.delete(k.as_bytes()).unwrap();
                oracle.remove(k.as_bytes());
            }
            _ => unreachable!(),
        }
    }
    engine.flush().unwrap();

    assert_eq!(engine.count(), oracle.len());
    for (k, v) in &oracle {
        assert_eq!(engine.get(k).unwrap().as_deref(), Some(v.as_slice()));
    }
}
