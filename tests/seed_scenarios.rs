//! End-to-end seed scenarios exercising `Engine` and the registration
//! pipeline together rather than any single module in isolation.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use bgate::classify::Classification;
use bgate::db::IndexStore;
use bgate::hash::{fringe_digest, full_digest};
use bgate::log_sink::{NullSink, SharedLogSink};
use bgate::register::{register_unique, RegisterOutcome};
use bgate::{DedupeResult, Engine, EngineConfig};

fn write(dir: &std::path::Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn engine_in(tmp: &tempfile::TempDir) -> Engine {
    let config = EngineConfig::new(tmp.path().join("dedupe.db"));
    Engine::open_with_sink(config, Arc::new(NullSink)).unwrap()
}

/// A small xorshift generator so tests can produce large, non-repeating
/// content deterministically without depending on an RNG crate.
fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state & 0xff) as u8
        })
        .collect()
}

/// Scenario 1: a size collision that resolves to a genuine duplicate.
#[test]
fn three_files_two_unique_one_duplicate() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_in(&tmp);

    let a = write(tmp.path(), "a.txt", &b"A".repeat(100));
    let b = write(tmp.path(), "b.txt", &b"B".repeat(200));
    let c = write(tmp.path(), "c.txt", &b"A".repeat(100));

    let ra = engine.process_path(&a);
    let rb = engine.process_path(&b);
    let rc = engine.process_path(&c);

    assert_eq!(ra.result, DedupeResult::Unique);
    assert_eq!(ra.tier, 1);
    assert_eq!(rb.result, DedupeResult::Unique);
    assert_eq!(rb.tier, 1);
    assert_eq!(rc.result, DedupeResult::Duplicate);
    assert_eq!(rc.duplicate_of, Some(a));

    let stats = engine.stats().unwrap();
    assert_eq!(stats.unique_sizes, 2);
    assert_eq!(stats.full_entries, 2);
}

/// Scenario 2: same size, different content, stops at the fringe tier.
#[test]
fn same_size_different_content_is_unique_past_tier_one() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_in(&tmp);

    let a = write(tmp.path(), "a.txt", &b"A".repeat(100));
    let b = write(tmp.path(), "b.txt", &b"B".repeat(100));

    let ra = engine.process_path(&a);
    let rb = engine.process_path(&b);

    assert_eq!(ra.result, DedupeResult::Unique);
    assert_eq!(ra.tier, 1);
    assert_eq!(rb.result, DedupeResult::Unique);
    assert!(rb.tier >= 2);
}

/// Scenario 3: large identical files only resolved at the full-digest tier.
#[test]
fn large_identical_files_resolve_at_tier_three() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_in(&tmp);

    let content = pseudo_random_bytes(3 * 256 * 1024, 0xC0FF_EE01);
    let a = write(tmp.path(), "a.bin", &content);
    let b = write(tmp.path(), "b.bin", &content);

    let ra = engine.process_path(&a);
    let rb = engine.process_path(&b);

    assert_eq!(ra.result, DedupeResult::Unique);
    assert_eq!(ra.tier, 1);
    assert_eq!(rb.result, DedupeResult::Duplicate);
    assert_eq!(rb.tier, 3);
}

/// Scenario 4: with a content store configured, a unique file is relocated
/// into the shard layout and a subsequent identical-content candidate stays
/// at its own source path, classified as a duplicate of the relocated file.
#[test]
fn content_store_relocation_then_subsequent_duplicate_stays_put() {
    let tmp = tempfile::tempdir().unwrap();
    let store_root = tmp.path().join("store");
    fs::create_dir(&store_root).unwrap();
    let config = EngineConfig::new(tmp.path().join("dedupe.db")).with_content_store(&store_root);
    let engine = Engine::open_with_sink(config, Arc::new(NullSink)).unwrap();

    let src = write(tmp.path(), "a.txt", b"hello");
    let first = engine.process_path(&src);
    assert_eq!(first.result, DedupeResult::Unique);
    assert!(!src.exists());
    assert!(first.path.starts_with(&store_root));

    let src2 = write(tmp.path(), "b.txt", b"hello");
    let second = engine.process_path(&src2);
    assert_eq!(second.result, DedupeResult::Duplicate);
    assert_eq!(second.duplicate_of, Some(first.path));
    assert!(src2.exists());
}

/// Scenario 5: a conflict discovered at phase 3 (another registration
/// already holds this full digest) is resolved by the duplicate-conflict
/// compensator — the candidate is moved back to its original path, the
/// original journal row ends in `failed`, the compensating row ends in
/// `completed`, and no journal rows are left pending.
#[test]
fn phase_three_conflict_is_resolved_by_the_compensator() {
    let tmp = tempfile::tempdir().unwrap();
    let store_root = tmp.path().join("store");
    fs::create_dir(&store_root).unwrap();
    let store = IndexStore::open_in_memory().unwrap();
    let sink: SharedLogSink = Arc::new(NullSink);

    let original = write(tmp.path(), "incoming.bin", b"conflict content");
    let file_size = fs::metadata(&original).unwrap().len();
    let full = full_digest(&original).unwrap();
    let fringe = fringe_digest(&original).unwrap();

    // Simulate a registration that already committed this digest, as if a
    // concurrent process (or a crashed-then-recovered candidate) won the
    // race between this candidate's classification and its phase-3 insert.
    store.add_size(file_size).unwrap();
    store.add_fringe(&fringe, file_size, "/already/registered").unwrap();
    store.add_full(&full, "/already/registered", None).unwrap();

    let classification = Classification::Unique {
        tier: 3,
        file_size,
        fringe_digest: Some(fringe),
        full_digest: Some(full),
    };
    let emergency_log_path = tmp.path().join("emergency_orphans.jsonl");

    let outcome = register_unique(
        &store,
        &original,
        &classification,
        Some(&store_root),
        &emergency_log_path,
        &sink,
    )
    .unwrap();

    match outcome {
        RegisterOutcome::Duplicate { stored_path, tier } => {
            assert_eq!(stored_path, PathBuf::from("/already/registered"));
            assert_eq!(tier, 3);
        }
        other => panic!("expected the compensator to report a duplicate, got {other:?}"),
    }

    assert!(original.exists());
    assert_eq!(fs::read(&original).unwrap(), b"conflict content");
    assert_eq!(store.pending_journal_count().unwrap(), 0);
}

/// Scenario 6: an emergency-orphan log with one valid and one malformed
/// line — the valid line becomes an orphan-registry row on engine open,
/// and the malformed line survives the crash-safe rewrite.
#[test]
fn emergency_log_import_preserves_the_malformed_line() {
    let tmp = tempfile::tempdir().unwrap();
    let db_path = tmp.path().join("dedupe.db");
    let emergency_log_path = tmp.path().join("emergency_orphans.jsonl");

    let orphan_file = write(tmp.path(), "orphan.bin", b"leftover");
    let original_path = tmp.path().join("original.bin");

    let valid_line = format!(
        r#"{{"timestamp":"2024-01-01T00:00:00Z","original_path":"{}","orphan_path":"{}","file_size":8}}"#,
        original_path.display(),
        orphan_file.display(),
    );
    let malformed_line = "{not valid json";
    fs::write(&emergency_log_path, format!("{valid_line}\n{malformed_line}\n")).unwrap();

    let config = EngineConfig::new(db_path);
    let engine = Engine::open_with_sink(config, Arc::new(NullSink)).unwrap();

    let orphans = engine.list_orphans().unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].orphan_path, orphan_file.to_string_lossy());

    let remaining = fs::read_to_string(&emergency_log_path).unwrap();
    assert_eq!(remaining.trim(), malformed_line);
}
