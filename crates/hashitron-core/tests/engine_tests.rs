//! Integration tests: HashiTronEngine through its public API.
//!
//! These exercise the full put -> WAL -> data file -> index pipeline,
//! transactions across threads, and recovery across reopen.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use hashitron_core::{
    BucketHasher, Config, HashiError, HashiTronEngine, RecoveryMode, RollbackMode, SyncMode,
    TransactionState,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fast_config() -> Config {
    Config { sync_mode: SyncMode::Flush, ..Config::default() }
}

fn open(dir: &TempDir, config: Config) -> HashiTronEngine {
    HashiTronEngine::open(dir.path().join("kvstore.data"), dir.path().join("kvstore.log"), config)
        .unwrap()
}

fn read_log(dir: &TempDir) -> String {
    std::fs::read_to_string(dir.path().join("kvstore.log")).unwrap()
}

// ---------------------------------------------------------------------------
// Basic operations
// ---------------------------------------------------------------------------

#[test]
fn test_demo_session() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir, Config::default());

    let mut txn = engine.begin().unwrap();
    txn.put(b"foo", b"Hello, World!").unwrap();
    txn.put(b"bar", b"Rust is fun.").unwrap();
    txn.commit().unwrap();

    assert_eq!(engine.get(b"foo").unwrap(), Some(b"Hello, World!".to_vec()));
    assert_eq!(engine.get(b"bar").unwrap(), Some(b"Rust is fun.".to_vec()));

    let mut txn = engine.begin().unwrap();
    assert!(txn.delete(b"foo").unwrap());
    txn.rollback().unwrap();

    // Marker-only rollback: the delete stays applied.
    assert_eq!(engine.get(b"foo").unwrap(), None);
    engine.close().unwrap();

    assert_eq!(
        read_log(&dir),
        "BEGIN\nPUT foo Hello, World!\nPUT bar Rust is fun.\nCOMMIT\nBEGIN\nDELETE foo\nROLLBACK\n"
    );
    // Two slots of 64 + 256 bytes.
    assert_eq!(std::fs::metadata(dir.path().join("kvstore.data")).unwrap().len(), 640);
}

#[test]
fn test_get_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir, fast_config());
    engine.put(b"k", b"v").unwrap();

    let log_before = read_log(&dir);
    for _ in 0..3 {
        assert_eq!(engine.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(engine.get(b"missing").unwrap(), None);
    }
    assert_eq!(read_log(&dir), log_before);
    assert_eq!(engine.len(), 1);
}

#[test]
fn test_update_keeps_one_entry() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir, fast_config());
    engine.put(b"k", b"v1").unwrap();
    engine.put(b"k", b"v2").unwrap();

    assert_eq!(engine.get(b"k").unwrap(), Some(b"v2".to_vec()));
    let stats = engine.stats().unwrap();
    assert_eq!(stats.keys, 1);
    assert_eq!(stats.max_chain_len, 1);
    assert_eq!(stats.data_records, 2);
}

#[test]
fn test_delete_twice() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir, fast_config());
    engine.put(b"k", b"v").unwrap();
    assert!(engine.delete(b"k").unwrap());
    assert!(!engine.delete(b"k").unwrap());
    assert_eq!(engine.get(b"k").unwrap(), None);
}

#[test]
fn test_values_with_spaces_and_escapes_survive() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open(&dir, fast_config());
        engine.put(b"my key", b"50% off\nnext line").unwrap();
    }
    let engine = open(&dir, fast_config());
    assert_eq!(engine.get(b"my key").unwrap(), Some(b"50% off\nnext line".to_vec()));
}

#[test]
fn test_bucket_collisions() {
    let dir = TempDir::new().unwrap();
    let config = Config { bucket_count: 1, ..fast_config() };
    let engine = open(&dir, config);

    for i in 0..20 {
        engine.put(format!("key{}", i).as_bytes(), format!("val{}", i).as_bytes()).unwrap();
    }
    assert_eq!(engine.stats().unwrap().max_chain_len, 20);

    assert!(engine.delete(b"key7").unwrap());
    for i in 0..20 {
        let expected = if i == 7 { None } else { Some(format!("val{}", i).into_bytes()) };
        assert_eq!(engine.get(format!("key{}", i).as_bytes()).unwrap(), expected);
    }
}

#[test]
fn test_crc32c_hasher() {
    let dir = TempDir::new().unwrap();
    let config = Config { hasher: BucketHasher::Crc32c, ..fast_config() };
    {
        let engine = open(&dir, config.clone());
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
    }
    let engine = open(&dir, config);
    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));
}

// ---------------------------------------------------------------------------
// Write ordering
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
#[test]
fn test_wal_precedes_data_file() {
    // /dev/full accepts the open and fails every write.
    if !std::path::Path::new("/dev/full").exists() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let config = Config { recovery: RecoveryMode::Disabled, ..fast_config() };
    let engine =
        HashiTronEngine::open("/dev/full", dir.path().join("kvstore.log"), config).unwrap();

    let err = engine.put(b"foo", b"bar").unwrap_err();
    assert!(matches!(err, HashiError::Io { .. }));

    // The intent stays; ABORT records that no slot was written for it.
    assert_eq!(read_log(&dir), "PUT foo bar\nABORT\n");
    assert_eq!(engine.get(b"foo").unwrap(), None);
    assert!(engine.is_empty());
}

#[test]
fn test_aborted_put_replays_as_live_state() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open(&dir, fast_config());
        engine.put(b"a", b"1").unwrap();
    }
    // Same files as a failed `put(a, 1)`, then `delete(a)`, then a `put(a, 1)`
    // that landed in the only slot.
    std::fs::write(dir.path().join("kvstore.log"), "PUT a 1\nABORT\nDELETE a\nPUT a 1\n").unwrap();

    let engine = open(&dir, fast_config());
    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
    let recovery = engine.stats().unwrap().recovery;
    assert_eq!(recovery.aborted_puts, 1);
    assert_eq!(recovery.applied_puts, 1);
}

#[test]
fn test_put_without_slot_skipped_on_recovery() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open(&dir, fast_config());
        engine.put(b"kept", b"1").unwrap();
    }
    // A PUT intent whose data append never happened.
    let mut log = read_log(&dir);
    log.push_str("PUT lost 2\n");
    std::fs::write(dir.path().join("kvstore.log"), log).unwrap();

    let engine = open(&dir, fast_config());
    assert_eq!(engine.get(b"kept").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get(b"lost").unwrap(), None);
    assert_eq!(engine.stats().unwrap().recovery.skipped_puts, 1);
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

#[test]
fn test_transaction_serializes_writers() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir, fast_config());
    let first_committed = &AtomicBool::new(false);
    let (started_tx, started_rx) = mpsc::channel();

    thread::scope(|s| {
        let engine = &engine;
        s.spawn(move || {
            let mut txn = engine.begin().unwrap();
            txn.put(b"owner", b"first").unwrap();
            started_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(100));
            first_committed.store(true, Ordering::SeqCst);
            txn.commit().unwrap();
        });

        started_rx.recv().unwrap();
        assert_eq!(engine.transaction_state(), TransactionState::Active);
        // Reads do not wait on the open transaction.
        assert_eq!(engine.get(b"owner").unwrap(), Some(b"first".to_vec()));

        let mut txn = engine.begin().unwrap();
        assert!(first_committed.load(Ordering::SeqCst));
        txn.put(b"owner", b"second").unwrap();
        txn.commit().unwrap();
    });

    assert_eq!(engine.get(b"owner").unwrap(), Some(b"second".to_vec()));
    assert_eq!(engine.transaction_state(), TransactionState::Idle);
    assert_eq!(
        read_log(&dir),
        "BEGIN\nPUT owner first\nCOMMIT\nBEGIN\nPUT owner second\nCOMMIT\n"
    );
}

#[test]
fn test_auto_commit_waits_for_transaction() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir, fast_config());
    let (started_tx, started_rx) = mpsc::channel();

    thread::scope(|s| {
        let engine = &engine;
        s.spawn(move || {
            let mut txn = engine.begin().unwrap();
            txn.put(b"a", b"1").unwrap();
            started_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(50));
            txn.put(b"b", b"2").unwrap();
            txn.commit().unwrap();
        });

        started_rx.recv().unwrap();
        engine.put(b"c", b"3").unwrap();
    });

    assert_eq!(read_log(&dir), "BEGIN\nPUT a 1\nPUT b 2\nCOMMIT\nPUT c 3\n");
}

#[test]
fn test_marker_only_rollback_keeps_writes() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir, fast_config());
    engine.put(b"a", b"old").unwrap();

    let mut txn = engine.begin().unwrap();
    txn.put(b"a", b"new").unwrap();
    txn.put(b"b", b"fresh").unwrap();
    assert_eq!(txn.pending_undo(), 0);
    txn.rollback().unwrap();

    assert_eq!(engine.get(b"a").unwrap(), Some(b"new".to_vec()));
    assert_eq!(engine.get(b"b").unwrap(), Some(b"fresh".to_vec()));
}

#[test]
fn test_undo_rollback_reverts_writes() {
    let dir = TempDir::new().unwrap();
    let config = Config { rollback: RollbackMode::Undo, ..fast_config() };
    {
        let engine = open(&dir, config.clone());
        engine.put(b"a", b"old").unwrap();

        let mut txn = engine.begin().unwrap();
        txn.put(b"a", b"new").unwrap();
        txn.put(b"b", b"fresh").unwrap();
        assert!(txn.delete(b"a").unwrap());
        assert_eq!(txn.get(b"a").unwrap(), None);
        assert_eq!(txn.pending_undo(), 3);
        txn.rollback().unwrap();

        assert_eq!(engine.get(b"a").unwrap(), Some(b"old".to_vec()));
        assert_eq!(engine.get(b"b").unwrap(), None);
        engine.close().unwrap();
    }
    assert_eq!(
        read_log(&dir),
        "PUT a old\nBEGIN\nPUT a new\nPUT b fresh\nDELETE a\nPUT a new\nDELETE b\nPUT a old\nROLLBACK\n"
    );

    // Compensations replay like any other entry.
    let engine = open(&dir, config);
    assert_eq!(engine.get(b"a").unwrap(), Some(b"old".to_vec()));
    assert_eq!(engine.get(b"b").unwrap(), None);
}

#[test]
fn test_dropped_transaction_rolls_back() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir, fast_config());
    {
        let mut txn = engine.begin().unwrap();
        txn.put(b"k", b"v").unwrap();
    }
    assert_eq!(engine.transaction_state(), TransactionState::Idle);
    assert_eq!(read_log(&dir), "BEGIN\nPUT k v\nROLLBACK\n");
    // The section was released.
    engine.put(b"after", b"drop").unwrap();
}

#[test]
fn test_reentrant_begin_rejected() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir, fast_config());
    let mut txn = engine.begin().unwrap();

    assert!(matches!(engine.begin(), Err(HashiError::InvalidTransactionState(_))));
    assert!(matches!(engine.put(b"k", b"v"), Err(HashiError::InvalidTransactionState(_))));
    assert!(matches!(engine.delete(b"k"), Err(HashiError::InvalidTransactionState(_))));

    txn.put(b"k", b"v").unwrap();
    txn.commit().unwrap();
    engine.put(b"k", b"w").unwrap();
    assert_eq!(engine.get(b"k").unwrap(), Some(b"w".to_vec()));
}

#[test]
fn test_begin_timeout() {
    let dir = TempDir::new().unwrap();
    let config = Config { begin_timeout: Some(Duration::from_millis(50)), ..fast_config() };
    let engine = open(&dir, config);
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    thread::scope(|s| {
        let engine = &engine;
        s.spawn(move || {
            let txn = engine.begin().unwrap();
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            txn.commit().unwrap();
        });

        started_rx.recv().unwrap();
        match engine.begin() {
            Err(HashiError::TransactionTimeout { waited }) => {
                assert_eq!(waited, Duration::from_millis(50));
            }
            Err(other) => panic!("expected TransactionTimeout, got {:?}", other),
            Ok(_) => panic!("expected TransactionTimeout, got a transaction"),
        }
        release_tx.send(()).unwrap();
    });

    let txn = engine.begin().unwrap();
    txn.commit().unwrap();
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

#[test]
fn test_crashed_transaction_discarded_on_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open(&dir, fast_config());
        engine.put(b"a", b"old").unwrap();
        let mut txn = engine.begin().unwrap();
        txn.put(b"a", b"new").unwrap();
        txn.put(b"b", b"fresh").unwrap();
        // Crash: no marker, no rollback on drop.
        std::mem::forget(txn);
    }

    {
        let engine = open(&dir, fast_config());
        assert_eq!(engine.get(b"a").unwrap(), Some(b"old".to_vec()));
        assert_eq!(engine.get(b"b").unwrap(), None);
        assert_eq!(engine.stats().unwrap().recovery.dangling_mutations, 2);
        assert!(read_log(&dir).ends_with("PUT b fresh\nDELETE b\nPUT a old\nROLLBACK\n"));
    }

    // The closed transaction and its compensations replay to the same state.
    let engine = open(&dir, fast_config());
    assert_eq!(engine.get(b"a").unwrap(), Some(b"old".to_vec()));
    assert_eq!(engine.get(b"b").unwrap(), None);
    assert_eq!(engine.stats().unwrap().recovery.dangling_mutations, 0);
}

#[test]
fn test_torn_log_tail_ignored() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open(&dir, fast_config());
        engine.put(b"a", b"1").unwrap();
    }
    let mut log = read_log(&dir);
    log.push_str("PUT b 2");
    std::fs::write(dir.path().join("kvstore.log"), log).unwrap();

    let engine = open(&dir, fast_config());
    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get(b"b").unwrap(), None);
    engine.put(b"c", b"3").unwrap();
    // The torn bytes are kept and sealed, never cut.
    assert_eq!(read_log(&dir), "PUT a 1\nPUT b 2%\nPUT c 3\n");
    drop(engine);

    let engine = open(&dir, fast_config());
    assert_eq!(engine.get(b"b").unwrap(), None);
    assert_eq!(engine.get(b"c").unwrap(), Some(b"3".to_vec()));
}

#[test]
fn test_reopen_with_other_layout_keeps_data() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open(&dir, Config::default());
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
        engine.put(b"c", b"3").unwrap();
    }
    let data_path = dir.path().join("kvstore.data");
    let log_before = read_log(&dir);
    assert_eq!(std::fs::metadata(&data_path).unwrap().len(), 960);

    let result = HashiTronEngine::open(&data_path, dir.path().join("kvstore.log"), Config::server());
    match result {
        Err(HashiError::LayoutMismatch { file_len, slot_size, .. }) => {
            assert_eq!(file_len, 960);
            assert_eq!(slot_size, 256 + 4096);
        }
        Err(other) => panic!("expected LayoutMismatch, got {:?}", other),
        Ok(_) => panic!("expected LayoutMismatch, got an engine"),
    }
    assert_eq!(std::fs::metadata(&data_path).unwrap().len(), 960);
    assert_eq!(read_log(&dir), log_before);

    let engine = open(&dir, Config::default());
    assert_eq!(engine.get(b"c").unwrap(), Some(b"3".to_vec()));
}

#[test]
fn test_corrupt_log_fails_open() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("kvstore.log"), "PUT a 1\nGARBAGE\n").unwrap();

    let result = HashiTronEngine::open(
        dir.path().join("kvstore.data"),
        dir.path().join("kvstore.log"),
        fast_config(),
    );
    match result {
        Err(HashiError::WalCorrupted { line, .. }) => assert_eq!(line, 2),
        Err(other) => panic!("expected WalCorrupted, got {:?}", other),
        Ok(_) => panic!("expected WalCorrupted, got an engine"),
    }
}

#[test]
fn test_server_preset_round_trips_large_values() {
    let dir = TempDir::new().unwrap();
    let config = Config { sync_mode: SyncMode::Flush, ..Config::server() };
    let value = vec![b'x'; 4096];
    {
        let engine = open(&dir, config.clone());
        engine.put(&[b'k'; 256], &value).unwrap();
        assert!(matches!(
            engine.put(b"k", &[b'x'; 4097]),
            Err(HashiError::OversizedEntry { component: "value", .. })
        ));
    }
    let engine = open(&dir, config);
    assert_eq!(engine.get(&[b'k'; 256]).unwrap(), Some(value));
}
