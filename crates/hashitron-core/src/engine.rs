//! Storage engine facade: the heart of HashiTron.
//!
//! HashiTronEngine ties the hash index, the append-only data file and the
//! write-ahead log together behind one exclusive section.
//!
//! **Read path**: index only, behind an RwLock; never waits on a transaction
//! **Write path**: WAL intent, then data file append, then index
//! **Transactions**: `begin()` holds the exclusive section until commit,
//! rollback or drop

use std::path::{Path, PathBuf};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};

use crate::config::{Config, RecoveryMode};
use crate::datafile::{DataFileReader, DataFileWriter};
use crate::error::{HashiError, HashiResult};
use crate::format::{validate_key, Boundary, Operation, Record, RecordLayout};
use crate::index::HashIndex;
use crate::recovery::{replay, RecoveryStats};
use crate::transaction::{revert, Transaction, TransactionState};
use crate::wal::{WalReader, WalWriter};

/// Everything the exclusive section guards.
pub(crate) struct Section {
    pub(crate) wal: WalWriter,
    pub(crate) store: DataFileWriter,
}

/// Point-in-time engine figures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Keys currently in the index
    pub keys: usize,
    pub bucket_count: usize,
    /// Longest bucket chain
    pub max_chain_len: usize,
    /// Log file size in bytes
    pub log_bytes: u64,
    /// Complete slots in the data file, including superseded ones
    pub data_records: u64,
    /// What the replay on open did
    pub recovery: RecoveryStats,
}

/// Embedded key-value engine: hash index + data file + WAL.
///
/// All public methods take `&self`; share it across threads with `Arc`.
/// Writers serialize through the section Mutex, then briefly hold the index
/// write lock. Readers only take the index read lock.
pub struct HashiTronEngine {
    /// Log and data file handles; held by every mutation
    section: Mutex<Section>,
    /// Key -> latest value
    index: RwLock<HashIndex>,
    /// Thread holding an open transaction, if any
    holder: Mutex<Option<ThreadId>>,
    layout: RecordLayout,
    data_path: PathBuf,
    log_path: PathBuf,
    config: Config,
    recovery: RecoveryStats,
}

impl HashiTronEngine {
    /// Open or create an engine over `data_path` and `log_path`.
    ///
    /// Both files are opened in append mode. Under `RecoveryMode::ReplayWal`
    /// the index is rebuilt from them, and a transaction left open by a crash
    /// is reverted and closed with ROLLBACK before this returns.
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(
        data_path: P,
        log_path: Q,
        config: Config,
    ) -> HashiResult<Self> {
        config.validate().map_err(HashiError::InvalidConfig)?;

        let data_path = data_path.as_ref().to_path_buf();
        let log_path = log_path.as_ref().to_path_buf();
        let layout = RecordLayout::from(&config);

        let store = DataFileWriter::open(&data_path, layout, config.sync_mode)?;
        let wal = WalWriter::open(&log_path, config.sync_mode)?;

        let mut index = HashIndex::new(config.bucket_count, config.hasher);
        let mut recovery = RecoveryStats::default();
        let mut dangling = None;

        if config.recovery == RecoveryMode::ReplayWal {
            let entries = WalReader::read_entries(&log_path)?;
            let records = DataFileReader::scan_all(&data_path, layout)?;
            let outcome = replay(&entries, records, &mut index);
            recovery = outcome.stats;
            dangling = outcome.dangling;

            tracing::info!(
                log = %log_path.display(),
                keys = index.len(),
                wal_entries = recovery.wal_entries,
                applied_puts = recovery.applied_puts,
                applied_deletes = recovery.applied_deletes,
                skipped_puts = recovery.skipped_puts,
                "recovered index from WAL"
            );
        }

        let engine = Self {
            section: Mutex::new(Section { wal, store }),
            index: RwLock::new(index),
            holder: Mutex::new(None),
            layout,
            data_path,
            log_path,
            config,
            recovery,
        };

        if let Some(mut undo) = dangling {
            let mut section = engine.section.lock();
            let reverted = revert(&engine, &mut section, &mut undo)?;
            section.wal.append_boundary(Boundary::Rollback)?;
            tracing::warn!(reverted, "rolled back a transaction left open by an earlier run");
        }

        tracing::info!(
            data = %engine.data_path.display(),
            log = %engine.log_path.display(),
            buckets = engine.config.bucket_count,
            "engine opened"
        );
        Ok(engine)
    }

    /// Get the value for `key` from the index.
    ///
    /// Takes the read lock only, so it runs alongside an open transaction
    /// and sees that transaction's writes.
    pub fn get(&self, key: &[u8]) -> HashiResult<Option<Vec<u8>>> {
        Ok(self.index.read().lookup(key).map(<[u8]>::to_vec))
    }

    /// Put `key`/`value` as a single auto-committed operation.
    ///
    /// WRITE ORDERING:
    /// 1. WAL intent, flushed
    /// 2. Data file append, flushed
    /// 3. Index insert or in-place update
    ///
    /// If either append fails the index is never modified.
    pub fn put(&self, key: &[u8], value: &[u8]) -> HashiResult<()> {
        self.check_not_holder("put")?;
        let record = Record::new(key, value, self.layout)?;
        let mut section = self.section.lock();
        self.write_put(&mut section, record)?;
        Ok(())
    }

    /// Delete `key`. Returns whether it was present.
    ///
    /// The DELETE intent is logged even when the key is absent. The data file
    /// is not touched.
    pub fn delete(&self, key: &[u8]) -> HashiResult<bool> {
        self.check_not_holder("delete")?;
        self.validate_key(key)?;
        let mut section = self.section.lock();
        Ok(self.write_delete(&mut section, key)?.is_some())
    }

    /// Open a transaction, blocking until the exclusive section is free.
    ///
    /// With `Config::begin_timeout` set, gives up after that long with
    /// `TransactionTimeout`. Calling this from the thread that already holds
    /// a transaction is `InvalidTransactionState`.
    pub fn begin(&self) -> HashiResult<Transaction<'_>> {
        self.check_not_holder("begin")?;

        let mut section = match self.config.begin_timeout {
            None => self.section.lock(),
            Some(timeout) => self
                .section
                .try_lock_for(timeout)
                .ok_or(HashiError::TransactionTimeout { waited: timeout })?,
        };

        section.wal.append_boundary(Boundary::Begin)?;
        *self.holder.lock() = Some(thread::current().id());
        tracing::debug!("transaction started");

        Ok(Transaction::new(self, section))
    }

    /// Whether some thread currently holds a transaction.
    pub fn transaction_state(&self) -> TransactionState {
        if self.holder.lock().is_some() {
            TransactionState::Active
        } else {
            TransactionState::Idle
        }
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.index.read().contains_key(key)
    }

    /// Number of keys in the index.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Snapshot of index and file figures.
    ///
    /// Waits for the exclusive section like any writer.
    pub fn stats(&self) -> HashiResult<EngineStats> {
        self.check_not_holder("stats")?;
        let section = self.section.lock();
        let index = self.index.read();
        Ok(EngineStats {
            keys: index.len(),
            bucket_count: index.bucket_count(),
            max_chain_len: index.max_chain_len(),
            log_bytes: section.wal.current_size(),
            data_records: section.store.record_count(),
            recovery: self.recovery.clone(),
        })
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Sync both files to persistent media and release everything.
    pub fn close(self) -> HashiResult<()> {
        let Self { section, index, data_path, log_path, .. } = self;
        let mut section = section.into_inner();

        section.store.sync()?;
        section.wal.sync()?;

        let keys = index.read().len();
        drop(index);
        drop(section);

        tracing::info!(
            data = %data_path.display(),
            log = %log_path.display(),
            keys,
            "engine closed"
        );
        Ok(())
    }

    pub(crate) fn layout(&self) -> RecordLayout {
        self.layout
    }

    pub(crate) fn validate_key(&self, key: &[u8]) -> HashiResult<()> {
        validate_key(key, self.layout)
    }

    /// Logged put under a held section. Returns the previous value.
    pub(crate) fn write_put(
        &self,
        section: &mut Section,
        record: Record,
    ) -> HashiResult<Option<Vec<u8>>> {
        section.wal.append_intent(Operation::Put, record.key(), record.value())?;
        if let Err(e) = section.store.append(&record) {
            // Replay must not pair this intent with a later identical slot.
            if let Err(abort_err) = section.wal.append_abort() {
                tracing::warn!(error = %abort_err, "could not log ABORT after failed data append");
            }
            return Err(e);
        }
        let (key, value) = record.into_parts();
        Ok(self.index.write().insert_or_update(key, value))
    }

    /// Logged delete under a held section. Returns the removed value.
    pub(crate) fn write_delete(
        &self,
        section: &mut Section,
        key: &[u8],
    ) -> HashiResult<Option<Vec<u8>>> {
        section.wal.append_intent(Operation::Delete, key, &[])?;
        Ok(self.index.write().remove(key))
    }

    pub(crate) fn clear_holder(&self) {
        *self.holder.lock() = None;
    }

    /// The section Mutex is not reentrant; fail instead of self-deadlocking.
    fn check_not_holder(&self, op: &str) -> HashiResult<()> {
        if *self.holder.lock() == Some(thread::current().id()) {
            return Err(HashiError::InvalidTransactionState(format!(
                "{} called on the thread holding an open transaction; use the transaction instead",
                op
            )));
        }
        Ok(())
    }
}
