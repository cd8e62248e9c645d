//! Index rebuild on open
//!
//! The log is replayed in written order against the data file:
//!
//! - A PUT followed by ABORT never reached the data file and is skipped
//!   without consuming a slot.
//! - Any other PUT is applied only when it matches the next unconsumed data
//!   slot. Slots are appended in the same order as successful puts, so this
//!   also skips a PUT whose ABORT could not be written, as long as no later
//!   identical PUT succeeded.
//! - A DELETE removes the key.
//! - Entries inside a ROLLBACK-terminated transaction are applied like any
//!   other: that is what the live engine did. Undo-mode rollbacks log their
//!   compensations, which replay in turn.
//! - A transaction whose BEGIN is never terminated before the end of the log
//!   is handed back as pre-images. The engine reverts it through the normal
//!   write path and closes it with ROLLBACK, so the next replay sees a closed
//!   transaction followed by its compensations.

use std::collections::VecDeque;

use crate::format::{Record, WalEntry};
use crate::index::HashIndex;
use crate::transaction::PreImage;

/// What a replay did, for logging and `HashiTronEngine::stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Lines read from the log
    pub wal_entries: usize,
    /// Slots read from the data file
    pub data_records: usize,
    pub applied_puts: usize,
    pub applied_deletes: usize,
    /// PUT intents followed by ABORT
    pub aborted_puts: usize,
    /// PUT intents with no matching data slot
    pub skipped_puts: usize,
    /// Data slots left over after replay
    pub unmatched_records: usize,
    /// Mutations of an unterminated trailing transaction that must be reverted
    pub dangling_mutations: usize,
}

/// Result of [`replay`].
#[derive(Debug, Default)]
pub struct ReplayOutcome {
    pub stats: RecoveryStats,
    /// Pre-images of the unterminated trailing transaction, oldest first
    pub dangling: Option<Vec<PreImage>>,
}

/// Replay `entries` against `records` into `index`.
pub fn replay(entries: &[WalEntry], records: Vec<Record>, index: &mut HashIndex) -> ReplayOutcome {
    let mut stats = RecoveryStats {
        wal_entries: entries.len(),
        data_records: records.len(),
        ..RecoveryStats::default()
    };
    let mut slots: VecDeque<Record> = records.into();
    let mut open_txn: Option<Vec<PreImage>> = None;

    for (pos, entry) in entries.iter().enumerate() {
        match entry {
            WalEntry::Begin => {
                if open_txn.is_some() {
                    // The previous transaction never got its marker written.
                    // Its effects were live, so they stay applied.
                    tracing::warn!("BEGIN inside an open transaction; keeping the earlier one's writes");
                }
                open_txn = Some(Vec::new());
            }
            WalEntry::Commit | WalEntry::Rollback => {
                open_txn = None;
            }
            WalEntry::Abort => {}
            WalEntry::Put { .. } if entries.get(pos + 1) == Some(&WalEntry::Abort) => {
                stats.aborted_puts += 1;
            }
            WalEntry::Put { key, value } => {
                let matches = slots
                    .front()
                    .map_or(false, |slot| slot.key() == key.as_slice() && slot.value() == value.as_slice());
                if !matches {
                    stats.skipped_puts += 1;
                    continue;
                }
                let (key, value) = match slots.pop_front() {
                    Some(slot) => slot.into_parts(),
                    None => continue,
                };
                let before = index.insert_or_update(key.clone(), value);
                if let Some(txn) = open_txn.as_mut() {
                    txn.push(PreImage { key, before });
                }
                stats.applied_puts += 1;
            }
            WalEntry::Delete { key } => {
                if let Some(before) = index.remove(key) {
                    if let Some(txn) = open_txn.as_mut() {
                        txn.push(PreImage { key: key.clone(), before: Some(before) });
                    }
                }
                stats.applied_deletes += 1;
            }
        }
    }

    stats.unmatched_records = slots.len();
    if stats.unmatched_records > 0 {
        tracing::warn!(
            count = stats.unmatched_records,
            "data slots without a matching WAL intent were not applied"
        );
    }

    // Even an empty dangling transaction is handed back so it gets closed.
    let dangling = open_txn;
    stats.dangling_mutations = dangling.as_ref().map_or(0, Vec::len);

    ReplayOutcome { stats, dangling }
}
