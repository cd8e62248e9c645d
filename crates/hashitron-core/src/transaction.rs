//! Transaction coordinator
//!
//! A [`Transaction`] is the engine's exclusive section held open across
//! several calls. `HashiTronEngine::begin` takes the section and writes
//! BEGIN; `commit`/`rollback` write their marker and release it. Every other
//! writer blocks for the whole span.
//!
//! Under [`RollbackMode::MarkerOnly`] a rollback reverts nothing: writes made
//! inside the transaction stay in the index and the data file. Under
//! [`RollbackMode::Undo`] each mutation records a [`PreImage`], and rollback
//! re-applies them newest first through the normal write path before the
//! marker is written.

use parking_lot::MutexGuard;

use crate::config::RollbackMode;
use crate::engine::{HashiTronEngine, Section};
use crate::error::{HashiError, HashiResult};
use crate::format::{Boundary, Record};

/// Coordinator state as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No transaction holds the exclusive section
    Idle,
    /// A transaction is open
    Active,
}

/// Value a key had before one mutation; `None` if the key was absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreImage {
    pub key: Vec<u8>,
    pub before: Option<Vec<u8>>,
}

/// An open transaction. Holds the exclusive section until finished.
///
/// Dropping it without `commit` or `rollback` rolls back.
#[must_use = "a transaction holds the engine's exclusive section until committed or rolled back"]
pub struct Transaction<'a> {
    engine: &'a HashiTronEngine,
    /// `None` once finished
    section: Option<MutexGuard<'a, Section>>,
    undo: Vec<PreImage>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(engine: &'a HashiTronEngine, section: MutexGuard<'a, Section>) -> Self {
        Self { engine, section: Some(section), undo: Vec::new() }
    }

    /// Put inside the transaction. Same contract as `HashiTronEngine::put`.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> HashiResult<()> {
        let record = Record::new(key, value, self.engine.layout())?;
        let section = self.section.as_deref_mut().ok_or_else(finished)?;
        let before = self.engine.write_put(section, record)?;
        self.remember(key, before);
        Ok(())
    }

    /// Delete inside the transaction. Returns whether the key existed.
    pub fn delete(&mut self, key: &[u8]) -> HashiResult<bool> {
        self.engine.validate_key(key)?;
        let section = self.section.as_deref_mut().ok_or_else(finished)?;
        let removed = self.engine.write_delete(section, key)?;
        let existed = removed.is_some();
        if existed {
            self.remember(key, removed);
        }
        Ok(existed)
    }

    /// Read through to the index; sees this transaction's own writes.
    pub fn get(&self, key: &[u8]) -> HashiResult<Option<Vec<u8>>> {
        self.engine.get(key)
    }

    /// Number of pre-images held for undo.
    pub fn pending_undo(&self) -> usize {
        self.undo.len()
    }

    /// Write COMMIT and release the exclusive section.
    pub fn commit(mut self) -> HashiResult<()> {
        self.finish(Boundary::Commit)
    }

    /// Write ROLLBACK and release the exclusive section, reverting first
    /// under `RollbackMode::Undo`.
    pub fn rollback(mut self) -> HashiResult<()> {
        self.finish(Boundary::Rollback)
    }

    fn remember(&mut self, key: &[u8], before: Option<Vec<u8>>) {
        if self.engine.config().rollback == RollbackMode::Undo {
            self.undo.push(PreImage { key: key.to_vec(), before });
        }
    }

    fn finish(&mut self, marker: Boundary) -> HashiResult<()> {
        let mut section = self.section.take().ok_or_else(finished)?;

        let result = match marker {
            Boundary::Rollback => revert(self.engine, &mut section, &mut self.undo)
                .and_then(|reverted| {
                    tracing::debug!(reverted, "rolling back");
                    section.wal.append_boundary(marker)
                }),
            _ => section.wal.append_boundary(marker),
        };

        // The section is released even if the marker could not be written.
        self.engine.clear_holder();
        drop(section);

        match &result {
            Ok(()) => tracing::debug!(marker = marker.as_str(), "transaction finished"),
            Err(e) => tracing::warn!(marker = marker.as_str(), error = %e, "transaction boundary failed"),
        }
        result
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.section.is_some() {
            tracing::warn!("transaction dropped while active; rolling back");
            // finish() already logged any failure.
            let _ = self.finish(Boundary::Rollback);
        }
    }
}

fn finished() -> HashiError {
    HashiError::InvalidTransactionState("transaction already finished".into())
}

/// Apply pre-images newest first through the logged write path.
/// Returns how many were applied; stops at the first failure.
pub(crate) fn revert(
    engine: &HashiTronEngine,
    section: &mut Section,
    undo: &mut Vec<PreImage>,
) -> HashiResult<usize> {
    let mut reverted = 0;
    while let Some(pre) = undo.pop() {
        match pre.before {
            Some(value) => {
                let record = Record::new(&pre.key, &value, engine.layout())?;
                engine.write_put(section, record)?;
            }
            None => {
                engine.write_delete(section, &pre.key)?;
            }
        }
        reverted += 1;
    }
    Ok(reverted)
}
