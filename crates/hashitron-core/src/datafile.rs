//! Record store: the append-only data file
//!
//! Every accepted `put` appends one fixed-size slot (see [`crate::format`]).
//! There is no in-place update and no deletion marker: a deleted key keeps
//! its historical slots forever.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::config::SyncMode;
use crate::durability::commit_append;
use crate::error::{HashiError, HashiResult};
use crate::format::{Record, RecordLayout};

/// Appends records to the data file.
pub struct DataFileWriter {
    file: File,
    path: PathBuf,
    /// Bytes in the file after the last successful append
    size: u64,
    layout: RecordLayout,
    sync_mode: SyncMode,
}

impl DataFileWriter {
    /// Open or create the data file at `path` in append mode.
    pub fn open<P: AsRef<Path>>(path: P, layout: RecordLayout, sync_mode: SyncMode) -> HashiResult<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| HashiError::io_at(&path, e, "Failed to open data file"))?;

        let len = file
            .metadata()
            .map_err(|e| HashiError::io_at(&path, e, "Failed to stat data file"))?
            .len();

        // Appending after a partial slot would misalign every later one, and a
        // wrong layout looks the same from here. Refuse rather than cut.
        if len % layout.slot_size() as u64 != 0 {
            return Err(HashiError::LayoutMismatch {
                path,
                file_len: len,
                slot_size: layout.slot_size(),
            });
        }

        Ok(Self { file, path, size: len, layout, sync_mode })
    }

    /// Append one record and flush it. Returns the slot's byte offset.
    ///
    /// On failure nothing is reported as written and the file is cut back to
    /// its previous length (best effort), so the caller must leave the index
    /// untouched.
    pub fn append(&mut self, record: &Record) -> HashiResult<u64> {
        let slot = self.layout.encode(record);
        let offset = self.size;

        if let Err(e) = self.file.write_all(&slot) {
            self.discard_partial_slot();
            return Err(HashiError::io_at(&self.path, e, "Data file write failed"));
        }

        if let Err(e) = commit_append(&mut self.file, self.sync_mode) {
            self.discard_partial_slot();
            return Err(HashiError::io_at(&self.path, e, "Data file sync failed"));
        }

        self.size += slot.len() as u64;
        Ok(offset)
    }

    fn discard_partial_slot(&mut self) {
        if let Err(e) = self.file.set_len(self.size) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "could not truncate partial data slot"
            );
        }
    }

    /// Force everything written so far to persistent media.
    pub fn sync(&mut self) -> HashiResult<()> {
        commit_append(&mut self.file, SyncMode::Durable)
            .map_err(|e| HashiError::io_at(&self.path, e, "Data file sync failed"))
    }

    /// File size in bytes as tracked by this writer.
    pub fn current_size(&self) -> u64 {
        self.size
    }

    /// Number of complete slots in the file.
    pub fn record_count(&self) -> u64 {
        self.size / self.layout.slot_size() as u64
    }
}

/// Reads data file slots back in write order.
pub struct DataFileReader;

impl DataFileReader {
    /// Decode every complete slot. A trailing partial slot is ignored.
    pub fn scan_all(path: &Path, layout: RecordLayout) -> HashiResult<Vec<Record>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(HashiError::io_at(path, e, "Failed to open data file for scan")),
        };

        // Bound the read by the reported length; device files can read forever.
        let len = file
            .metadata()
            .map_err(|e| HashiError::io_at(path, e, "Failed to stat data file"))?
            .len();
        let mut buffer = Vec::new();
        file.take(len)
            .read_to_end(&mut buffer)
            .map_err(|e| HashiError::io_at(path, e, "Failed to read data file"))?;

        let slot_size = layout.slot_size();
        let chunks = buffer.chunks_exact(slot_size);
        let leftover = chunks.remainder().len();
        if leftover != 0 {
            tracing::warn!(
                path = %path.display(),
                bytes = leftover,
                "ignoring partial trailing data slot"
            );
        }

        Ok(chunks.map(|slot| layout.decode(slot)).collect())
    }
}
