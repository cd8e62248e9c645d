//! Write-ahead log for HashiTron
//!
//! A single append-only text file. Write ordering for every mutation:
//! 1. Encode the entry as one `\n`-terminated line
//! 2. Append it to the log file
//! 3. Flush (and sync under `SyncMode::Durable`)
//! 4. Return; only now may the caller touch the data file or the index
//!
//! Opening an existing log appends to it and never removes bytes. An
//! unterminated final line left by a crash mid-append is sealed with
//! [`TORN_LINE_SEAL`] so it stays unparseable and readers skip it.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::SyncMode;
use crate::durability::commit_append;
use crate::error::{HashiError, HashiResult};
use crate::format::{is_sealed_torn_line, Boundary, Operation, WalEntry, TORN_LINE_SEAL};

/// Appends entries to the log.
///
/// INVARIANT: an intent is flushed by `append_intent` before the caller
/// appends the matching record to the data file.
pub struct WalWriter {
    file: File,
    path: PathBuf,
    /// Bytes in the file after the last successful append
    size: u64,
    sync_mode: SyncMode,
}

impl WalWriter {
    /// Open or create the log at `path` in append mode.
    pub fn open<P: AsRef<Path>>(path: P, sync_mode: SyncMode) -> HashiResult<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| HashiError::io_at(&path, e, "Failed to open log file"))?;

        let len = file
            .metadata()
            .map_err(|e| HashiError::io_at(&path, e, "Failed to stat log file"))?
            .len();

        let mut wal = Self { file, path, size: len, sync_mode };

        // Appending after a torn line would glue the next entry onto it.
        let torn = ends_mid_line(&mut wal.file, len)
            .map_err(|e| HashiError::io_at(&wal.path, e, "Failed to read log tail"))?;
        if torn {
            tracing::warn!(path = %wal.path.display(), "sealing torn WAL tail");
            wal.write_line(TORN_LINE_SEAL)?;
        }

        Ok(wal)
    }

    /// Record a PUT or DELETE intent. `value` is ignored for deletes.
    pub fn append_intent(&mut self, op: Operation, key: &[u8], value: &[u8]) -> HashiResult<()> {
        self.append(&WalEntry::intent(op, key, value))
    }

    /// Record a BEGIN, COMMIT or ROLLBACK marker.
    pub fn append_boundary(&mut self, marker: Boundary) -> HashiResult<()> {
        self.append(&WalEntry::boundary(marker))
    }

    /// Record that the preceding PUT never reached the data file.
    pub fn append_abort(&mut self) -> HashiResult<()> {
        self.append(&WalEntry::Abort)
    }

    fn append(&mut self, entry: &WalEntry) -> HashiResult<()> {
        self.write_line(&entry.to_line())
    }

    fn write_line(&mut self, line: &[u8]) -> HashiResult<()> {
        if let Err(e) = self.file.write_all(line) {
            self.discard_partial_line();
            return Err(HashiError::io_at(&self.path, e, "WAL write failed"));
        }

        // An unsynced intent the caller never acted on must not replay later.
        if let Err(e) = commit_append(&mut self.file, self.sync_mode) {
            self.discard_partial_line();
            return Err(HashiError::io_at(&self.path, e, "WAL sync failed"));
        }

        self.size += line.len() as u64;
        Ok(())
    }

    /// Cut the bytes of a line this writer failed to finish, so the next
    /// append starts on a fresh one. Earlier bytes are never touched.
    fn discard_partial_line(&mut self) {
        if let Err(e) = self.file.set_len(self.size) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "could not truncate partial WAL line"
            );
        }
    }

    /// Force everything written so far to persistent media.
    pub fn sync(&mut self) -> HashiResult<()> {
        commit_append(&mut self.file, SyncMode::Durable)
            .map_err(|e| HashiError::io_at(&self.path, e, "WAL sync failed"))
    }

    /// Log size in bytes as tracked by this writer.
    pub fn current_size(&self) -> u64 {
        self.size
    }
}

/// Whether a non-empty file's last byte is something other than a newline.
fn ends_mid_line(file: &mut File, len: u64) -> io::Result<bool> {
    if len == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Reads a log back in written order.
pub struct WalReader;

impl WalReader {
    /// Parse every complete line of the log.
    ///
    /// A missing file reads as empty. A final line without its newline is a
    /// torn append and is dropped, as is a torn line sealed on reopen. Any
    /// other line that fails to parse is an error naming its line number.
    pub fn read_entries(path: &Path) -> HashiResult<Vec<WalEntry>> {
        let mut buffer = Vec::new();
        match File::open(path) {
            Ok(mut file) => {
                file.read_to_end(&mut buffer)
                    .map_err(|e| HashiError::io_at(path, e, "Failed to read log file"))?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(HashiError::io_at(path, e, "Failed to open log file")),
        }

        let mut entries = Vec::new();
        let mut lines = buffer.split(|&b| b == b'\n').enumerate().peekable();

        while let Some((idx, line)) = lines.next() {
            let is_last = lines.peek().is_none();
            if is_last {
                // Text after the final newline never got its terminator.
                if !line.is_empty() {
                    tracing::warn!(
                        path = %path.display(),
                        line = idx + 1,
                        bytes = line.len(),
                        "dropping torn WAL tail"
                    );
                }
                break;
            }
            if line.is_empty() {
                continue;
            }

            match WalEntry::parse_line(line) {
                Ok(entry) => entries.push(entry),
                Err(_) if is_sealed_torn_line(line) => {
                    tracing::warn!(path = %path.display(), line = idx + 1, "skipping sealed torn WAL line");
                }
                Err(reason) => {
                    return Err(HashiError::WalCorrupted {
                        path: path.to_path_buf(),
                        line: idx + 1,
                        reason,
                    })
                }
            }
        }

        Ok(entries)
    }
}
