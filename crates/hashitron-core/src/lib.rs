//! HashiTron Core: embedded key-value engine
//!
//! A single-process key-value store combining an in-memory chained hash
//! index, an append-only data file of fixed-size records, and a plain-text
//! write-ahead log with transaction boundaries.
//!
//! # Architecture
//!
//! - **Read path**: Serve directly from the hash index (RwLock read)
//! - **Write path**: WAL intent first, then data file append, then index
//! - **Transactions**: `begin()` holds the exclusive section until
//!   `commit()`/`rollback()`; rollback is marker-only unless
//!   [`RollbackMode::Undo`] is configured
//! - **Recovery**: on open the WAL is replayed against the data file to
//!   rebuild the index
//!
//! ```no_run
//! use hashitron_core::{Config, HashiTronEngine};
//!
//! # fn main() -> hashitron_core::HashiResult<()> {
//! let engine = HashiTronEngine::open("kvstore.data", "kvstore.log", Config::default())?;
//! engine.put(b"foo", b"Hello, World!")?;
//!
//! let mut txn = engine.begin()?;
//! txn.put(b"foo", b"changed")?;
//! txn.commit()?;
//!
//! assert_eq!(engine.get(b"foo")?, Some(b"changed".to_vec()));
//! engine.close()
//! # }
//! ```

pub mod config;
pub mod datafile;
pub mod durability;
pub mod engine;
pub mod error;
pub mod format;
pub mod index;
pub mod recovery;
pub mod transaction;
pub mod wal;

// Re-export key types for convenience
pub use config::{BucketHasher, Config, RecoveryMode, RollbackMode, SyncMode};
pub use datafile::{DataFileReader, DataFileWriter};
pub use engine::{EngineStats, HashiTronEngine};
pub use error::{HashiError, HashiResult};
pub use format::{Operation, Record, RecordLayout, WalEntry};
pub use index::HashIndex;
pub use recovery::RecoveryStats;
pub use transaction::{PreImage, Transaction, TransactionState};
pub use wal::{WalReader, WalWriter};
