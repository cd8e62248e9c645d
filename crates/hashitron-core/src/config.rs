//! Configuration for HashiTron
//!
//! Provides sizing presets and the policy switches that govern
//! durability, recovery and rollback behaviour.

use std::time::Duration;

/// Hash function used to pick a bucket for a key.
///
/// Both variants are pure functions of the key bytes, so bucket placement is
/// stable across process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketHasher {
    /// Multiplicative rolling hash: seed 5381, `h = h * 33 + byte`
    Djb2,
    /// CRC32C (SSE 4.2 / ARMv8 accelerated where available)
    Crc32c,
}

/// How far an append is pushed before the call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Flush and force to persistent media (fdatasync / F_FULLFSYNC / FlushFileBuffers)
    Durable,
    /// Flush to the OS page cache only
    Flush,
}

/// What `open` does with pre-existing files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    /// Start with an empty index regardless of file contents
    Disabled,
    /// Replay the WAL against the data file to rebuild the index
    ReplayWal,
}

/// What `rollback` does to writes made inside the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackMode {
    /// Write the ROLLBACK marker only; applied writes stay applied
    MarkerOnly,
    /// Restore recorded pre-images in reverse order, then write the marker
    Undo,
}

/// HashiTron configuration with sizing presets
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of hash buckets (fixed for the engine's lifetime)
    pub bucket_count: usize,
    /// Key field width in the data file, and maximum key length
    pub max_key_size: usize,
    /// Value field width in the data file, and maximum value length
    pub max_value_size: usize,
    /// Bucket selection function
    pub hasher: BucketHasher,
    /// Durability of each WAL and data file append
    pub sync_mode: SyncMode,
    /// Index rebuild policy on open
    pub recovery: RecoveryMode,
    /// Rollback semantics
    pub rollback: RollbackMode,
    /// Upper bound on how long `begin()` waits; `None` waits forever
    pub begin_timeout: Option<Duration>,
}

impl Config {
    /// The original layout: 128 buckets, 64-byte keys, 256-byte values.
    pub fn classic() -> Self {
        Self {
            bucket_count: 128,
            max_key_size: 64,
            max_value_size: 256,
            hasher: BucketHasher::Djb2,
            sync_mode: SyncMode::Durable,
            recovery: RecoveryMode::ReplayWal,
            rollback: RollbackMode::MarkerOnly,
            begin_timeout: None,
        }
    }

    /// Larger tables and fields for bigger working sets.
    pub fn server() -> Self {
        Self {
            bucket_count: 65_536,
            max_key_size: 256,
            max_value_size: 4096,
            ..Self::classic()
        }
    }

    /// Size in bytes of one data file slot.
    pub fn record_size(&self) -> usize {
        self.max_key_size + self.max_value_size
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.bucket_count == 0 {
            return Err("bucket_count must be > 0".into());
        }
        if self.max_key_size == 0 || self.max_key_size > 4096 {
            return Err("max_key_size must be in [1, 4096]".into());
        }
        if self.max_value_size == 0 || self.max_value_size > 16 * 1024 * 1024 {
            return Err("max_value_size must be in [1, 16MB]".into());
        }
        if let Some(timeout) = self.begin_timeout {
            if timeout.is_zero() {
                return Err("begin_timeout must be > 0 when set".into());
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self { Self::classic() }
}
