//! On-disk formats for HashiTron
//!
//! Data file: a headerless run of fixed-size slots, each
//! `key field (max_key_size bytes) + value field (max_value_size bytes)`,
//! NUL-padded, with no separators, length prefixes or checksums.
//!
//! Log file: newline-terminated text lines
//!
//! ```text
//! BEGIN
//! PUT <key> <value>
//! DELETE <key>
//! ABORT
//! COMMIT
//! ROLLBACK
//! ```
//!
//! `ABORT` follows a PUT whose data file append failed, so replay never pairs
//! that PUT with a later slot.
//!
//! Keys escape space, `%` and control bytes as `%XX`. Values escape `%` and
//! control bytes but keep spaces, so `PUT foo Hello, World!` reads as written.
//! Escapes always end in a hex digit, so no valid line ends in `%`; a torn
//! line found on reopen is terminated with [`TORN_LINE_SEAL`] to mark it.

use crate::config::Config;
use crate::error::{HashiError, HashiResult};

/// Mutating operation recorded as a WAL intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Insert or update a key-value pair
    Put,
    /// Delete a key
    Delete,
}

/// Transaction boundary marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Begin,
    Commit,
    Rollback,
}

impl Boundary {
    pub fn as_str(self) -> &'static str {
        match self {
            Boundary::Begin => "BEGIN",
            Boundary::Commit => "COMMIT",
            Boundary::Rollback => "ROLLBACK",
        }
    }
}

/// Terminates a torn final line so it can never parse as an entry.
pub const TORN_LINE_SEAL: &[u8] = b"%\n";

/// One parsed line of the log file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalEntry {
    Begin,
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
    /// The preceding PUT never reached the data file
    Abort,
    Commit,
    Rollback,
}

impl WalEntry {
    /// Build the entry for an intent. `value` is ignored for deletes.
    pub fn intent(op: Operation, key: &[u8], value: &[u8]) -> Self {
        match op {
            Operation::Put => WalEntry::Put { key: key.to_vec(), value: value.to_vec() },
            Operation::Delete => WalEntry::Delete { key: key.to_vec() },
        }
    }

    pub fn boundary(marker: Boundary) -> Self {
        match marker {
            Boundary::Begin => WalEntry::Begin,
            Boundary::Commit => WalEntry::Commit,
            Boundary::Rollback => WalEntry::Rollback,
        }
    }

    /// Encode as one log line, trailing newline included.
    pub fn to_line(&self) -> Vec<u8> {
        let mut line = Vec::new();
        match self {
            WalEntry::Begin => line.extend_from_slice(b"BEGIN"),
            WalEntry::Commit => line.extend_from_slice(b"COMMIT"),
            WalEntry::Rollback => line.extend_from_slice(b"ROLLBACK"),
            WalEntry::Abort => line.extend_from_slice(b"ABORT"),
            WalEntry::Put { key, value } => {
                line.extend_from_slice(b"PUT ");
                escape_into(&mut line, key, true);
                line.push(b' ');
                escape_into(&mut line, value, false);
            }
            WalEntry::Delete { key } => {
                line.extend_from_slice(b"DELETE ");
                escape_into(&mut line, key, true);
            }
        }
        line.push(b'\n');
        line
    }

    /// Parse one log line without its trailing newline.
    pub fn parse_line(line: &[u8]) -> Result<Self, String> {
        let (op, rest) = match line.iter().position(|&b| b == b' ') {
            Some(pos) => (&line[..pos], Some(&line[pos + 1..])),
            None => (line, None),
        };

        match (op, rest) {
            (b"BEGIN", None) => Ok(WalEntry::Begin),
            (b"COMMIT", None) => Ok(WalEntry::Commit),
            (b"ROLLBACK", None) => Ok(WalEntry::Rollback),
            (b"ABORT", None) => Ok(WalEntry::Abort),
            (b"PUT", Some(rest)) => {
                let pos = rest
                    .iter()
                    .position(|&b| b == b' ')
                    .ok_or_else(|| "PUT line has no value field".to_string())?;
                let key = unescape(&rest[..pos])?;
                if key.is_empty() {
                    return Err("PUT line has an empty key".into());
                }
                let value = unescape(&rest[pos + 1..])?;
                Ok(WalEntry::Put { key, value })
            }
            (b"DELETE", Some(rest)) => {
                if rest.contains(&b' ') {
                    return Err("DELETE line has trailing fields".into());
                }
                let key = unescape(rest)?;
                if key.is_empty() {
                    return Err("DELETE line has an empty key".into());
                }
                Ok(WalEntry::Delete { key })
            }
            _ => Err(format!("unrecognised entry {:?}", String::from_utf8_lossy(line))),
        }
    }
}

fn needs_escape(byte: u8, escape_space: bool) -> bool {
    byte < 0x20 || byte == 0x7F || byte == b'%' || (escape_space && byte == b' ')
}

fn escape_into(out: &mut Vec<u8>, bytes: &[u8], escape_space: bool) {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    for &b in bytes {
        if needs_escape(b, escape_space) {
            out.push(b'%');
            out.push(HEX[(b >> 4) as usize]);
            out.push(HEX[(b & 0x0F) as usize]);
        } else {
            out.push(b);
        }
    }
}

/// Whether a complete line is a torn fragment sealed on reopen.
pub fn is_sealed_torn_line(line: &[u8]) -> bool {
    line.last() == Some(&b'%')
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

fn unescape(field: &[u8]) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(field.len());
    let mut i = 0;
    while i < field.len() {
        if field[i] == b'%' {
            let hex = field
                .get(i + 1..i + 3)
                .ok_or_else(|| "truncated %-escape".to_string())?;
            // from_str_radix alone would take a sign, e.g. "%+F".
            let (hi, lo) = match (hex_value(hex[0]), hex_value(hex[1])) {
                (Some(hi), Some(lo)) => (hi, lo),
                _ => return Err(format!("invalid %-escape %{}", String::from_utf8_lossy(hex))),
            };
            out.push(hi << 4 | lo);
            i += 3;
        } else {
            out.push(field[i]);
            i += 1;
        }
    }
    Ok(out)
}

/// An accepted key/value pair. Only constructible through validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    key: Vec<u8>,
    value: Vec<u8>,
}

impl Record {
    /// Validate and copy `key`/`value` against the configured field sizes.
    pub fn new(key: &[u8], value: &[u8], layout: RecordLayout) -> HashiResult<Self> {
        validate_key(key, layout)?;
        validate_value(value, layout)?;
        Ok(Self { key: key.to_vec(), value: value.to_vec() })
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn into_parts(self) -> (Vec<u8>, Vec<u8>) {
        (self.key, self.value)
    }
}

/// Field widths of one data file slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    pub key_size: usize,
    pub value_size: usize,
}

impl RecordLayout {
    pub fn slot_size(&self) -> usize {
        self.key_size + self.value_size
    }

    /// Encode a record into one NUL-padded slot.
    pub fn encode(&self, record: &Record) -> Vec<u8> {
        let mut slot = vec![0u8; self.slot_size()];
        slot[..record.key.len()].copy_from_slice(&record.key);
        let value_start = self.key_size;
        slot[value_start..value_start + record.value.len()].copy_from_slice(&record.value);
        slot
    }

    /// Decode one slot. `slot` must be exactly `slot_size()` bytes.
    pub fn decode(&self, slot: &[u8]) -> Record {
        debug_assert_eq!(slot.len(), self.slot_size());
        let (key, value) = slot.split_at(self.key_size);
        Record { key: trim_padding(key).to_vec(), value: trim_padding(value).to_vec() }
    }
}

impl From<&Config> for RecordLayout {
    fn from(config: &Config) -> Self {
        Self { key_size: config.max_key_size, value_size: config.max_value_size }
    }
}

fn trim_padding(field: &[u8]) -> &[u8] {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    &field[..end]
}

/// Reject empty, oversized or NUL-containing keys.
pub fn validate_key(key: &[u8], layout: RecordLayout) -> HashiResult<()> {
    if key.is_empty() {
        return Err(HashiError::EmptyKey);
    }
    if key.len() > layout.key_size {
        return Err(HashiError::OversizedEntry {
            component: "key",
            entry_size: key.len(),
            max_size: layout.key_size,
        });
    }
    if key.contains(&0) {
        return Err(HashiError::NulByte { component: "key" });
    }
    Ok(())
}

/// Reject oversized or NUL-containing values. Empty values are allowed.
pub fn validate_value(value: &[u8], layout: RecordLayout) -> HashiResult<()> {
    if value.len() > layout.value_size {
        return Err(HashiError::OversizedEntry {
            component: "value",
            entry_size: value.len(),
            max_size: layout.value_size,
        });
    }
    if value.contains(&0) {
        return Err(HashiError::NulByte { component: "value" });
    }
    Ok(())
}
