use chrono::{DateTime, Utc};
use marketlog_core::{LogRecord, StoreError};

use crate::Result;

/// Point-in-time copy of the whole report log.
#[derive(Debug, Clone)]
pub struct Snapshot {
    bytes: Vec<u8>,
    fingerprint: String,
    taken_at: DateTime<Utc>,
}

impl Snapshot {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        let fingerprint = sha256_hex(&bytes);
        Self {
            bytes,
            fingerprint,
            taken_at: Utc::now(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// SHA-256 of [`bytes`](Self::bytes), lowercase hex.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of entries; every entry ends with exactly one newline.
    pub fn record_count(&self) -> usize {
        self.bytes.iter().filter(|b| **b == b'\n').count()
    }

    /// Decode every entry in file order.
    pub fn records(&self) -> Result<Vec<LogRecord>> {
        decode_lines(&self.bytes)
    }
}

pub(crate) fn decode_lines(bytes: &[u8]) -> Result<Vec<LogRecord>> {
    bytes
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_slice(line).map_err(|e| StoreError::Corrupt {
                line: i + 1,
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Compute SHA256 hex digest of a byte slice.
fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
