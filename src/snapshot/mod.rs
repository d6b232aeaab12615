//! Content-addressed, differential file-state snapshots (C6–C10).
//!
//! Grounded on the teacher's `db/mod.rs` shape (an id-indexed record store
//! with a checksum-based dedup path) generalized to the in-memory
//! differential design this core specifies, since the teacher's own
//! `redb`-backed persistence is out of scope here (conversation/session
//! persistence across restarts is an explicit non-goal).

pub mod change_detector;
pub mod git_strategy;
pub mod hook;
pub mod manager;
pub mod store;
pub mod strategy;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Time-sortable snapshot id: `<millis>-<counter>`, monotonic within a
/// process even when two snapshots are created in the same millisecond.
pub type SnapshotId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotMode {
    Git,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub instruction: String,
    pub timestamp_millis: u64,
    pub mode: SnapshotMode,
    pub files: BTreeMap<String, FileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileEntry {
    Inline {
        checksum: String,
        size: u64,
        content: Vec<u8>,
        compressed: bool,
    },
    Reference {
        checksum: String,
        snapshot_id: SnapshotId,
    },
    Deletion,
}

impl FileEntry {
    pub fn checksum(&self) -> Option<&str> {
        match self {
            FileEntry::Inline { checksum, .. } => Some(checksum),
            FileEntry::Reference { checksum, .. } => Some(checksum),
            FileEntry::Deletion => None,
        }
    }
}

/// This core substitutes MD5 with SHA-256 truncated to 128 bits: no MD5
/// crate exists in the teacher's or pack's dependency stack, and `sha2` is
/// a pure-Rust hasher already idiomatic to the ecosystem. See DESIGN.md.
pub fn checksum(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..16])
}

/// Compress `data` with `flate2` when it exceeds `threshold` bytes. Returns
/// `(bytes, compressed)`.
pub fn maybe_compress(data: &[u8], threshold: usize) -> (Vec<u8>, bool) {
    if data.len() < threshold {
        return (data.to_vec(), false);
    }
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    if encoder.write_all(data).is_err() {
        return (data.to_vec(), false);
    }
    match encoder.finish() {
        Ok(compressed) => (compressed, true),
        Err(_) => (data.to_vec(), false),
    }
}

pub fn decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    use flate2::read::GzDecoder;
    use std::io::Read;

    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_stable_and_128_bits_hex() {
        let a = checksum(b"hello world");
        let b = checksum(b"hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32); // 16 bytes, hex-encoded
    }

    #[test]
    fn compression_round_trips() {
        let data = vec![b'x'; 4096];
        let (compressed, flag) = maybe_compress(&data, 1024);
        assert!(flag);
        let restored = decompress(&compressed).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn small_payloads_skip_compression() {
        let data = b"short".to_vec();
        let (bytes, flag) = maybe_compress(&data, 1024);
        assert!(!flag);
        assert_eq!(bytes, data);
    }
}
