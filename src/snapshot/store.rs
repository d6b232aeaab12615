//! Snapshot Store, memory variant (C6): differential content store with
//! checksum-based deduplication and safe-deletion reference rewrite.
//!
//! Grounded on the teacher's `db/mod.rs` id-indexed record layout, replacing
//! its `redb` persistence (not declared in the teacher's own Cargo.toml —
//! an inconsistency in the retrieval pack, see DESIGN.md) with a plain
//! in-memory `Vec` + index maps, since cross-restart persistence is an
//! explicit non-goal here.

use super::{checksum, maybe_compress, FileEntry, Snapshot, SnapshotId, SnapshotMode};
use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct StoreLimits {
    pub max_snapshots: Option<usize>,
    pub memory_limit_bytes: Option<u64>,
    pub compression_threshold: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_snapshots: Some(200),
            memory_limit_bytes: Some(256 * 1024 * 1024),
            compression_threshold: 64 * 1024,
        }
    }
}

#[derive(Default)]
pub struct StoreMetrics {
    pub snapshots_created: u64,
    pub snapshots_deleted: u64,
    pub eviction_events: u64,
    pub references_rewritten: u64,
    pub references_dropped: u64,
}

pub struct SnapshotStore {
    snapshots: Vec<Snapshot>,
    index: HashMap<SnapshotId, usize>,
    limits: StoreLimits,
    metrics: StoreMetrics,
    id_counter: u64,
}

impl SnapshotStore {
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            snapshots: Vec::new(),
            index: HashMap::new(),
            limits,
            metrics: StoreMetrics::default(),
            id_counter: 0,
        }
    }

    pub fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }

    fn next_id(&mut self) -> (SnapshotId, u64) {
        let millis = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
        self.id_counter += 1;
        (format!("{millis:013}-{:06}", self.id_counter), millis)
    }

    /// `files` maps path to raw content bytes. Each entry is stored Inline
    /// unless an earlier snapshot already holds identical content under the
    /// same checksum, in which case it becomes a Reference.
    pub fn create(&mut self, instruction: String, mode: SnapshotMode, files: BTreeMap<String, Vec<u8>>) -> SnapshotId {
        let (id, timestamp_millis) = self.next_id();
        let mut entries = BTreeMap::new();

        for (path, bytes) in files {
            let sum = checksum(&bytes);
            if let Some((found_id, _)) = self.find_inline_with_checksum(&sum) {
                entries.insert(
                    path,
                    FileEntry::Reference {
                        checksum: sum,
                        snapshot_id: found_id,
                    },
                );
            } else {
                let (stored, compressed) = maybe_compress(&bytes, self.limits.compression_threshold);
                entries.insert(
                    path,
                    FileEntry::Inline {
                        checksum: sum,
                        size: bytes.len() as u64,
                        content: stored,
                        compressed,
                    },
                );
            }
        }

        let snapshot = Snapshot {
            id: id.clone(),
            instruction,
            timestamp_millis,
            mode,
            files: entries,
        };
        self.index.insert(id.clone(), self.snapshots.len());
        self.snapshots.push(snapshot);
        self.metrics.snapshots_created += 1;

        self.enforce_limits();
        id
    }

    /// Searches snapshots *older than* `before_id` (or all, if `None`) in
    /// reverse-chronological order for an Inline entry with `checksum`.
    fn find_inline_with_checksum(&self, target: &str) -> Option<(SnapshotId, usize)> {
        self.find_inline_with_checksum_before(target, self.snapshots.len())
    }

    fn find_inline_with_checksum_before(&self, target: &str, before_index: usize) -> Option<(SnapshotId, usize)> {
        self.snapshots[..before_index.min(self.snapshots.len())]
            .iter()
            .enumerate()
            .rev()
            .find_map(|(idx, snap)| {
                snap.files.values().find_map(|entry| match entry {
                    FileEntry::Inline { checksum, .. } if checksum == target => Some((snap.id.clone(), idx)),
                    _ => None,
                })
            })
    }

    pub fn get(&self, id: &str) -> Option<Snapshot> {
        self.index.get(id).map(|&idx| self.snapshots[idx].clone())
    }

    /// Returns a deep copy with every Reference replaced by the referenced
    /// Inline entry's content. Originals are untouched.
    pub fn get_resolved(&self, id: &str) -> Option<Snapshot> {
        let mut snapshot = self.get(id)?;
        for entry in snapshot.files.values_mut() {
            if let FileEntry::Reference { snapshot_id, checksum: want } = entry {
                if let Some(source) = self.index.get(snapshot_id).map(|&i| &self.snapshots[i]) {
                    if let Some(inline) = source.files.values().find(|e| matches!(e, FileEntry::Inline{checksum, ..} if checksum == want)) {
                        *entry = inline.clone();
                    }
                }
            }
        }
        Some(snapshot)
    }

    pub fn list(&self, limit: Option<usize>) -> Vec<Snapshot> {
        let mut out: Vec<Snapshot> = self.snapshots.iter().rev().cloned().collect();
        if let Some(n) = limit {
            out.truncate(n);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    fn total_inline_bytes(&self) -> u64 {
        self.snapshots
            .iter()
            .flat_map(|s| s.files.values())
            .filter_map(|e| match e {
                FileEntry::Inline { size, .. } => Some(*size),
                _ => None,
            })
            .sum()
    }

    /// The central non-trivial algorithm (§4.6): delete `id`, rewriting any
    /// later Reference that pointed at it to an earlier Inline with a
    /// matching checksum, or dropping the reference if none survives.
    pub fn delete(&mut self, id: &str) -> bool {
        let Some(&target_idx) = self.index.get(id) else {
            return false;
        };

        for later_idx in (target_idx + 1)..self.snapshots.len() {
            let paths_to_fix: Vec<(String, String)> = self.snapshots[later_idx]
                .files
                .iter()
                .filter_map(|(path, entry)| match entry {
                    FileEntry::Reference { snapshot_id, checksum } if snapshot_id == id => {
                        Some((path.clone(), checksum.clone()))
                    }
                    _ => None,
                })
                .collect();

            for (path, sum) in paths_to_fix {
                match self.find_inline_with_checksum_before(&sum, target_idx) {
                    Some((replacement_id, _)) => {
                        self.snapshots[later_idx].files.insert(
                            path,
                            FileEntry::Reference {
                                checksum: sum,
                                snapshot_id: replacement_id,
                            },
                        );
                        self.metrics.references_rewritten += 1;
                    }
                    None => {
                        self.snapshots[later_idx].files.remove(&path);
                        self.metrics.references_dropped += 1;
                    }
                }
            }
        }

        self.snapshots.remove(target_idx);
        self.index.clear();
        for (idx, snap) in self.snapshots.iter().enumerate() {
            self.index.insert(snap.id.clone(), idx);
        }
        self.metrics.snapshots_deleted += 1;
        true
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.index.clear();
    }

    fn enforce_limits(&mut self) {
        loop {
            let over_count = self.limits.max_snapshots.is_some_and(|max| self.snapshots.len() > max);
            let over_bytes = self.limits.memory_limit_bytes.is_some_and(|max| self.total_inline_bytes() > max);
            if !over_count && !over_bytes {
                break;
            }
            let Some(oldest) = self.snapshots.first().map(|s| s.id.clone()) else {
                break;
            };
            self.delete(&oldest);
            self.metrics.eviction_events += 1;
        }
    }
}
