//! Change Detector (C8): captures a workspace's file state and diffs two
//! captures into a classified change set.
//!
//! Grounded on the teacher's `list_files`/`read_file` traversal in
//! `engine/tools/file_tools.rs` (`ignore::WalkBuilder` with
//! `standard_filters(true)`, a `globset`-built exclude set) and
//! `tool_helpers::build_globset`'s pattern-compilation style.

use super::checksum;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

const DEFAULT_EXCLUDES: &[&str] = &["**/node_modules/**", "**/.git/**", "**/target/**", "**/dist/**", "**/build/**"];

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub excludes: Vec<String>,
    pub max_file_size: u64,
    pub checksum_threshold: u64,
    /// Minimum `|size after - size before|` for a modified entry to count
    /// toward [`should_create_snapshot`]; does not affect classification.
    pub minimum_change_size: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            excludes: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
            max_file_size: 16 * 1024 * 1024,
            checksum_threshold: 16 * 1024 * 1024,
            minimum_change_size: 0,
        }
    }
}

impl CaptureConfig {
    fn build_excludes(&self) -> GlobSet {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.excludes {
            if let Ok(glob) = Glob::new(pattern) {
                builder.add(glob);
            } else {
                tracing::warn!("invalid exclude pattern '{pattern}', ignoring");
            }
        }
        builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap())
    }
}

#[derive(Debug, Clone)]
pub struct FileSnapshot {
    pub size: u64,
    pub mtime_millis: u64,
    pub mode: u32,
    pub checksum: Option<String>,
}

impl FileSnapshot {
    /// Per §4.7: equal size and mode, and equal checksums when both sides
    /// have one; mtime only breaks the tie when neither side has a
    /// checksum. A `touch` with no content edit must never read as changed.
    fn unchanged(&self, other: &FileSnapshot) -> bool {
        if self.size != other.size || self.mode != other.mode {
            return false;
        }
        match (&self.checksum, &other.checksum) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.mtime_millis == other.mtime_millis,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkspaceCapture {
    pub files: BTreeMap<String, FileSnapshot>,
    pub skipped_due_to_size: usize,
}

/// Walks `base_path` with gitignore-aware filtering plus the configured
/// exclude globs. Symlinks are never followed. Files over `max_file_size`
/// are counted and skipped entirely (no entry, no checksum).
pub fn capture(base_path: &Path, config: &CaptureConfig) -> WorkspaceCapture {
    let excludes = config.build_excludes();
    let mut out = WorkspaceCapture::default();

    let walker = WalkBuilder::new(base_path).standard_filters(true).hidden(false).follow_links(false).build();

    for entry in walker {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        let Ok(rel) = path.strip_prefix(base_path) else { continue };
        let rel_str = rel.to_string_lossy().replace('\\', "/");
        if excludes.is_match(&rel_str) {
            continue;
        }

        let Ok(metadata) = entry.metadata() else { continue };
        let size = metadata.len();
        if size > config.max_file_size {
            out.skipped_due_to_size += 1;
            continue;
        }

        let mtime_millis = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let checksum = if size <= config.checksum_threshold {
            std::fs::read(path).ok().map(|bytes| checksum(&bytes))
        } else {
            None
        };

        let mode = metadata.permissions().mode();

        out.files.insert(rel_str, FileSnapshot { size, mtime_millis, mode, checksum });
    }

    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifiedKind {
    SizeIncreased,
    SizeDecreased,
    ContentChanged,
    PermissionsChanged,
    TimestampChanged,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Created(String),
    Modified { path: String, kind: ModifiedKind, size_delta: i64 },
    Deleted(String),
}

#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub changes: Vec<Change>,
    pub unchanged_count: usize,
}

/// Compares two captures of the same workspace, classifying every modified
/// file by the cheapest signal that explains the difference: size first,
/// then content checksum, then mtime alone.
pub fn compare(before: &WorkspaceCapture, after: &WorkspaceCapture) -> ChangeSet {
    let mut changes = Vec::new();
    let mut unchanged_count = 0;

    for (path, after_snap) in &after.files {
        match before.files.get(path) {
            None => changes.push(Change::Created(path.clone())),
            Some(before_snap) => {
                if before_snap.unchanged(after_snap) {
                    unchanged_count += 1;
                    continue;
                }
                let kind = if after_snap.size > before_snap.size {
                    ModifiedKind::SizeIncreased
                } else if after_snap.size < before_snap.size {
                    ModifiedKind::SizeDecreased
                } else if before_snap.checksum != after_snap.checksum {
                    ModifiedKind::ContentChanged
                } else if before_snap.mode != after_snap.mode {
                    ModifiedKind::PermissionsChanged
                } else {
                    ModifiedKind::TimestampChanged
                };
                let size_delta = after_snap.size as i64 - before_snap.size as i64;
                changes.push(Change::Modified { path: path.clone(), kind, size_delta });
            }
        }
    }

    for path in before.files.keys() {
        if !after.files.contains_key(path) {
            changes.push(Change::Deleted(path.clone()));
        }
    }

    ChangeSet { changes, unchanged_count }
}

/// True iff any entry was created or deleted, or any modified entry's size
/// delta reaches `minimum_change_size` — a lone timestamp touch on an
/// otherwise-unchanged file never triggers a snapshot on its own.
pub fn should_create_snapshot(change_set: &ChangeSet, minimum_change_size: u64) -> bool {
    change_set.changes.iter().any(|change| match change {
        Change::Created(_) | Change::Deleted(_) => true,
        Change::Modified { size_delta, .. } => size_delta.unsigned_abs() >= minimum_change_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn capture_finds_files_and_skips_excluded_dirs() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::write(dir.path().join("node_modules/pkg/index.js"), "ignored").unwrap();

        let capture = capture(dir.path(), &CaptureConfig::default());
        assert!(capture.files.contains_key("a.txt"));
        assert!(!capture.files.keys().any(|k| k.contains("node_modules")));
    }

    #[test]
    fn compare_classifies_created_modified_deleted() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("keep.txt"), "same").unwrap();
        fs::write(dir.path().join("shrink.txt"), "0123456789").unwrap();
        fs::write(dir.path().join("gone.txt"), "bye").unwrap();
        let before = capture(dir.path(), &CaptureConfig::default());

        fs::write(dir.path().join("shrink.txt"), "01").unwrap();
        fs::write(dir.path().join("new.txt"), "fresh").unwrap();
        fs::remove_file(dir.path().join("gone.txt")).unwrap();
        let after = capture(dir.path(), &CaptureConfig::default());

        let diff = compare(&before, &after);
        assert!(diff.changes.contains(&Change::Created("new.txt".to_string())));
        assert!(diff.changes.contains(&Change::Deleted("gone.txt".to_string())));
        assert!(diff
            .changes
            .iter()
            .any(|c| matches!(c, Change::Modified { path, kind, .. } if path == "shrink.txt" && *kind == ModifiedKind::SizeDecreased)));
        assert!(diff.unchanged_count >= 1);
    }

    #[test]
    fn should_create_snapshot_false_when_change_set_empty() {
        let empty = ChangeSet::default();
        assert!(!should_create_snapshot(&empty, 0));
    }

    #[test]
    fn should_create_snapshot_respects_minimum_change_size() {
        let mut change_set = ChangeSet::default();
        change_set.changes.push(Change::Modified {
            path: "small.txt".to_string(),
            kind: ModifiedKind::SizeIncreased,
            size_delta: 4,
        });
        assert!(!should_create_snapshot(&change_set, 16));
        assert!(should_create_snapshot(&change_set, 4));
    }

    #[test]
    fn touch_with_no_content_edit_is_unchanged_when_checksummed() {
        let before = FileSnapshot {
            size: 5,
            mtime_millis: 1000,
            mode: 0o644,
            checksum: Some("abc".to_string()),
        };
        let after = FileSnapshot {
            size: 5,
            mtime_millis: 2000,
            mode: 0o644,
            checksum: Some("abc".to_string()),
        };
        assert!(before.unchanged(&after));
    }

    #[test]
    fn mtime_only_breaks_the_tie_without_a_checksum() {
        let before = FileSnapshot {
            size: 5,
            mtime_millis: 1000,
            mode: 0o644,
            checksum: None,
        };
        let same_mtime = FileSnapshot { mtime_millis: 1000, ..before.clone() };
        let bumped_mtime = FileSnapshot { mtime_millis: 2000, ..before.clone() };
        assert!(before.unchanged(&same_mtime));
        assert!(!before.unchanged(&bumped_mtime));
    }

    #[test]
    fn permission_only_change_is_classified_and_not_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("script.sh");
        fs::write(&path, "echo hi").unwrap();
        let before = capture(dir.path(), &CaptureConfig::default());

        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        let after = capture(dir.path(), &CaptureConfig::default());

        let diff = compare(&before, &after);
        assert!(diff
            .changes
            .iter()
            .any(|c| matches!(c, Change::Modified { path, kind, .. } if path == "script.sh" && *kind == ModifiedKind::PermissionsChanged)));
    }

    #[test]
    fn oversized_files_are_skipped_and_counted() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("big.bin"), vec![0u8; 2048]).unwrap();
        let mut config = CaptureConfig::default();
        config.max_file_size = 1024;

        let capture = capture(dir.path(), &config);
        assert!(!capture.files.contains_key("big.bin"));
        assert_eq!(capture.skipped_due_to_size, 1);
    }
}
