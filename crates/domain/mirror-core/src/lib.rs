use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub mod diff;
pub mod path_utils;

pub use diff::{AlwaysCopy, CopyPolicy, MetadataDiff};

/// A named source/destination pair. Owned by whoever persists profiles; the
/// engine only ever sees the two roots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MirrorProfile {
    pub name: String,
    pub source_root: String,
    pub dest_root: String,
    #[serde(default)]
    pub last_mirrored: Option<DateTime<Utc>>,
}

impl MirrorProfile {
    pub fn new(
        name: impl Into<String>,
        source_root: impl Into<String>,
        dest_root: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_root: source_root.into(),
            dest_root: dest_root.into(),
            last_mirrored: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    pub size: u64,
    /// Last-write time in milliseconds since the Unix epoch.
    pub mtime_ms: i64,
}

/// Flat view of a directory tree keyed by normalized relative path.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TreeSnapshot {
    pub root: Utf8PathBuf,
    pub files: BTreeMap<String, FileEntry>,
    pub dirs: BTreeSet<String>,
    /// Entries the walk could not read. Their counterparts are left alone.
    #[serde(default)]
    pub skipped: BTreeSet<String>,
}

impl TreeSnapshot {
    pub fn empty(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: BTreeMap::new(),
            dirs: BTreeSet::new(),
            skipped: BTreeSet::new(),
        }
    }

    /// True when `rel` is a skipped entry or lies below one.
    pub fn is_skipped(&self, rel: &str) -> bool {
        self.skipped.iter().any(|s| {
            rel == s
                || rel
                    .strip_prefix(s.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.values().map(|f| f.size).sum()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncPlan {
    pub source_root: Utf8PathBuf,
    pub dest_root: Utf8PathBuf,
    /// Absolute source paths to copy, in relative-path order.
    pub to_copy: Vec<Utf8PathBuf>,
    /// Absolute destination paths to delete.
    pub to_delete: Vec<Utf8PathBuf>,
    /// Destination directories that exist in the source but not yet here.
    pub dirs_to_create: Vec<Utf8PathBuf>,
    /// Destination directories with no source counterpart.
    pub stale_dirs: Vec<Utf8PathBuf>,
}

impl SyncPlan {
    /// Counted file operations; directory bookkeeping is not part of progress.
    pub fn total_operations(&self) -> usize {
        self.to_copy.len() + self.to_delete.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_copy.is_empty()
            && self.to_delete.is_empty()
            && self.dirs_to_create.is_empty()
            && self.stale_dirs.is_empty()
    }

    /// Destination path a planned copy lands on.
    pub fn dest_for(&self, source_path: &Utf8Path) -> Option<Utf8PathBuf> {
        path_utils::MirrorPath::rebase(source_path, &self.source_root, &self.dest_root)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Phase {
    Analysis,
    Cleanup,
    Copy,
    Monitoring,
}

/// Immutable progress record handed to the caller's sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub percent: f64,
    pub processed_count: u64,
    pub total_count: u64,
    pub copied_count: u64,
    pub status: String,
    pub detail: Option<String>,
    pub message: Option<String>,
}

impl ProgressEvent {
    pub fn new(phase: Phase, status: impl Into<String>) -> Self {
        Self {
            phase,
            percent: 0.0,
            processed_count: 0,
            total_count: 0,
            copied_count: 0,
            status: status.into(),
            detail: None,
            message: None,
        }
    }

    pub fn with_counts(mut self, processed: u64, total: u64, copied: u64) -> Self {
        self.processed_count = processed;
        self.total_count = total;
        self.copied_count = copied;
        self.percent = if total == 0 {
            100.0
        } else {
            (processed as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
        };
        self
    }

    pub fn with_percent(mut self, percent: f64) -> Self {
        self.percent = percent.clamp(0.0, 100.0);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Idle,
    Syncing,
    Monitoring,
    Stopping,
    Stopped,
    Faulted,
}

impl EngineState {
    /// A session owns the engine in these states; `start` must be refused.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            EngineState::Syncing | EngineState::Monitoring | EngineState::Stopping
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EngineState::Idle | EngineState::Stopped | EngineState::Faulted
        )
    }
}
