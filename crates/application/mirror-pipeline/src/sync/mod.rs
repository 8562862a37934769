use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use mirror_core::{AlwaysCopy, CopyPolicy, MetadataDiff};
use mirror_infra::{Backoff, RetryPolicy};
use mirror_scanner::ScannerError;
use serde::{Deserialize, Serialize};

pub mod analyze;
pub mod engine;
pub mod execute;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CopyMode {
    /// Copy every source file, even when the destination looks identical.
    AlwaysCopy,
    /// Skip files whose size matches and whose mtimes are within tolerance.
    #[default]
    MetadataDiff,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MirrorOptions {
    pub copy_mode: CopyMode,
    pub mtime_tolerance_ms: u64,
    pub debounce_ms: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub queue_capacity: usize,
    pub stop_grace_ms: u64,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            copy_mode: CopyMode::default(),
            mtime_tolerance_ms: mirror_config::DEFAULT_MTIME_TOLERANCE_MS,
            debounce_ms: mirror_config::DEFAULT_DEBOUNCE_MS,
            retry_attempts: mirror_config::DEFAULT_RETRY_ATTEMPTS,
            retry_delay_ms: mirror_config::DEFAULT_RETRY_DELAY_MS,
            queue_capacity: mirror_config::DEFAULT_QUEUE_CAPACITY,
            stop_grace_ms: mirror_config::DEFAULT_STOP_GRACE_MS,
        }
    }
}

impl MirrorOptions {
    pub fn policy(&self) -> Arc<dyn CopyPolicy> {
        match self.copy_mode {
            CopyMode::AlwaysCopy => Arc::new(AlwaysCopy),
            CopyMode::MetadataDiff => Arc::new(MetadataDiff::new(Duration::from_millis(
                self.mtime_tolerance_ms,
            ))),
        }
    }

    /// Policy for a single file the watcher saw change. Its destination was
    /// stamped with the exact source mtime, so any difference is a real edit.
    pub fn live_policy(&self) -> Arc<dyn CopyPolicy> {
        match self.copy_mode {
            CopyMode::AlwaysCopy => Arc::new(AlwaysCopy),
            CopyMode::MetadataDiff => Arc::new(MetadataDiff::new(Duration::ZERO)),
        }
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(mirror_config::clamp_debounce_ms(self.debounce_ms))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_delay_ms),
            Backoff::Linear,
        )
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }
}

/// Counters for one reconciliation or one monitoring session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncStats {
    pub files_copied: u64,
    pub bytes_copied: u64,
    pub files_deleted: u64,
    pub files_renamed: u64,
    pub dirs_created: u64,
    pub dirs_removed: u64,
    /// Paths that vanished before they could be acted on.
    pub skipped: u64,
    pub failures: u64,
}

impl SyncStats {
    pub fn merge(&mut self, other: &SyncStats) {
        self.files_copied += other.files_copied;
        self.bytes_copied += other.bytes_copied;
        self.files_deleted += other.files_deleted;
        self.files_renamed += other.files_renamed;
        self.dirs_created += other.dirs_created;
        self.dirs_removed += other.dirs_removed;
        self.skipped += other.skipped;
        self.failures += other.failures;
    }

    pub fn changed_anything(&self) -> bool {
        self.files_copied + self.files_deleted + self.files_renamed + self.dirs_created
            + self.dirs_removed
            > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// One-shot reconciliation finished.
    Completed,
    /// A monitoring session ended because it was asked to stop.
    Stopped,
    /// Another session already owns the engine; nothing was done.
    AlreadyRunning,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Work done by the initial reconciliation.
    pub initial: SyncStats,
    /// Work done while monitoring.
    pub live: SyncStats,
}

impl RunReport {
    pub(crate) fn new(outcome: RunOutcome, initial: SyncStats, live: SyncStats) -> Self {
        Self {
            outcome,
            initial,
            live,
        }
    }

    pub(crate) fn already_running() -> Self {
        Self::new(
            RunOutcome::AlreadyRunning,
            SyncStats::default(),
            SyncStats::default(),
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("Invalid configuration: {0}")]
    Validation(String),
    #[error("Scan failed: {0}")]
    Scan(ScannerError),
    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),
    #[error("Source root vanished: {0}")]
    SourceVanished(Utf8PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    /// Internal signal; sessions turn this into a clean stop.
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<ScannerError> for MirrorError {
    fn from(e: ScannerError) -> Self {
        match e {
            ScannerError::Cancelled => MirrorError::Cancelled,
            other => MirrorError::Scan(other),
        }
    }
}

impl From<mirror_infra::Cancelled> for MirrorError {
    fn from(_: mirror_infra::Cancelled) -> Self {
        MirrorError::Cancelled
    }
}

pub use analyze::analyze;
pub use engine::MirrorEngine;
pub use execute::Reconciler;
