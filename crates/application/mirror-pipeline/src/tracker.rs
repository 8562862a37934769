use std::sync::Arc;

use camino::Utf8Path;
use mirror_core::{Phase, ProgressEvent};
use mirror_infra::OpOutcome;
use mirror_scanner::ScanStats;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::sync::SyncStats;

/// Where progress events go. Reporting must never block the engine.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

impl ProgressSink for mpsc::UnboundedSender<ProgressEvent> {
    fn report(&self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}

/// Bounded channels drop events when the consumer falls behind.
impl ProgressSink for mpsc::Sender<ProgressEvent> {
    fn report(&self, event: ProgressEvent) {
        if self.try_send(event).is_err() {
            trace!("Progress channel full or closed, dropping event");
        }
    }
}

pub struct FnSink<F>(pub F);

impl<F> ProgressSink for FnSink<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn report(&self, event: ProgressEvent) {
        (self.0)(event)
    }
}

pub struct NullSink;

impl ProgressSink for NullSink {
    fn report(&self, _event: ProgressEvent) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Copy,
    Delete,
    Rename,
}

impl OpKind {
    fn verb(self) -> &'static str {
        match self {
            OpKind::Copy => "copy",
            OpKind::Delete => "delete",
            OpKind::Rename => "move",
        }
    }

    fn past(self) -> &'static str {
        match self {
            OpKind::Copy => "copied",
            OpKind::Delete => "deleted",
            OpKind::Rename => "moved",
        }
    }

    fn done_status(self) -> &'static str {
        match self {
            OpKind::Copy => "Copied",
            OpKind::Delete => "Deleted",
            OpKind::Rename => "Renamed",
        }
    }
}

/// Counts work for one run and turns file outcomes into progress events.
pub struct ProgressReporter {
    sink: Arc<dyn ProgressSink>,
    total: u64,
    processed: u64,
    stats: SyncStats,
}

impl ProgressReporter {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            sink,
            total: 0,
            processed: 0,
            stats: SyncStats::default(),
        }
    }

    pub fn sink(&self) -> Arc<dyn ProgressSink> {
        self.sink.clone()
    }

    pub fn begin(&mut self, total: u64) {
        self.total = total;
        self.processed = 0;
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn into_stats(self) -> SyncStats {
        self.stats
    }

    pub fn absorb(&mut self, other: &SyncStats) {
        self.stats.merge(other);
    }

    fn counted(&self, phase: Phase, status: &str) -> ProgressEvent {
        ProgressEvent::new(phase, status).with_counts(
            self.processed,
            self.total,
            self.stats.files_copied,
        )
    }

    pub fn status(&self, phase: Phase, status: &str) {
        self.sink.report(self.counted(phase, status));
    }

    pub fn status_with_message(&self, phase: Phase, status: &str, message: impl Into<String>) {
        self.sink
            .report(self.counted(phase, status).with_message(message));
    }

    /// Non-fatal problem the user should see.
    pub fn warn(&self, phase: Phase, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.sink
            .report(self.counted(phase, "Warning").with_message(message));
    }

    pub fn record(&mut self, phase: Phase, kind: OpKind, path: &Utf8Path, outcome: &OpOutcome) {
        self.processed += 1;

        let (status, message) = match outcome {
            OpOutcome::Completed { bytes } => {
                match kind {
                    OpKind::Copy => {
                        self.stats.files_copied += 1;
                        self.stats.bytes_copied += bytes;
                    }
                    OpKind::Delete => self.stats.files_deleted += 1,
                    OpKind::Rename => self.stats.files_renamed += 1,
                }
                debug!("{} {}", kind.done_status(), path);
                (kind.done_status(), None)
            }
            OpOutcome::Missing => {
                self.stats.skipped += 1;
                let msg = format!("{} vanished before it could be {}", path, kind.past());
                debug!("{}", msg);
                ("Skipped", Some(msg))
            }
            OpOutcome::TransientFailure { attempts, error } => {
                self.stats.failures += 1;
                let msg = format!(
                    "Could not {} {}: still in use after {} attempts ({})",
                    kind.verb(),
                    path,
                    attempts,
                    error
                );
                warn!("{}", msg);
                ("Locked", Some(msg))
            }
            OpOutcome::FatalFailure { error } => {
                self.stats.failures += 1;
                let msg = format!("Could not {} {}: {}", kind.verb(), path, error);
                warn!("{}", msg);
                ("Failed", Some(msg))
            }
        };

        let mut event = self.counted(phase, status).with_detail(path.as_str());
        if let Some(msg) = message {
            event = event.with_message(msg);
        }
        self.sink.report(event);
    }

    pub fn dir_created(&mut self, path: &Utf8Path) {
        self.stats.dirs_created += 1;
        debug!("Created directory {}", path);
    }

    pub fn dir_removed(&mut self, path: &Utf8Path) {
        self.stats.dirs_removed += 1;
        debug!("Removed empty directory {}", path);
    }

    pub fn dir_failed(&mut self, phase: Phase, path: &Utf8Path, error: impl std::fmt::Display) {
        self.stats.failures += 1;
        self.warn(phase, format!("Directory {}: {}", path, error));
    }

    pub fn scan_progress(sink: &dyn ProgressSink, stats: ScanStats) {
        sink.report(
            ProgressEvent::new(Phase::Analysis, "Scanning")
                .with_percent(0.0)
                .with_detail(format!("{} files scanned", stats.files_scanned)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    fn collecting() -> (Arc<Mutex<Vec<ProgressEvent>>>, Arc<dyn ProgressSink>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sink: Arc<dyn ProgressSink> =
            Arc::new(FnSink(move |e: ProgressEvent| sink.lock().unwrap().push(e)));
        (seen, sink)
    }

    #[test]
    fn completed_copy_counts_bytes_and_percent() {
        let (seen, sink) = collecting();
        let mut reporter = ProgressReporter::new(sink);
        reporter.begin(2);

        reporter.record(
            Phase::Copy,
            OpKind::Copy,
            Utf8Path::new("/d/a.txt"),
            &OpOutcome::Completed { bytes: 10 },
        );

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, "Copied");
        assert_eq!(events[0].percent, 50.0);
        assert_eq!(events[0].copied_count, 1);
        assert_eq!(reporter.stats().bytes_copied, 10);
    }

    #[test]
    fn failures_carry_path_and_cause() {
        let (seen, sink) = collecting();
        let mut reporter = ProgressReporter::new(sink);
        reporter.begin(1);

        reporter.record(
            Phase::Cleanup,
            OpKind::Delete,
            Utf8Path::new("/d/locked.bin"),
            &OpOutcome::TransientFailure {
                attempts: 3,
                error: io::Error::from(io::ErrorKind::WouldBlock),
            },
        );

        let events = seen.lock().unwrap();
        let msg = events[0].message.as_deref().unwrap();
        assert!(msg.contains("/d/locked.bin"));
        assert!(msg.contains("3 attempts"));
        assert_eq!(reporter.stats().failures, 1);
    }

    #[test]
    fn bounded_sink_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        tx.report(ProgressEvent::new(Phase::Copy, "one"));
        tx.report(ProgressEvent::new(Phase::Copy, "two"));

        assert_eq!(rx.try_recv().unwrap().status, "one");
        assert!(rx.try_recv().is_err());
    }
}
