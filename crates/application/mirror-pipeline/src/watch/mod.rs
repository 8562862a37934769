use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use mirror_core::{CopyPolicy, Phase, ProgressEvent};
use mirror_infra::FileOps;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

pub mod debounce;
pub mod event;
mod worker;

pub use debounce::EventDebouncer;
pub use event::{classify, WatchEvent};

use crate::sync::SyncStats;
use crate::tracker::{ProgressReporter, ProgressSink};
use worker::{RescanSignal, WorkItem, Worker};

pub struct WatchConfig {
    pub source_root: Utf8PathBuf,
    pub dest_root: Utf8PathBuf,
    pub debounce: Duration,
    pub queue_capacity: usize,
    /// Used for subtree reconciles.
    pub policy: Arc<dyn CopyPolicy>,
    /// Used for single changed files.
    pub live_policy: Arc<dyn CopyPolicy>,
}

/// Runs on the notification thread: filters, debounces and enqueues.
struct Intake {
    source_root: Utf8PathBuf,
    debouncer: EventDebouncer,
    tx: mpsc::Sender<WorkItem>,
    sink: Arc<dyn ProgressSink>,
    rescan: Arc<RescanSignal>,
}

impl Intake {
    fn handle(&self, res: notify::Result<notify::Event>) {
        match res {
            Ok(event) => {
                for change in classify(&event) {
                    self.submit(change);
                }
            }
            Err(e) => {
                warn!("Watcher error on {}: {}", self.source_root, e);
                self.sink.report(
                    ProgressEvent::new(Phase::Monitoring, "Warning")
                        .with_percent(100.0)
                        .with_message(format!("Watcher error: {}", e)),
                );
                self.request_rescan("watcher reported an error");
            }
        }
    }

    fn submit(&self, change: WatchEvent) {
        let item = match change {
            WatchEvent::Changed(path) => {
                if !self.debouncer.should_process(&path) {
                    trace!("Debounced {}", path);
                    return;
                }
                WorkItem::Sync {
                    path,
                    ready_at: Instant::now() + self.debouncer.window(),
                }
            }
            WatchEvent::Removed(path) => {
                self.debouncer.forget(&path);
                WorkItem::Delete(path)
            }
            WatchEvent::MovedFrom { path, tracker } => {
                self.debouncer.forget(&path);
                WorkItem::MovedFrom { path, tracker }
            }
            WatchEvent::MovedTo { path, tracker } => WorkItem::MovedTo { path, tracker },
            WatchEvent::Renamed { from, to, tracker } => {
                self.debouncer.forget(&from);
                WorkItem::Rename { from, to, tracker }
            }
            WatchEvent::Rescan => {
                self.request_rescan("backend dropped events");
                return;
            }
        };

        match self.tx.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.request_rescan("change queue is full"),
            Err(TrySendError::Closed(_)) => trace!("Change queue closed, dropping event"),
        }
    }

    fn request_rescan(&self, why: &str) {
        if self.rescan.request() {
            warn!("Scheduling full reconcile of {}: {}", self.source_root, why);
            self.sink.report(
                ProgressEvent::new(Phase::Monitoring, "Rescan scheduled")
                    .with_percent(100.0)
                    .with_message(why.to_string()),
            );
        }
    }
}

/// Live change watcher for one source tree.
///
/// Notifications are handled on the backend's thread and turned into queued
/// work; a single tokio task applies that work to the destination under the
/// shared mutation gate.
pub struct ChangeWatcher {
    watcher: Option<RecommendedWatcher>,
    worker: Option<JoinHandle<SyncStats>>,
}

impl ChangeWatcher {
    /// Must be called from inside a tokio runtime.
    pub fn arm(
        config: WatchConfig,
        ops: Arc<dyn FileOps>,
        gate: Arc<Mutex<()>>,
        sink: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<Self, notify::Error> {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rescan = Arc::new(RescanSignal::default());

        let intake = Intake {
            source_root: config.source_root.clone(),
            debouncer: EventDebouncer::new(config.debounce),
            tx,
            sink: sink.clone(),
            rescan: rescan.clone(),
        };
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            intake.handle(res)
        })?;
        watcher.watch(config.source_root.as_std_path(), RecursiveMode::Recursive)?;
        info!("Watching {} recursively", config.source_root);

        let worker = Worker::new(
            config.source_root,
            config.dest_root,
            ops,
            gate,
            config.policy,
            config.live_policy,
            cancel,
            ProgressReporter::new(sink),
            rescan,
        );
        let handle = tokio::spawn(worker.run(rx));

        Ok(Self {
            watcher: Some(watcher),
            worker: Some(handle),
        })
    }

    /// Stop notifications and wait up to `grace` for the worker to finish.
    /// Returns what the worker did while armed.
    pub async fn disarm(mut self, grace: Duration) -> SyncStats {
        drop(self.watcher.take());
        let Some(mut handle) = self.worker.take() else {
            return SyncStats::default();
        };

        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(stats)) => stats,
            Ok(Err(e)) => {
                error!("Change worker failed: {}", e);
                SyncStats::default()
            }
            Err(_) => {
                warn!("Change worker still busy after {:?}, aborting", grace);
                handle.abort();
                SyncStats::default()
            }
        }
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.take() {
            handle.abort();
        }
    }
}
