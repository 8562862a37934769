use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use mirror_core::path_utils::MirrorPath;
use mirror_core::{CopyPolicy, Phase};
use mirror_infra::{Cancelled, FileOps, OpOutcome};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::sync::analyze::{analyze, needs_copy_at};
use crate::sync::execute::is_empty_dir;
use crate::sync::{MirrorError, Reconciler, SyncStats};
use crate::tracker::{OpKind, ProgressReporter};

/// Queued work for the single consumer. Order of arrival is order of effect.
#[derive(Debug)]
pub(crate) enum WorkItem {
    Sync {
        path: Utf8PathBuf,
        /// Copy no earlier than this, so a burst of writes lands once.
        ready_at: Instant,
    },
    Delete(Utf8PathBuf),
    MovedFrom {
        path: Utf8PathBuf,
        tracker: Option<usize>,
    },
    MovedTo {
        path: Utf8PathBuf,
        tracker: Option<usize>,
    },
    Rename {
        from: Utf8PathBuf,
        to: Utf8PathBuf,
        tracker: Option<usize>,
    },
}

/// Coalesced request for a full re-reconcile.
#[derive(Default)]
pub(crate) struct RescanSignal {
    requested: AtomicBool,
    wake: Notify,
}

impl RescanSignal {
    /// True when this call raised the flag rather than finding it raised.
    pub(crate) fn request(&self) -> bool {
        let first = !self.requested.swap(true, Ordering::SeqCst);
        self.wake.notify_one();
        first
    }

    fn take(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }
}

struct PendingMove {
    path: Utf8PathBuf,
    tracker: Option<usize>,
    deadline: Instant,
}

enum Next {
    Item(WorkItem),
    PendingExpired,
    Rescan,
    Closed,
    Cancelled,
}

pub(crate) struct Worker {
    source_root: Utf8PathBuf,
    dest_root: Utf8PathBuf,
    ops: Arc<dyn FileOps>,
    gate: Arc<Mutex<()>>,
    policy: Arc<dyn CopyPolicy>,
    live_policy: Arc<dyn CopyPolicy>,
    cancel: CancellationToken,
    reporter: ProgressReporter,
    rescan: Arc<RescanSignal>,
    pending: Option<PendingMove>,
    last_paired: Option<usize>,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        source_root: Utf8PathBuf,
        dest_root: Utf8PathBuf,
        ops: Arc<dyn FileOps>,
        gate: Arc<Mutex<()>>,
        policy: Arc<dyn CopyPolicy>,
        live_policy: Arc<dyn CopyPolicy>,
        cancel: CancellationToken,
        reporter: ProgressReporter,
        rescan: Arc<RescanSignal>,
    ) -> Self {
        Self {
            source_root,
            dest_root,
            ops,
            gate,
            policy,
            live_policy,
            cancel,
            reporter,
            rescan,
            pending: None,
            last_paired: None,
        }
    }

    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<WorkItem>) -> SyncStats {
        let cancel = self.cancel.clone();
        let rescan = self.rescan.clone();

        loop {
            let deadline = self.pending.as_ref().map(|p| p.deadline);
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => Next::Cancelled,
                _ = wait_until(deadline) => Next::PendingExpired,
                _ = rescan.wake.notified() => Next::Rescan,
                item = rx.recv() => match item {
                    Some(item) => Next::Item(item),
                    None => Next::Closed,
                },
            };

            let step = match next {
                Next::Cancelled => break,
                Next::Closed => {
                    let _ = self.flush_pending().await;
                    break;
                }
                Next::PendingExpired => self.flush_pending().await,
                Next::Rescan => Ok(()),
                Next::Item(item) => self.dispatch(item).await,
            };
            if step.is_err() {
                break;
            }

            if rescan.take() && self.rescan_tree().await.is_err() {
                break;
            }
        }

        debug!("Change worker for {} finished", self.source_root);
        self.reporter.into_stats()
    }

    async fn dispatch(&mut self, item: WorkItem) -> Result<(), Cancelled> {
        match item {
            WorkItem::Sync { path, ready_at } => {
                self.flush_pending().await?;
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(Cancelled),
                    _ = tokio::time::sleep_until(tokio::time::Instant::from_std(ready_at)) => {}
                }
                self.sync(&path).await
            }
            WorkItem::Delete(path) => {
                self.flush_pending().await?;
                self.remove(&path).await
            }
            WorkItem::MovedFrom { path, tracker } => {
                self.flush_pending().await?;
                let window = Duration::from_millis(mirror_config::RENAME_PAIR_WINDOW_MS);
                self.pending = Some(PendingMove {
                    path,
                    tracker,
                    deadline: Instant::now() + window,
                });
                Ok(())
            }
            WorkItem::MovedTo { path, tracker } => {
                if let Some(from) = self.pending.take() {
                    if from.tracker == tracker {
                        self.last_paired = tracker;
                        return self.rename(&from.path, &path).await;
                    }
                    self.remove(&from.path).await?;
                }
                // Moved in from outside the watched tree.
                self.sync(&path).await
            }
            WorkItem::Rename { from, to, tracker } => {
                if tracker.is_some() && tracker == self.last_paired {
                    trace!("Rename {} -> {} already applied", from, to);
                    return Ok(());
                }
                if let Some(pending) = self.pending.take() {
                    if pending.path != from {
                        self.remove(&pending.path).await?;
                    }
                }
                self.rename(&from, &to).await
            }
        }
    }

    /// A move whose partner never arrived left the tree.
    async fn flush_pending(&mut self) -> Result<(), Cancelled> {
        match self.pending.take() {
            Some(pending) => self.remove(&pending.path).await,
            None => Ok(()),
        }
    }

    fn dest_path(&self, src: &Utf8Path) -> Option<Utf8PathBuf> {
        if src == self.source_root.as_path() {
            return None;
        }
        MirrorPath::rebase(src, &self.source_root, &self.dest_root)
    }

    async fn sync(&mut self, src: &Utf8Path) -> Result<(), Cancelled> {
        let Some(dst) = self.dest_path(src) else {
            return Ok(());
        };
        let meta = match tokio::fs::symlink_metadata(src).await {
            Ok(meta) => meta,
            Err(_) => {
                debug!("{} vanished before it could be mirrored", src);
                return Ok(());
            }
        };

        if meta.is_dir() {
            return self.sync_dir(src, &dst).await;
        }
        if !meta.is_file() {
            debug!("Skipping special file {}", src);
            return Ok(());
        }
        if !needs_copy_at(src, &dst, self.live_policy.as_ref()).await {
            trace!("{} is up to date", dst);
            return Ok(());
        }

        if dst.is_dir() {
            // The source replaced a directory with a file.
            self.reconcile(src, &dst).await?;
            self.delete_dest(&dst, true).await?;
        }

        let outcome = {
            let _guard = self.gate.lock().await;
            self.ops.copy(src, &dst, &self.cancel).await?
        };
        self.reporter
            .record(Phase::Monitoring, OpKind::Copy, &dst, &outcome);
        Ok(())
    }

    async fn sync_dir(&mut self, src: &Utf8Path, dst: &Utf8Path) -> Result<(), Cancelled> {
        if dst.is_file() {
            self.delete_dest(dst, false).await?;
        }
        if !dst.is_dir() {
            let res = {
                let _guard = self.gate.lock().await;
                tokio::fs::create_dir_all(dst).await
            };
            match res {
                Ok(()) => self.reporter.dir_created(dst),
                Err(e) => {
                    self.reporter.dir_failed(Phase::Monitoring, dst, e);
                    return Ok(());
                }
            }
        }
        // Contents may have arrived before the watch on the new directory.
        self.reconcile(src, dst).await
    }

    async fn remove(&mut self, src: &Utf8Path) -> Result<(), Cancelled> {
        let Some(dst) = self.dest_path(src) else {
            return Ok(());
        };
        if tokio::fs::symlink_metadata(src).await.is_ok() {
            debug!("{} reappeared, syncing instead of deleting", src);
            return self.sync(src).await;
        }
        let meta = match tokio::fs::symlink_metadata(&dst).await {
            Ok(meta) => meta,
            Err(_) => {
                trace!("{} was never mirrored", dst);
                return Ok(());
            }
        };

        let is_dir = meta.is_dir();
        if is_dir && !is_empty_dir(&dst).await {
            // The whole subtree left the source, e.g. moved out of the watched tree.
            self.reconcile(src, &dst).await?;
        }
        if self.delete_dest(&dst, is_dir).await? {
            self.prune_parents(&dst).await?;
        }
        Ok(())
    }

    async fn rename(&mut self, from: &Utf8Path, to: &Utf8Path) -> Result<(), Cancelled> {
        let (old, new) = match (self.dest_path(from), self.dest_path(to)) {
            (Some(old), Some(new)) => (old, new),
            (None, Some(_)) => return self.sync(to).await,
            (Some(_), None) => return self.remove(from).await,
            (None, None) => return Ok(()),
        };

        if tokio::fs::symlink_metadata(&old).await.is_err() {
            debug!("{} not mirrored yet, copying {} instead", old, to);
            return self.sync(to).await;
        }
        if tokio::fs::symlink_metadata(to).await.is_err() {
            debug!("{} moved on again before it could be mirrored", to);
            return self.remove(from).await;
        }

        let outcome = {
            let _guard = self.gate.lock().await;
            self.ops.move_or_rename(&old, &new, &self.cancel).await?
        };
        let moved = outcome.is_completed();
        self.reporter
            .record(Phase::Monitoring, OpKind::Rename, &new, &outcome);

        if moved {
            self.prune_parents(&old).await?;
        } else {
            self.remove(from).await?;
        }
        // Content may have changed between the move and now.
        self.sync(to).await
    }

    /// Returns whether the path is gone afterwards.
    async fn delete_dest(&mut self, dst: &Utf8Path, is_dir: bool) -> Result<bool, Cancelled> {
        let outcome = {
            let _guard = self.gate.lock().await;
            self.ops.delete(dst, &self.cancel).await?
        };
        if is_dir {
            match &outcome {
                OpOutcome::Completed { .. } => self.reporter.dir_removed(dst),
                OpOutcome::Missing => {}
                other => {
                    if let Some(e) = other.error() {
                        self.reporter.dir_failed(Phase::Monitoring, dst, e);
                    }
                }
            }
        } else {
            self.reporter
                .record(Phase::Monitoring, OpKind::Delete, dst, &outcome);
        }
        Ok(matches!(
            outcome,
            OpOutcome::Completed { .. } | OpOutcome::Missing
        ))
    }

    /// Remove directories left empty above `dst`, stopping below the dest root.
    async fn prune_parents(&mut self, dst: &Utf8Path) -> Result<(), Cancelled> {
        let mut current = dst.parent().map(Utf8Path::to_owned);
        while let Some(dir) = current {
            if dir == self.dest_root || !MirrorPath::is_within(&self.dest_root, &dir) {
                break;
            }
            if !is_empty_dir(&dir).await {
                break;
            }
            let outcome = {
                let _guard = self.gate.lock().await;
                self.ops.delete(&dir, &self.cancel).await?
            };
            if !outcome.is_completed() {
                break;
            }
            self.reporter.dir_removed(&dir);
            current = dir.parent().map(Utf8Path::to_owned);
        }
        Ok(())
    }

    /// Bring the destination subtree at `dst` in line with `src`.
    async fn reconcile(&mut self, src: &Utf8Path, dst: &Utf8Path) -> Result<(), Cancelled> {
        let plan = match analyze(src, dst, self.policy.clone(), &self.cancel, None).await {
            Ok(plan) => plan,
            Err(MirrorError::Cancelled) => return Err(Cancelled),
            Err(e) => {
                self.reporter
                    .warn(Phase::Monitoring, format!("Could not rescan {}: {}", src, e));
                return Ok(());
            }
        };
        if plan.is_empty() {
            return Ok(());
        }

        let reconciler = Reconciler::new(self.ops.clone(), self.gate.clone());
        let mut sub = ProgressReporter::new(self.reporter.sink());
        let stats = reconciler.execute(&plan, &mut sub, &self.cancel).await?;
        self.reporter.absorb(&stats);
        self.reporter.status(Phase::Monitoring, "Watching");
        Ok(())
    }

    async fn rescan_tree(&mut self) -> Result<(), Cancelled> {
        self.reporter.status_with_message(
            Phase::Monitoring,
            "Rescanning",
            "Change notifications were lost, reconciling the whole tree",
        );
        let (src, dst) = (self.source_root.clone(), self.dest_root.clone());
        self.reconcile(&src, &dst).await
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}
