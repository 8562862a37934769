use std::collections::BTreeSet;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use mirror_core::path_utils::MirrorPath;
use mirror_core::{Phase, SyncPlan};
use mirror_infra::{Cancelled, FileOps, OpOutcome};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::sync::SyncStats;
use crate::tracker::{OpKind, ProgressReporter};

/// Applies a `SyncPlan` to the destination: deletes, then creates and copies,
/// then prunes directories the source no longer has.
///
/// Every destination mutation happens while holding `gate`, which is shared
/// with the live watcher so the two never touch the tree at the same time.
/// Counts accumulate in the reporter passed to `execute`; hand it a fresh one
/// per run.
pub struct Reconciler {
    ops: Arc<dyn FileOps>,
    gate: Arc<Mutex<()>>,
}

impl Reconciler {
    pub fn new(ops: Arc<dyn FileOps>, gate: Arc<Mutex<()>>) -> Self {
        Self { ops, gate }
    }

    pub async fn execute(
        &self,
        plan: &SyncPlan,
        reporter: &mut ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<SyncStats, Cancelled> {
        if plan.is_empty() {
            info!("{} is already synchronized", plan.dest_root);
            reporter.begin(0);
            reporter.status(Phase::Copy, "Already synchronized");
            return Ok(SyncStats::default());
        }

        reporter.begin(plan.total_operations() as u64);

        // Cleanup
        let mut prune: BTreeSet<Utf8PathBuf> = BTreeSet::new();
        if !plan.to_delete.is_empty() {
            reporter.status(Phase::Cleanup, "Removing stale files");
        }
        for path in &plan.to_delete {
            check(cancel)?;
            let outcome = {
                let _guard = self.gate.lock().await;
                self.ops.delete(path, cancel).await?
            };
            reporter.record(Phase::Cleanup, OpKind::Delete, path, &outcome);
            collect_parents(path, &plan.dest_root, &mut prune);
        }
        prune.extend(plan.stale_dirs.iter().cloned());

        // Copy
        reporter.status(Phase::Copy, "Copying");
        for dir in &plan.dirs_to_create {
            check(cancel)?;
            let res = {
                let _guard = self.gate.lock().await;
                tokio::fs::create_dir_all(dir).await
            };
            match res {
                Ok(()) => reporter.dir_created(dir),
                Err(e) => reporter.dir_failed(Phase::Copy, dir, e),
            }
        }

        for src in &plan.to_copy {
            check(cancel)?;
            let Some(dst) = plan.dest_for(src) else {
                reporter.warn(Phase::Copy, format!("Refusing to copy unsafe path {}", src));
                continue;
            };
            if dst.is_dir() {
                // A stale directory stands where the source has a file.
                self.prune_dirs(&stale_under(&plan.stale_dirs, &dst), plan, reporter, cancel)
                    .await?;
            }
            let outcome = {
                let _guard = self.gate.lock().await;
                self.ops.copy(src, &dst, cancel).await?
            };
            reporter.record(Phase::Copy, OpKind::Copy, &dst, &outcome);
        }

        // Prune
        let candidates: Vec<Utf8PathBuf> = prune.into_iter().collect();
        self.prune_dirs(&candidates, plan, reporter, cancel).await?;

        let stats = reporter.stats().clone();

        info!(
            "Reconciled {}: {} copied, {} deleted, {} dirs pruned, {} failures",
            plan.dest_root,
            stats.files_copied,
            stats.files_deleted,
            stats.dirs_removed,
            stats.failures
        );
        if stats.failures > 0 {
            reporter.status_with_message(
                Phase::Copy,
                "Synchronized with errors",
                format!("{} operations failed", stats.failures),
            );
        } else {
            reporter.status(Phase::Copy, "Synchronized");
        }

        Ok(stats)
    }

    /// Remove empty directories with no source counterpart, deepest first.
    /// The destination root is never removed.
    async fn prune_dirs(
        &self,
        candidates: &[Utf8PathBuf],
        plan: &SyncPlan,
        reporter: &mut ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<(), Cancelled> {
        let mut ordered: Vec<&Utf8PathBuf> = candidates.iter().collect();
        ordered.sort_by_key(|p| std::cmp::Reverse(MirrorPath::depth(p)));

        for dir in ordered {
            check(cancel)?;
            if *dir == plan.dest_root || !MirrorPath::is_within(&plan.dest_root, dir) {
                continue;
            }
            let in_source = MirrorPath::rebase(dir, &plan.dest_root, &plan.source_root)
                .map(|p| p.is_dir())
                .unwrap_or(false);
            if in_source || !is_empty_dir(dir).await {
                continue;
            }

            let outcome = {
                let _guard = self.gate.lock().await;
                self.ops.delete(dir, cancel).await?
            };
            match outcome {
                OpOutcome::Completed { .. } => reporter.dir_removed(dir),
                OpOutcome::Missing => debug!("{} already gone", dir),
                other => {
                    if let Some(e) = other.error() {
                        reporter.dir_failed(Phase::Cleanup, dir, e);
                    }
                }
            }
        }
        Ok(())
    }
}

fn check(cancel: &CancellationToken) -> Result<(), Cancelled> {
    if cancel.is_cancelled() {
        Err(Cancelled)
    } else {
        Ok(())
    }
}

/// Every ancestor of `path` strictly below `root`.
pub(crate) fn collect_parents(path: &Utf8Path, root: &Utf8Path, out: &mut BTreeSet<Utf8PathBuf>) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == root || !MirrorPath::is_within(root, dir) {
            break;
        }
        out.insert(dir.to_owned());
        current = dir.parent();
    }
}

fn stale_under(stale: &[Utf8PathBuf], dir: &Utf8Path) -> Vec<Utf8PathBuf> {
    stale
        .iter()
        .filter(|p| MirrorPath::is_within(dir, p))
        .cloned()
        .collect()
}

pub(crate) async fn is_empty_dir(path: &Utf8Path) -> bool {
    match tokio::fs::read_dir(path).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parents_stop_below_root() {
        let mut out = BTreeSet::new();
        collect_parents(
            Utf8Path::new("/dst/a/b/c.txt"),
            Utf8Path::new("/dst"),
            &mut out,
        );
        let got: Vec<&str> = out.iter().map(|p| p.as_str()).collect();
        assert_eq!(got, vec!["/dst/a", "/dst/a/b"]);
    }

    #[test]
    fn file_at_root_has_no_parents() {
        let mut out = BTreeSet::new();
        collect_parents(Utf8Path::new("/dst/c.txt"), Utf8Path::new("/dst"), &mut out);
        assert!(out.is_empty());
    }
}
