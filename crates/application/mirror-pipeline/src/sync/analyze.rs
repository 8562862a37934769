use std::sync::Arc;

use camino::Utf8Path;
use mirror_core::diff::diff;
use mirror_core::{CopyPolicy, Phase, ProgressEvent, SyncPlan};
use mirror_scanner::{ScanStats, Scanner};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::sync::MirrorError;
use crate::tracker::{ProgressReporter, ProgressSink};

/// Snapshot both trees off the async runtime and compute the plan.
pub async fn analyze(
    source: &Utf8Path,
    dest: &Utf8Path,
    policy: Arc<dyn CopyPolicy>,
    cancel: &CancellationToken,
    sink: Option<Arc<dyn ProgressSink>>,
) -> Result<SyncPlan, MirrorError> {
    if let Some(sink) = &sink {
        sink.report(ProgressEvent::new(Phase::Analysis, "Analyzing").with_detail(source.as_str()));
    }

    let source_owned = source.to_owned();
    let dest_owned = dest.to_owned();
    let cancel_owned = cancel.clone();
    let scan_sink = sink.clone();

    let (plan, skipped) = tokio::task::spawn_blocking(move || {
        let cb = scan_sink
            .map(|sink| move |stats: ScanStats| ProgressReporter::scan_progress(sink.as_ref(), stats));
        let cb_ref: Option<&(dyn Fn(ScanStats) + Send + Sync)> = cb.as_ref().map(|f| f as _);
        let (src_tree, dst_tree) =
            Scanner::snapshot_pair(&source_owned, &dest_owned, &cancel_owned, cb_ref)?;
        let skipped: Vec<_> = [&src_tree, &dst_tree]
            .into_iter()
            .flat_map(|tree| tree.skipped.iter().map(|rel| tree.root.join(rel)))
            .collect();
        Ok::<_, MirrorError>((diff(&src_tree, &dst_tree, policy.as_ref()), skipped))
    })
    .await??;

    if let Some(sink) = &sink {
        for path in &skipped {
            sink.report(
                ProgressEvent::new(Phase::Analysis, "Warning")
                    .with_detail(path.as_str())
                    .with_message(format!("Skipped unreadable entry {}", path)),
            );
        }
    }

    info!(
        "Plan for {} -> {}: {} to copy, {} to delete, {} dirs to create, {} stale dirs",
        source,
        dest,
        plan.to_copy.len(),
        plan.to_delete.len(),
        plan.dirs_to_create.len(),
        plan.stale_dirs.len()
    );

    if let Some(sink) = &sink {
        sink.report(
            ProgressEvent::new(Phase::Analysis, "Analysis complete")
                .with_percent(100.0)
                .with_message(format!(
                    "{} to copy, {} to delete",
                    plan.to_copy.len(),
                    plan.to_delete.len()
                )),
        );
    }

    Ok(plan)
}

/// Whether the source file at `src` should overwrite `dst` under `policy`.
/// A missing or non-file source never needs copying.
pub async fn needs_copy_at(src: &Utf8Path, dst: &Utf8Path, policy: &dyn CopyPolicy) -> bool {
    let source = match tokio::fs::metadata(src).await {
        Ok(meta) if meta.is_file() => Scanner::entry(&meta),
        _ => return false,
    };
    let dest = match tokio::fs::metadata(dst).await {
        Ok(meta) if meta.is_file() => Some(Scanner::entry(&meta)),
        _ => None,
    };
    policy.needs_copy(&source, dest.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use mirror_core::MetadataDiff;
    use tempfile::tempdir;

    #[tokio::test]
    async fn analyze_plans_copy_into_missing_dest() {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let src = root.join("src");
        std::fs::create_dir_all(src.join("sub")).unwrap();
        std::fs::write(src.join("sub/a.txt"), b"a").unwrap();

        let plan = analyze(
            &src,
            &root.join("dst"),
            Arc::new(MetadataDiff::default()),
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(plan.to_copy, vec![src.join("sub/a.txt")]);
        assert_eq!(plan.dirs_to_create, vec![root.join("dst/sub")]);
    }

    #[tokio::test]
    async fn cancelled_analysis_is_cancelled() {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        std::fs::write(root.join("a"), b"a").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let res = analyze(
            &root,
            &root.join("out"),
            Arc::new(MetadataDiff::default()),
            &cancel,
            None,
        )
        .await;

        assert!(matches!(res, Err(MirrorError::Cancelled)));
    }

    #[tokio::test]
    async fn needs_copy_at_compares_metadata() {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        std::fs::write(root.join("a"), b"same").unwrap();
        let policy = MetadataDiff::default();

        assert!(needs_copy_at(&root.join("a"), &root.join("b"), &policy).await);
        assert!(!needs_copy_at(&root.join("missing"), &root.join("b"), &policy).await);

        std::fs::copy(root.join("a"), root.join("b")).unwrap();
        let mtime = filetime::FileTime::from_unix_time(1_000, 0);
        filetime::set_file_mtime(root.join("a"), mtime).unwrap();
        filetime::set_file_mtime(root.join("b"), mtime).unwrap();
        assert!(!needs_copy_at(&root.join("a"), &root.join("b"), &policy).await);
    }
}
