use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use mirror_infra::{Cancelled, FileOps, OpOutcome, RetryingFileOps};
use mirror_pipeline::{
    EngineState, MirrorEngine, MirrorError, MirrorOptions, NullSink, RunOutcome, RunReport,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Delegates to the real operations and counts copies per destination.
#[derive(Default)]
struct CountingOps {
    inner: RetryingFileOps,
    copies: Mutex<HashMap<Utf8PathBuf, u32>>,
}

impl CountingOps {
    fn copies_of(&self, path: &Utf8Path) -> u32 {
        self.copies
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl FileOps for CountingOps {
    async fn copy(
        &self,
        src: &Utf8Path,
        dst: &Utf8Path,
        cancel: &CancellationToken,
    ) -> Result<OpOutcome, Cancelled> {
        *self.copies.lock().unwrap().entry(dst.to_owned()).or_default() += 1;
        self.inner.copy(src, dst, cancel).await
    }

    async fn delete(
        &self,
        path: &Utf8Path,
        cancel: &CancellationToken,
    ) -> Result<OpOutcome, Cancelled> {
        self.inner.delete(path, cancel).await
    }

    async fn move_or_rename(
        &self,
        from: &Utf8Path,
        to: &Utf8Path,
        cancel: &CancellationToken,
    ) -> Result<OpOutcome, Cancelled> {
        self.inner.move_or_rename(from, to, cancel).await
    }
}

struct Session {
    _dir: tempfile::TempDir,
    src: Utf8PathBuf,
    dst: Utf8PathBuf,
    engine: Arc<MirrorEngine>,
    ops: Arc<CountingOps>,
    cancel: CancellationToken,
    task: JoinHandle<Result<RunReport, MirrorError>>,
}

async fn start_session(seed: &[(&str, &[u8])]) -> Session {
    let dir = tempfile::tempdir().unwrap();
    // Canonical so paths compare equal to what the engine reports.
    let root = Utf8PathBuf::from_path_buf(dir.path().canonicalize().unwrap()).unwrap();
    let src = root.join("src");
    let dst = root.join("dst");
    fs::create_dir_all(&src).unwrap();
    for (rel, body) in seed {
        let path = src.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    let ops = Arc::new(CountingOps::default());
    let opts = MirrorOptions {
        debounce_ms: 200,
        ..Default::default()
    };
    let engine = Arc::new(MirrorEngine::with_file_ops(opts, ops.clone()));
    let cancel = CancellationToken::new();

    let task = {
        let engine = engine.clone();
        let (src, dst, cancel) = (src.clone(), dst.clone(), cancel.clone());
        tokio::spawn(async move { engine.start(&src, &dst, Arc::new(NullSink), cancel).await })
    };

    let mut state = engine.subscribe_state();
    tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|s| *s == EngineState::Monitoring),
    )
    .await
    .expect("Engine should reach monitoring")
    .unwrap();
    // Give the backend a moment to install its watches.
    tokio::time::sleep(Duration::from_millis(100)).await;

    Session {
        _dir: dir,
        src,
        dst,
        engine,
        ops,
        cancel,
        task,
    }
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("Timed out waiting for: {what}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn created_file_is_mirrored() {
    let s = start_session(&[("seed.txt", b"seed")]).await;
    assert_eq!(fs::read(s.dst.join("seed.txt")).unwrap(), b"seed");

    fs::create_dir_all(s.src.join("new/dir")).unwrap();
    fs::write(s.src.join("new/dir/file.txt"), b"fresh").unwrap();

    let target = s.dst.join("new/dir/file.txt");
    eventually("new file in destination", || {
        fs::read(&target).map(|b| b == b"fresh").unwrap_or(false)
    })
    .await;

    s.engine.stop().await;
    let report = s.task.await.unwrap().unwrap();
    assert_eq!(report.outcome, RunOutcome::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deleting_last_file_prunes_empty_parents() {
    let s = start_session(&[("a/b/only.txt", b"x"), ("keep.txt", b"k")]).await;
    assert!(s.dst.join("a/b/only.txt").exists());

    fs::remove_file(s.src.join("a/b/only.txt")).unwrap();

    let (gone_file, gone_dir) = (s.dst.join("a/b/only.txt"), s.dst.join("a"));
    eventually("file and empty parents removed", || {
        !gone_file.exists() && !gone_dir.exists()
    })
    .await;
    assert!(s.dst.join("keep.txt").exists());
    assert!(s.dst.exists(), "Destination root is never pruned");

    s.engine.stop().await;
    s.task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn renamed_file_moves_in_destination() {
    let s = start_session(&[("old-name.txt", b"contents")]).await;

    fs::rename(s.src.join("old-name.txt"), s.src.join("new-name.txt")).unwrap();

    let (old, new) = (s.dst.join("old-name.txt"), s.dst.join("new-name.txt"));
    eventually("rename applied", || {
        !old.exists() && fs::read(&new).map(|b| b == b"contents").unwrap_or(false)
    })
    .await;

    s.engine.stop().await;
    s.task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn burst_of_writes_is_copied_once_with_final_content() {
    let s = start_session(&[]).await;
    let path = s.src.join("busy.log");

    for i in 0..10 {
        fs::write(&path, format!("revision {i}")).unwrap();
    }

    let target = s.dst.join("busy.log");
    eventually("final revision mirrored", || {
        fs::read(&target)
            .map(|b| b == b"revision 9")
            .unwrap_or(false)
    })
    .await;
    // Past the debounce window, nothing else should be queued for this path.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(s.ops.copies_of(&target), 1);

    s.engine.stop().await;
    s.task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn same_size_edit_soon_after_a_copy_is_mirrored() {
    let s = start_session(&[]).await;
    let (path, target) = (s.src.join("config.ini"), s.dst.join("config.ini"));

    fs::write(&path, b"value=1").unwrap();
    eventually("first value mirrored", || {
        fs::read(&target).map(|b| b == b"value=1").unwrap_or(false)
    })
    .await;

    // Same length, and well inside the bulk mtime tolerance.
    tokio::time::sleep(Duration::from_secs(1)).await;
    fs::write(&path, b"value=2").unwrap();
    eventually("second value mirrored", || {
        fs::read(&target).map(|b| b == b"value=2").unwrap_or(false)
    })
    .await;

    s.engine.stop().await;
    s.task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_start_while_running_is_refused() {
    let s = start_session(&[]).await;

    let again = s
        .engine
        .start(&s.src, &s.dst, Arc::new(NullSink), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(again.outcome, RunOutcome::AlreadyRunning);
    assert_eq!(s.engine.state(), EngineState::Monitoring);

    s.engine.stop().await;
    s.task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_is_prompt_and_idempotent() {
    let s = start_session(&[("a.txt", b"a")]).await;

    tokio::time::timeout(Duration::from_secs(5), s.engine.stop())
        .await
        .expect("stop should finish within the grace period");
    s.engine.stop().await;

    let report = s.task.await.unwrap().unwrap();
    assert_eq!(report.outcome, RunOutcome::Stopped);
    assert_eq!(s.engine.state(), EngineState::Stopped);
    assert!(!s.engine.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn caller_cancellation_ends_session() {
    let s = start_session(&[]).await;

    s.cancel.cancel();
    let report = tokio::time::timeout(Duration::from_secs(5), s.task)
        .await
        .expect("session should end after cancellation")
        .unwrap()
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Stopped);
    assert_eq!(s.engine.state(), EngineState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn vanished_source_faults_the_session() {
    let s = start_session(&[("a.txt", b"a")]).await;

    fs::remove_dir_all(&s.src).unwrap();

    let res = tokio::time::timeout(Duration::from_secs(10), s.task)
        .await
        .expect("session should notice the missing source")
        .unwrap();
    assert!(matches!(res, Err(MirrorError::SourceVanished(_))));
    assert_eq!(s.engine.state(), EngineState::Faulted);

    // A faulted engine can be started again.
    fs::create_dir_all(&s.src).unwrap();
    let report = s
        .engine
        .reconcile_once(&s.src, &s.dst, Arc::new(NullSink), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
}
