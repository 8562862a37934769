use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use mirror_core::path_utils::MirrorPath;
use mirror_core::{EngineState, Phase, ProgressEvent};
use mirror_infra::{FileOps, RetryingFileOps};
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::sync::analyze::analyze;
use crate::sync::execute::Reconciler;
use crate::sync::{MirrorError, MirrorOptions, RunOutcome, RunReport, SyncStats};
use crate::tracker::{ProgressReporter, ProgressSink};
use crate::watch::{ChangeWatcher, WatchConfig};

/// Mirrors one source tree into one destination: a full reconciliation, then
/// (for `start`) live monitoring until stopped.
///
/// At most one session runs per engine. Share the engine behind an `Arc` to
/// call `stop` from another task.
pub struct MirrorEngine {
    options: MirrorOptions,
    ops: Arc<dyn FileOps>,
    state: watch::Sender<EngineState>,
    session: StdMutex<Option<CancellationToken>>,
}

impl MirrorEngine {
    pub fn new(options: MirrorOptions) -> Self {
        let ops = Arc::new(RetryingFileOps::new(options.retry_policy()));
        Self::with_file_ops(options, ops)
    }

    pub fn with_file_ops(options: MirrorOptions, ops: Arc<dyn FileOps>) -> Self {
        let (state, _) = watch::channel(EngineState::Idle);
        Self {
            options,
            ops,
            state,
            session: StdMutex::new(None),
        }
    }

    pub fn options(&self) -> &MirrorOptions {
        &self.options
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_active()
    }

    /// Reconcile, then watch the source until `stop` is called, `cancel`
    /// fires, or the source root disappears.
    pub async fn start(
        &self,
        source: &Utf8Path,
        dest: &Utf8Path,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<RunReport, MirrorError> {
        self.run(source, dest, progress, cancel, true).await
    }

    /// Reconcile once and return without watching.
    pub async fn reconcile_once(
        &self,
        source: &Utf8Path,
        dest: &Utf8Path,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<RunReport, MirrorError> {
        self.run(source, dest, progress, cancel, false).await
    }

    /// Cancel the active session and wait up to the stop grace period for it
    /// to wind down. Safe to call repeatedly or with nothing running.
    pub async fn stop(&self) {
        let token = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(token) = token else {
            debug!("Stop requested with no active session");
            return;
        };

        info!("Stopping mirror session");
        token.cancel();
        self.state.send_if_modified(|s| {
            if matches!(*s, EngineState::Syncing | EngineState::Monitoring) {
                *s = EngineState::Stopping;
                true
            } else {
                false
            }
        });

        let grace = self.options.stop_grace();
        let mut rx = self.state.subscribe();
        let finished = tokio::time::timeout(grace, async move {
            rx.wait_for(|s| !s.is_active()).await.is_ok()
        })
        .await;
        if finished.is_err() {
            warn!("Mirror session did not finish within {:?}", grace);
        }
    }

    async fn run(
        &self,
        source: &Utf8Path,
        dest: &Utf8Path,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
        monitor: bool,
    ) -> Result<RunReport, MirrorError> {
        if self.is_running() {
            return Ok(self.already_running(&progress));
        }
        let (source, dest) = resolve_roots(source, dest)?;
        let Some(guard) = self.claim(&cancel) else {
            return Ok(self.already_running(&progress));
        };

        let span = info_span!(
            "mirror",
            run_id = %Uuid::new_v4(),
            source = %source,
            dest = %dest
        );
        self.session(guard, source, dest, progress, monitor)
            .instrument(span)
            .await
    }

    async fn session(
        &self,
        mut guard: SessionGuard<'_>,
        source: Utf8PathBuf,
        dest: Utf8PathBuf,
        progress: Arc<dyn ProgressSink>,
        monitor: bool,
    ) -> Result<RunReport, MirrorError> {
        let token = guard.token.clone();
        info!("Mirroring {} -> {}", source, dest);

        if let Err(e) = tokio::fs::create_dir_all(&dest).await {
            return Err(guard.fault(&progress, e.into()));
        }

        let policy = self.options.policy();
        let gate = Arc::new(Mutex::new(()));

        let plan = match analyze(&source, &dest, policy.clone(), &token, Some(progress.clone())).await
        {
            Ok(plan) => plan,
            Err(MirrorError::Cancelled) => {
                return Ok(guard.stopped(&progress, SyncStats::default(), SyncStats::default()))
            }
            Err(e) => return Err(guard.fault(&progress, e)),
        };

        let reconciler = Reconciler::new(self.ops.clone(), gate.clone());
        let mut reporter = ProgressReporter::new(progress.clone());
        let initial = match reconciler.execute(&plan, &mut reporter, &token).await {
            Ok(stats) => stats,
            Err(_) => {
                let partial = reporter.into_stats();
                return Ok(guard.stopped(&progress, partial, SyncStats::default()));
            }
        };

        if !monitor {
            return Ok(RunReport::new(
                RunOutcome::Completed,
                initial,
                SyncStats::default(),
            ));
        }
        if token.is_cancelled() {
            return Ok(guard.stopped(&progress, initial, SyncStats::default()));
        }

        self.transition(EngineState::Syncing, EngineState::Monitoring);
        let config = WatchConfig {
            source_root: source.clone(),
            dest_root: dest.clone(),
            debounce: self.options.debounce_window(),
            queue_capacity: self.options.queue_capacity(),
            policy,
            live_policy: self.options.live_policy(),
        };
        let watcher = match ChangeWatcher::arm(
            config,
            self.ops.clone(),
            gate,
            progress.clone(),
            token.clone(),
        ) {
            Ok(watcher) => watcher,
            Err(e) => return Err(guard.fault(&progress, e.into())),
        };
        progress.report(
            ProgressEvent::new(Phase::Monitoring, "Watching")
                .with_percent(100.0)
                .with_detail(source.as_str()),
        );

        let vanished = keep_alive(&source, &token).await;

        self.transition(EngineState::Monitoring, EngineState::Stopping);
        token.cancel();
        let live = watcher.disarm(self.options.stop_grace() / 2).await;

        if vanished {
            return Err(guard.fault(&progress, MirrorError::SourceVanished(source)));
        }
        Ok(guard.stopped(&progress, initial, live))
    }

    fn claim(&self, external: &CancellationToken) -> Option<SessionGuard<'_>> {
        let claimed = self.state.send_if_modified(|s| {
            if s.is_active() {
                false
            } else {
                *s = EngineState::Syncing;
                true
            }
        });
        if !claimed {
            return None;
        }

        let token = external.child_token();
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        Some(SessionGuard {
            engine: self,
            token,
            final_state: EngineState::Stopped,
        })
    }

    fn transition(&self, from: EngineState, to: EngineState) {
        self.state.send_if_modified(|s| {
            if *s == from {
                *s = to;
                true
            } else {
                false
            }
        });
    }

    fn already_running(&self, progress: &Arc<dyn ProgressSink>) -> RunReport {
        let state = self.state();
        warn!("Mirror already running ({:?}), ignoring start", state);
        let phase = if state == EngineState::Monitoring {
            Phase::Monitoring
        } else {
            Phase::Analysis
        };
        progress.report(
            ProgressEvent::new(phase, "Already running")
                .with_message("A mirror session is already active"),
        );
        RunReport::already_running()
    }
}

impl Drop for MirrorEngine {
    fn drop(&mut self) {
        if let Some(token) = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }
}

/// Owns the session's cancellation source. Dropping it, on any exit path,
/// cancels outstanding work and publishes the final state.
struct SessionGuard<'a> {
    engine: &'a MirrorEngine,
    token: CancellationToken,
    final_state: EngineState,
}

impl SessionGuard<'_> {
    fn stopped(
        &mut self,
        progress: &Arc<dyn ProgressSink>,
        initial: SyncStats,
        live: SyncStats,
    ) -> RunReport {
        info!(
            "Mirror stopped ({} copied, {} deleted while watching)",
            live.files_copied, live.files_deleted
        );
        progress.report(
            ProgressEvent::new(Phase::Monitoring, "Stopped")
                .with_percent(100.0)
                .with_message(format!(
                    "{} files copied, {} deleted",
                    initial.files_copied + live.files_copied,
                    initial.files_deleted + live.files_deleted
                )),
        );
        self.final_state = EngineState::Stopped;
        RunReport::new(RunOutcome::Stopped, initial, live)
    }

    fn fault(&mut self, progress: &Arc<dyn ProgressSink>, err: MirrorError) -> MirrorError {
        error!("Mirror session failed: {}", err);
        progress.report(
            ProgressEvent::new(Phase::Monitoring, "Faulted")
                .with_percent(100.0)
                .with_message(err.to_string()),
        );
        self.final_state = EngineState::Faulted;
        err
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.token.cancel();
        *self
            .engine
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.engine.state.send_replace(self.final_state);
    }
}

/// Poll until cancelled. Returns true when the source root disappeared.
async fn keep_alive(source: &Utf8Path, token: &CancellationToken) -> bool {
    let mut ticker =
        tokio::time::interval(Duration::from_millis(mirror_config::SOURCE_POLL_INTERVAL_MS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => return false,
            _ = ticker.tick() => {
                let present = tokio::fs::metadata(source)
                    .await
                    .map(|m| m.is_dir())
                    .unwrap_or(false);
                if !present {
                    error!("Source root {} is gone", source);
                    return true;
                }
            }
        }
    }
}

/// Validate and canonicalize both roots. The destination may not exist yet.
fn resolve_roots(
    source: &Utf8Path,
    dest: &Utf8Path,
) -> Result<(Utf8PathBuf, Utf8PathBuf), MirrorError> {
    if source.as_str().trim().is_empty() || dest.as_str().trim().is_empty() {
        return Err(MirrorError::Validation(
            "Source and destination must both be set".into(),
        ));
    }

    let source_abs = source.canonicalize_utf8().map_err(|_| {
        MirrorError::Validation(format!("Source directory does not exist: {}", source))
    })?;
    if !source_abs.is_dir() {
        return Err(MirrorError::Validation(format!(
            "Source is not a directory: {}",
            source
        )));
    }

    let dest_abs = absolute_dest(dest)?;
    if dest_abs.exists() && !dest_abs.is_dir() {
        return Err(MirrorError::Validation(format!(
            "Destination exists and is not a directory: {}",
            dest
        )));
    }
    if source_abs == dest_abs {
        return Err(MirrorError::Validation(
            "Source and destination are the same directory".into(),
        ));
    }
    if MirrorPath::is_within(&source_abs, &dest_abs) {
        return Err(MirrorError::Validation(format!(
            "Destination {} is inside the source {}",
            dest, source
        )));
    }
    if MirrorPath::is_within(&dest_abs, &source_abs) {
        return Err(MirrorError::Validation(format!(
            "Source {} is inside the destination {}",
            source, dest
        )));
    }

    Ok((source_abs, dest_abs))
}

fn absolute_dest(dest: &Utf8Path) -> Result<Utf8PathBuf, MirrorError> {
    let mut missing = Vec::new();
    let mut current = dest.to_owned();
    loop {
        if let Ok(base) = current.canonicalize_utf8() {
            let mut out = base;
            for part in missing.iter().rev() {
                out.push(part);
            }
            return Ok(out);
        }
        let name = current.file_name().map(str::to_owned).ok_or_else(|| {
            MirrorError::Validation(format!("Cannot resolve destination {}", dest))
        })?;
        missing.push(name);
        current = match current.parent() {
            Some(p) if !p.as_str().is_empty() => p.to_owned(),
            _ => Utf8PathBuf::from("."),
        };
    }
}
