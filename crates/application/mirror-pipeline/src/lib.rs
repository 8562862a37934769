pub mod sync;
pub mod tracker;
pub mod watch;

pub use sync::{
    analyze, CopyMode, MirrorEngine, MirrorError, MirrorOptions, Reconciler, RunOutcome,
    RunReport, SyncStats,
};
pub use tracker::{FnSink, NullSink, OpKind, ProgressReporter, ProgressSink};
pub use watch::{ChangeWatcher, EventDebouncer, WatchConfig, WatchEvent};

// Re-export types consumers need alongside the engine
pub use mirror_core::{EngineState, Phase, ProgressEvent, SyncPlan};
pub use mirror_scanner::ScanStats;
