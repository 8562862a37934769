use crate::{FileEntry, SyncPlan, TreeSnapshot};
use std::time::Duration;

/// Decides whether a source file must be written to the destination.
pub trait CopyPolicy: Send + Sync {
    fn needs_copy(&self, source: &FileEntry, dest: Option<&FileEntry>) -> bool;

    fn name(&self) -> &'static str;
}

/// Naive mirror: every source file is rewritten on each pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysCopy;

impl CopyPolicy for AlwaysCopy {
    fn needs_copy(&self, _source: &FileEntry, _dest: Option<&FileEntry>) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "always-copy"
    }
}

/// Size/mtime comparison with a tolerance for coarse filesystem timestamps.
#[derive(Debug, Clone, Copy)]
pub struct MetadataDiff {
    pub mtime_tolerance: Duration,
}

impl MetadataDiff {
    pub fn new(mtime_tolerance: Duration) -> Self {
        Self { mtime_tolerance }
    }
}

impl Default for MetadataDiff {
    fn default() -> Self {
        Self::new(Duration::from_millis(
            mirror_config::DEFAULT_MTIME_TOLERANCE_MS,
        ))
    }
}

impl CopyPolicy for MetadataDiff {
    fn needs_copy(&self, source: &FileEntry, dest: Option<&FileEntry>) -> bool {
        let Some(dest) = dest else {
            return true;
        };
        if source.size != dest.size {
            return true;
        }
        let delta = source.mtime_ms.abs_diff(dest.mtime_ms);
        delta > self.mtime_tolerance.as_millis() as u64
    }

    fn name(&self) -> &'static str {
        "metadata-diff"
    }
}

pub fn diff(source: &TreeSnapshot, dest: &TreeSnapshot, policy: &dyn CopyPolicy) -> SyncPlan {
    let mut to_copy = Vec::new();
    let mut to_delete = Vec::new();
    let mut dirs_to_create = Vec::new();
    let mut stale_dirs = Vec::new();

    for rel in dest.files.keys() {
        if !source.files.contains_key(rel) && !source.is_skipped(rel) {
            to_delete.push(dest.root.join(rel));
        }
    }

    for (rel, source_file) in &source.files {
        if policy.needs_copy(source_file, dest.files.get(rel)) {
            to_copy.push(source.root.join(rel));
        }
    }

    for rel in &source.dirs {
        if !dest.dirs.contains(rel) {
            dirs_to_create.push(dest.root.join(rel));
        }
    }

    for rel in &dest.dirs {
        if !source.dirs.contains(rel) && !source.is_skipped(rel) {
            stale_dirs.push(dest.root.join(rel));
        }
    }

    SyncPlan {
        source_root: source.root.clone(),
        dest_root: dest.root.clone(),
        to_copy,
        to_delete,
        dirs_to_create,
        stale_dirs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    fn entry(size: u64, mtime_ms: i64) -> FileEntry {
        FileEntry { size, mtime_ms }
    }

    #[test]
    fn metadata_diff_copies_missing_and_resized() {
        let policy = MetadataDiff::default();
        assert!(policy.needs_copy(&entry(5, 0), None));
        assert!(policy.needs_copy(&entry(5, 0), Some(&entry(6, 0))));
    }

    #[test]
    fn metadata_diff_honours_tolerance() {
        let policy = MetadataDiff::default();
        assert!(!policy.needs_copy(&entry(5, 10_000), Some(&entry(5, 11_999))));
        assert!(!policy.needs_copy(&entry(5, 10_000), Some(&entry(5, 12_000))));
        assert!(policy.needs_copy(&entry(5, 10_000), Some(&entry(5, 12_001))));
        assert!(policy.needs_copy(&entry(5, 12_001), Some(&entry(5, 10_000))));
    }

    #[test]
    fn unreadable_source_entries_protect_their_destination() {
        let mut source = TreeSnapshot::empty("/src");
        source.dirs.insert("locked".into());
        source.skipped.insert("locked".into());
        let mut dest = TreeSnapshot::empty("/dst");
        dest.dirs.insert("locked".into());
        dest.dirs.insert("locked/inner".into());
        dest.files.insert("locked/inner/a.txt".into(), entry(1, 0));
        dest.files.insert("lockedness.txt".into(), entry(1, 0));

        let plan = diff(&source, &dest, &MetadataDiff::default());

        assert_eq!(plan.to_delete, vec![Utf8PathBuf::from("/dst/lockedness.txt")]);
        assert!(plan.stale_dirs.is_empty());
    }

    #[test]
    fn always_copy_ignores_metadata() {
        assert!(AlwaysCopy.needs_copy(&entry(5, 0), Some(&entry(5, 0))));
    }
}
