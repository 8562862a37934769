use camino::{Utf8Path, Utf8PathBuf};
use mirror_core::path_utils::MirrorPath;
use mirror_core::{FileEntry, TreeSnapshot};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum ScannerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Walk error under {root}: {source}")]
    Walk {
        root: Utf8PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("Non UTF-8 path: {0}")]
    NonUtf8Path(String),
    #[error("Scan cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct ScanStats {
    pub files_scanned: u64,
    pub dirs_scanned: u64,
    pub bytes_scanned: u64,
    /// Entries that could not be read and were left out of the snapshot.
    pub skipped: u64,
}

/// Progress is reported every this many entries.
const PROGRESS_EVERY: u64 = 256;

type ProgressCb<'a> = Option<&'a (dyn Fn(ScanStats) + Send + Sync)>;

pub struct Scanner;

impl Scanner {
    pub fn mtime(meta: &fs::Metadata) -> i64 {
        match meta.modified() {
            Ok(t) => Self::millis_since_epoch(t),
            Err(_) => 0,
        }
    }

    fn millis_since_epoch(t: SystemTime) -> i64 {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_millis() as i64,
            Err(e) => -(e.duration().as_millis() as i64),
        }
    }

    pub fn entry(meta: &fs::Metadata) -> FileEntry {
        FileEntry {
            size: meta.len(),
            mtime_ms: Self::mtime(meta),
        }
    }

    /// Stat a single file; `None` when it is missing or not a regular file.
    pub fn stat_file(path: &Utf8Path) -> Option<FileEntry> {
        let meta = fs::metadata(path).ok()?;
        meta.is_file().then(|| Self::entry(&meta))
    }

    /// Walk `root` recursively. A missing root is an empty tree.
    pub fn snapshot(
        root: &Utf8Path,
        cancel: &CancellationToken,
        on_progress: ProgressCb<'_>,
    ) -> Result<TreeSnapshot, ScannerError> {
        let mut tree = TreeSnapshot::empty(root);
        if !root.exists() {
            debug!("Scan root {} does not exist, treating as empty", root);
            return Ok(tree);
        }

        // Only an unreadable root fails the scan; anything below it is skipped.
        fs::read_dir(root)?;

        let mut stats = ScanStats::default();
        let mut walker = WalkDir::new(root).min_depth(1).into_iter();

        while let Some(walk) = walker.next() {
            if cancel.is_cancelled() {
                return Err(ScannerError::Cancelled);
            }

            let walk = match walk {
                Ok(walk) => walk,
                Err(source) if source.depth() == 0 => {
                    return Err(ScannerError::Walk {
                        root: root.to_owned(),
                        source,
                    })
                }
                Err(e) => {
                    let path = e.path().unwrap_or(root.as_std_path());
                    Self::skip(&mut tree, &mut stats, root, path, &e);
                    continue;
                }
            };
            let Some(fs_path) = Utf8Path::from_path(walk.path()) else {
                let err = ScannerError::NonUtf8Path(walk.path().display().to_string());
                Self::skip(&mut tree, &mut stats, root, walk.path(), &err);
                if walk.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            };
            let Some(rel) = MirrorPath::relative(root, fs_path) else {
                continue;
            };

            let file_type = walk.file_type();
            if file_type.is_dir() {
                tree.dirs.insert(rel);
                stats.dirs_scanned += 1;
            } else if file_type.is_file() {
                let meta = match walk.metadata() {
                    Ok(meta) => meta,
                    Err(e) => {
                        Self::skip(&mut tree, &mut stats, root, walk.path(), &e);
                        continue;
                    }
                };
                let entry = Self::entry(&meta);
                stats.files_scanned += 1;
                stats.bytes_scanned += entry.size;
                tree.files.insert(rel, entry);
            } else {
                debug!("Skipping special file {}", fs_path);
                continue;
            }

            if let Some(cb) = on_progress {
                if (stats.files_scanned + stats.dirs_scanned) % PROGRESS_EVERY == 0 {
                    cb(stats);
                }
            }
        }

        if let Some(cb) = on_progress {
            cb(stats);
        }

        info!(
            "Scanned {} ({} files, {} dirs, {} skipped)",
            root, stats.files_scanned, stats.dirs_scanned, stats.skipped
        );
        Ok(tree)
    }

    fn skip(
        tree: &mut TreeSnapshot,
        stats: &mut ScanStats,
        root: &Utf8Path,
        path: &Path,
        err: &dyn std::fmt::Display,
    ) {
        warn!("Skipping {}: {}", path.display(), err);
        stats.skipped += 1;
        if let Ok(rel) = path.strip_prefix(root.as_std_path()) {
            let rel = MirrorPath::normalize(&rel.to_string_lossy());
            if !rel.is_empty() {
                tree.skipped.insert(rel);
            }
        }
    }

    /// Walk source and destination concurrently.
    pub fn snapshot_pair(
        source: &Utf8Path,
        dest: &Utf8Path,
        cancel: &CancellationToken,
        on_progress: ProgressCb<'_>,
    ) -> Result<(TreeSnapshot, TreeSnapshot), ScannerError> {
        let (src, dst) = rayon::join(
            || Self::snapshot(source, cancel, on_progress),
            || Self::snapshot(dest, cancel, None),
        );
        Ok((src?, dst?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mtime_before_epoch_is_negative() {
        let t = UNIX_EPOCH - std::time::Duration::from_millis(1500);
        assert_eq!(Scanner::millis_since_epoch(t), -1500);
    }

    #[test]
    fn stat_file_ignores_directories() {
        let dir = tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        std::fs::write(root.join("f.txt"), b"abc").unwrap();

        assert_eq!(Scanner::stat_file(&root.join("f.txt")).unwrap().size, 3);
        assert!(Scanner::stat_file(root).is_none());
        assert!(Scanner::stat_file(&root.join("missing")).is_none());
    }
}
