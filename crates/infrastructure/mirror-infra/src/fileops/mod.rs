use std::future::Future;
use std::io;

use camino::Utf8Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub mod retry;

use retry::{classify, ErrorClass, RetryPolicy};

const COPY_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Result of one file operation after retries. Failures are values, not
/// errors: the caller reports them and moves on to the next item.
#[derive(Debug)]
pub enum OpOutcome {
    Completed { bytes: u64 },
    /// The path vanished before or during the operation.
    Missing,
    TransientFailure { attempts: u32, error: io::Error },
    FatalFailure { error: io::Error },
}

impl OpOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, OpOutcome::Completed { .. })
    }

    pub fn error(&self) -> Option<&io::Error> {
        match self {
            OpOutcome::TransientFailure { error, .. } | OpOutcome::FatalFailure { error } => {
                Some(error)
            }
            _ => None,
        }
    }
}

#[async_trait::async_trait]
pub trait FileOps: Send + Sync {
    /// Stream `src` into `dst` and carry over the source's last-write time.
    async fn copy(
        &self,
        src: &Utf8Path,
        dst: &Utf8Path,
        cancel: &CancellationToken,
    ) -> Result<OpOutcome, Cancelled>;

    /// Remove a file, or a directory when it is empty.
    async fn delete(&self, path: &Utf8Path, cancel: &CancellationToken)
        -> Result<OpOutcome, Cancelled>;

    async fn move_or_rename(
        &self,
        from: &Utf8Path,
        to: &Utf8Path,
        cancel: &CancellationToken,
    ) -> Result<OpOutcome, Cancelled>;
}

enum StepError {
    Io(io::Error),
    Cancelled,
}

impl From<io::Error> for StepError {
    fn from(e: io::Error) -> Self {
        StepError::Io(e)
    }
}

pub struct RetryingFileOps {
    policy: RetryPolicy,
}

impl RetryingFileOps {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn run_with_retry<F, Fut>(
        &self,
        what: &str,
        path: &Utf8Path,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<OpOutcome, Cancelled>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<u64, StepError>> + Send,
    {
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }
            attempt += 1;

            let error = match op().await {
                Ok(bytes) => return Ok(OpOutcome::Completed { bytes }),
                Err(StepError::Cancelled) => return Err(Cancelled),
                Err(StepError::Io(e)) => e,
            };

            match classify(&error) {
                ErrorClass::Missing => {
                    debug!("{} {}: path vanished ({})", what, path, error);
                    return Ok(OpOutcome::Missing);
                }
                ErrorClass::Fatal => {
                    warn!("{} {} failed: {}", what, path, error);
                    return Ok(OpOutcome::FatalFailure { error });
                }
                ErrorClass::Transient => {
                    if attempt >= self.policy.max_attempts {
                        warn!(
                            "{} {} still locked after {} attempts: {}",
                            what, path, attempt, error
                        );
                        return Ok(OpOutcome::TransientFailure {
                            attempts: attempt,
                            error,
                        });
                    }
                    let delay = self.policy.delay_for(attempt);
                    debug!(
                        "{} {} locked (attempt {}), retrying in {:?}",
                        what, path, attempt, delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

impl Default for RetryingFileOps {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

async fn copy_stream(
    src: &Utf8Path,
    dst: &Utf8Path,
    cancel: &CancellationToken,
) -> Result<u64, StepError> {
    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut reader = tokio::fs::File::open(src).await?;
    let src_meta = reader.metadata().await?;
    let mut writer = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(dst)
        .await?;

    let mut buf = vec![0u8; COPY_CHUNK];
    let mut total = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(StepError::Cancelled);
        }
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    writer.flush().await?;
    drop(writer);

    let mtime = filetime::FileTime::from_last_modification_time(&src_meta);
    filetime::set_file_mtime(dst, mtime)?;
    Ok(total)
}

async fn remove_path(path: &Utf8Path) -> Result<u64, StepError> {
    let meta = tokio::fs::symlink_metadata(path).await?;
    if meta.is_dir() {
        tokio::fs::remove_dir(path).await?;
    } else {
        tokio::fs::remove_file(path).await?;
    }
    Ok(0)
}

async fn rename_path(from: &Utf8Path, to: &Utf8Path) -> Result<u64, StepError> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::rename(from, to).await?;
    Ok(0)
}

#[async_trait::async_trait]
impl FileOps for RetryingFileOps {
    async fn copy(
        &self,
        src: &Utf8Path,
        dst: &Utf8Path,
        cancel: &CancellationToken,
    ) -> Result<OpOutcome, Cancelled> {
        self.run_with_retry("copy", src, cancel, || copy_stream(src, dst, cancel))
            .await
    }

    async fn delete(
        &self,
        path: &Utf8Path,
        cancel: &CancellationToken,
    ) -> Result<OpOutcome, Cancelled> {
        self.run_with_retry("delete", path, cancel, || remove_path(path))
            .await
    }

    async fn move_or_rename(
        &self,
        from: &Utf8Path,
        to: &Utf8Path,
        cancel: &CancellationToken,
    ) -> Result<OpOutcome, Cancelled> {
        self.run_with_retry("rename", from, cancel, || rename_path(from, to))
            .await
    }
}
