use std::io;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Linear,
    Exponential,
}

/// How often and how patiently a locked file is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff: Backoff) -> Self {
        Self {
            max_attempts: mirror_config::clamp_retry_attempts(max_attempts),
            base_delay,
            max_delay: Duration::from_millis(mirror_config::MAX_RETRY_DELAY_MS),
            backoff,
        }
    }

    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Backoff::Fixed)
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Exponential => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(attempt - 1)),
        };
        delay.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            mirror_config::DEFAULT_RETRY_ATTEMPTS,
            Duration::from_millis(mirror_config::DEFAULT_RETRY_DELAY_MS),
            Backoff::Linear,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The file is held open by someone else; worth another try.
    Transient,
    /// Permission, capacity, naming problems. Retrying will not help.
    Fatal,
    /// The path is gone.
    Missing,
}

pub fn classify(err: &io::Error) -> ErrorClass {
    match err.kind() {
        io::ErrorKind::NotFound => ErrorClass::Missing,
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut => {
            ErrorClass::Transient
        }
        _ => match err.raw_os_error() {
            Some(code) if is_lock_code(code) => ErrorClass::Transient,
            _ => ErrorClass::Fatal,
        },
    }
}

// ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
#[cfg(windows)]
fn is_lock_code(code: i32) -> bool {
    matches!(code, 32 | 33)
}

// EBUSY, ETXTBSY
#[cfg(unix)]
fn is_lock_code(code: i32) -> bool {
    matches!(code, 16 | 26)
}

#[cfg(not(any(unix, windows)))]
fn is_lock_code(_code: i32) -> bool {
    false
}
