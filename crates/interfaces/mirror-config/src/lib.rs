//! Central configuration constants for runtime limits and defaults.

/// Default debounce window for change notifications (milliseconds).
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Minimum allowed debounce window (milliseconds).
pub const MIN_DEBOUNCE_MS: u64 = 200;

/// Maximum allowed debounce window (milliseconds).
pub const MAX_DEBOUNCE_MS: u64 = 1000;

/// Debounce entries older than `window * DEBOUNCE_TTL_FACTOR` are evicted.
pub const DEBOUNCE_TTL_FACTOR: u32 = 10;

/// Upper bound on tracked paths in the debounce cache.
pub const DEBOUNCE_CAPACITY: usize = 4096;

/// Modification times closer than this are treated as equal (milliseconds).
/// Covers filesystems with coarse timestamp resolution (FAT stores 2s).
pub const DEFAULT_MTIME_TOLERANCE_MS: u64 = 2000;

/// Attempts made for a file operation that hits a lock.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Delay before the first retry (milliseconds).
pub const DEFAULT_RETRY_DELAY_MS: u64 = 250;

/// Cap on a single retry delay (milliseconds).
pub const MAX_RETRY_DELAY_MS: u64 = 2000;

/// Capacity of the live-monitoring work queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// How long `stop` waits for in-flight work (milliseconds).
pub const DEFAULT_STOP_GRACE_MS: u64 = 5000;

/// How long a rename-from notification waits for its rename-to partner.
pub const RENAME_PAIR_WINDOW_MS: u64 = 100;

/// How often the monitoring loop checks that the source root still exists.
pub const SOURCE_POLL_INTERVAL_MS: u64 = 1000;

/// Convenience function to clamp a debounce value into allowed range.
pub fn clamp_debounce_ms(v: u64) -> u64 {
    v.clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS)
}

/// Retry attempts are at least one (the initial try).
pub fn clamp_retry_attempts(v: u32) -> u32 {
    v.clamp(1, 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debounce_is_clamped_into_range() {
        assert_eq!(clamp_debounce_ms(0), MIN_DEBOUNCE_MS);
        assert_eq!(clamp_debounce_ms(750), 750);
        assert_eq!(clamp_debounce_ms(60_000), MAX_DEBOUNCE_MS);
    }

    #[test]
    fn retry_attempts_never_zero() {
        assert_eq!(clamp_retry_attempts(0), 1);
        assert_eq!(clamp_retry_attempts(DEFAULT_RETRY_ATTEMPTS), 3);
    }
}
