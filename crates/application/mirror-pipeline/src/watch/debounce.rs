use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};

/// Per-path acceptance filter for change notifications.
///
/// A path is accepted when it has not been accepted within `window`. Entries
/// older than `ttl` are swept on every call and the map never grows past
/// `capacity`, so a long session touching many paths stays bounded.
pub struct EventDebouncer {
    window: Duration,
    ttl: Duration,
    capacity: usize,
    accepted: Mutex<HashMap<Utf8PathBuf, Instant>>,
}

impl EventDebouncer {
    pub fn new(window: Duration) -> Self {
        Self::with_limits(
            window,
            window.saturating_mul(mirror_config::DEBOUNCE_TTL_FACTOR),
            mirror_config::DEBOUNCE_CAPACITY,
        )
    }

    pub fn with_limits(window: Duration, ttl: Duration, capacity: usize) -> Self {
        Self {
            window,
            ttl: ttl.max(window),
            capacity: capacity.max(1),
            accepted: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn should_process(&self, path: &Utf8Path) -> bool {
        self.should_process_at(path, Instant::now())
    }

    pub fn should_process_at(&self, path: &Utf8Path, now: Instant) -> bool {
        let mut accepted = self.accepted.lock().unwrap_or_else(PoisonError::into_inner);
        accepted.retain(|_, at| now.saturating_duration_since(*at) <= self.ttl);

        let fresh = match accepted.get(path) {
            Some(last) => now.saturating_duration_since(*last) > self.window,
            None => true,
        };
        if !fresh {
            return false;
        }

        accepted.insert(path.to_owned(), now);
        if accepted.len() > self.capacity {
            let oldest = accepted
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(p, _)| p.clone());
            if let Some(oldest) = oldest {
                accepted.remove(&oldest);
            }
        }
        true
    }

    /// Drop the record for `path` so the next change is accepted at once.
    pub fn forget(&self, path: &Utf8Path) {
        self.accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }

    pub fn len(&self) -> usize {
        self.accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
