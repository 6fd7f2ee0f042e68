use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const SWEEP_EVERY: u64 = 256;

/// Sliding-window limiter for demo password attempts, keyed by client and
/// project.
#[derive(Debug, Clone)]
pub struct PasswordRateLimiter {
    window: Duration,
    max_attempts: u32,
    buckets: Arc<DashMap<String, Vec<Instant>>>,
    calls: Arc<AtomicU64>,
}

impl PasswordRateLimiter {
    pub fn new(window: Duration, max_attempts: u32) -> Self {
        Self {
            window,
            max_attempts,
            buckets: Arc::new(DashMap::new()),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Count an attempt; returns `false` once the window is exhausted.
    pub fn allow(&self, client: &str, project: &str) -> bool {
        if self.calls.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep();
        }

        let bucket_key = format!("{client}:{project}");
        let now = Instant::now();
        let window = self.window;

        let mut entry = self.buckets.entry(bucket_key).or_default();
        entry.retain(|instant| now.duration_since(*instant) < window);

        if entry.len() as u32 >= self.max_attempts {
            return false;
        }

        entry.push(now);
        true
    }

    /// Forget a client's attempts after a successful unlock.
    pub fn reset(&self, client: &str, project: &str) {
        self.buckets.remove(&format!("{client}:{project}"));
    }

    /// Drop buckets whose attempts have all left the window.
    pub fn sweep(&self) {
        let now = Instant::now();
        let window = self.window;
        self.buckets.retain(|_, attempts| {
            attempts.retain(|instant| now.duration_since(*instant) < window);
            !attempts.is_empty()
        });
    }

    pub fn retry_after_secs(&self) -> u64 {
        self.window.as_secs().max(1)
    }
}
