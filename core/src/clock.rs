use std::time::{SystemTime, UNIX_EPOCH};

pub use flash_device::Clock;

/// Wall-clock backed by the host OS, used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// Deterministic clock for tests: returns a fixed value that can be advanced
/// explicitly, so property tests can assert on the header `timestamp` field
/// without depending on wall-clock time.
#[derive(Debug, Clone)]
pub struct FakeClock(std::sync::Arc<std::sync::atomic::AtomicU64>);

impl FakeClock {
    pub fn new(start: u64) -> Self {
        FakeClock(std::sync::Arc::new(std::sync::atomic::AtomicU64::new(start)))
    }

    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, std::sync::atomic::Ordering::Relaxed);
    }
}

impl Clock for FakeClock {
    fn now_secs(&self) -> u64 {
        self.0.load(std::sync::atomic::Ordering::Relaxed)
    }
}
