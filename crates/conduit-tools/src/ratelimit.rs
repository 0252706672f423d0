use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Sliding window of call timestamps, shared and keyed by `(tenant_id, tool_name)`. Every
/// increment is serialized behind the owning `RwLock` in `ToolRegistry` (§5: "rate-limit
/// windows are shared and require atomic counter increments").
#[derive(Debug, Default)]
pub struct SlidingWindow {
    minute: Vec<Instant>,
    hour: Vec<Instant>,
}

impl SlidingWindow {
    fn prune(&mut self, now: Instant) {
        self.minute.retain(|t| now.duration_since(*t) < Duration::from_secs(60));
        self.hour.retain(|t| now.duration_since(*t) < Duration::from_secs(3600));
    }

    /// Returns `Some(retry_after_ms)` if the call would exceed either window; otherwise
    /// records the call and returns `None`.
    pub fn try_acquire(&mut self, per_minute: u32, per_hour: u32) -> Option<u64> {
        let now = Instant::now();
        self.prune(now);

        if self.minute.len() as u32 >= per_minute {
            let oldest = self.minute.first().copied().unwrap_or(now);
            let retry = Duration::from_secs(60).saturating_sub(now.duration_since(oldest));
            return Some(retry.as_millis() as u64);
        }
        if self.hour.len() as u32 >= per_hour {
            let oldest = self.hour.first().copied().unwrap_or(now);
            let retry = Duration::from_secs(3600).saturating_sub(now.duration_since(oldest));
            return Some(retry.as_millis() as u64);
        }

        self.minute.push(now);
        self.hour.push(now);
        None
    }
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: HashMap<(String, String), SlidingWindow>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&mut self, tenant_id: &str, tool_name: &str, per_minute: u32, per_hour: u32) -> Option<u64> {
        self.windows
            .entry((tenant_id.to_string(), tool_name.to_string()))
            .or_default()
            .try_acquire(per_minute, per_hour)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_per_minute_window() {
        let mut limiter = RateLimiter::new();
        for _ in 0..3 {
            assert!(limiter.try_acquire("tenant-1", "web_search", 3, 100).is_none());
        }
        assert!(limiter.try_acquire("tenant-1", "web_search", 3, 100).is_some());
    }

    #[test]
    fn windows_are_independent_per_tenant_and_tool() {
        let mut limiter = RateLimiter::new();
        assert!(limiter.try_acquire("tenant-1", "web_search", 1, 100).is_none());
        assert!(limiter.try_acquire("tenant-1", "web_search", 1, 100).is_some());
        assert!(limiter.try_acquire("tenant-2", "web_search", 1, 100).is_none());
        assert!(limiter.try_acquire("tenant-1", "grep_search", 1, 100).is_none());
    }
}
