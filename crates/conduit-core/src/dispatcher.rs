use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

/// A worker's claim on a run. `lease_expires_at` bounds how long the claim is valid
/// without a `renew`; a dead worker's runs fall back into the dispatch queue once
/// `reap_expired` sweeps past that deadline (§5).
#[derive(Debug, Clone)]
pub struct RunLease {
    pub run_id: String,
    pub worker_id: String,
    pub acquired_at: DateTime<Utc>,
    pub lease_expires_at: DateTime<Utc>,
}

impl RunLease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.lease_expires_at
    }
}

/// Tracks which worker currently owns which run. One run has at most one active
/// lease; acquiring an already-leased run fails with the existing lease so the
/// caller can decide whether to wait or reject (mirrors the single-active-run
/// guarantee in §5).
#[derive(Clone, Default)]
pub struct Dispatcher {
    leases: Arc<RwLock<HashMap<String, RunLease>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, run_id: &str, worker_id: &str, ttl: Duration) -> Result<RunLease, RunLease> {
        let mut guard = self.leases.write().await;
        if let Some(existing) = guard.get(run_id) {
            if !existing.is_expired(Utc::now()) {
                return Err(existing.clone());
            }
        }
        let now = Utc::now();
        let lease = RunLease {
            run_id: run_id.to_string(),
            worker_id: worker_id.to_string(),
            acquired_at: now,
            lease_expires_at: now + ttl,
        };
        guard.insert(run_id.to_string(), lease.clone());
        Ok(lease)
    }

    pub async fn renew(&self, run_id: &str, worker_id: &str, ttl: Duration) -> bool {
        let mut guard = self.leases.write().await;
        match guard.get_mut(run_id) {
            Some(lease) if lease.worker_id == worker_id => {
                lease.lease_expires_at = Utc::now() + ttl;
                true
            }
            _ => false,
        }
    }

    pub async fn release(&self, run_id: &str, worker_id: &str) -> bool {
        let mut guard = self.leases.write().await;
        match guard.get(run_id) {
            Some(lease) if lease.worker_id == worker_id => {
                guard.remove(run_id);
                true
            }
            _ => false,
        }
    }

    pub async fn lease_for(&self, run_id: &str) -> Option<RunLease> {
        self.leases.read().await.get(run_id).cloned()
    }

    /// Removes and returns every lease past its expiry, so the caller can re-enqueue
    /// the underlying runs. Does not touch leases that are still valid.
    pub async fn reap_expired(&self) -> Vec<RunLease> {
        let now = Utc::now();
        let mut guard = self.leases.write().await;
        let expired_ids: Vec<String> = guard
            .iter()
            .filter(|(_, lease)| lease.is_expired(now))
            .map(|(run_id, _)| run_id.clone())
            .collect();
        let mut out = Vec::with_capacity(expired_ids.len());
        for run_id in expired_ids {
            if let Some(lease) = guard.remove(&run_id) {
                out.push(lease);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_fails_while_first_lease_is_live() {
        let dispatcher = Dispatcher::new();
        dispatcher.acquire("run-1", "worker-a", Duration::seconds(30)).await.unwrap();
        let err = dispatcher.acquire("run-1", "worker-b", Duration::seconds(30)).await.unwrap_err();
        assert_eq!(err.worker_id, "worker-a");
    }

    #[tokio::test]
    async fn expired_lease_can_be_reacquired_by_another_worker() {
        let dispatcher = Dispatcher::new();
        dispatcher.acquire("run-1", "worker-a", Duration::seconds(-1)).await.unwrap();
        let lease = dispatcher.acquire("run-1", "worker-b", Duration::seconds(30)).await.unwrap();
        assert_eq!(lease.worker_id, "worker-b");
    }

    #[tokio::test]
    async fn reap_expired_returns_only_past_deadline_leases() {
        let dispatcher = Dispatcher::new();
        dispatcher.acquire("run-1", "worker-a", Duration::seconds(-1)).await.unwrap();
        dispatcher.acquire("run-2", "worker-b", Duration::seconds(30)).await.unwrap();
        let reaped = dispatcher.reap_expired().await;
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].run_id, "run-1");
        assert!(dispatcher.lease_for("run-2").await.is_some());
    }

    #[tokio::test]
    async fn release_only_succeeds_for_the_owning_worker() {
        let dispatcher = Dispatcher::new();
        dispatcher.acquire("run-1", "worker-a", Duration::seconds(30)).await.unwrap();
        assert!(!dispatcher.release("run-1", "worker-b").await);
        assert!(dispatcher.release("run-1", "worker-a").await);
        assert!(dispatcher.lease_for("run-1").await.is_none());
    }
}
