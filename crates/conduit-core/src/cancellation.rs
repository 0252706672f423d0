use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// One `CancellationToken` per in-flight run, so `stop` (§6) can interrupt a
/// `Supervisor::drive` loop that's running on a different task without the caller
/// needing a handle to that task. `create` is idempotent: calling it twice for the
/// same run hands back the same token rather than orphaning the first one.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    tokens: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, run_id: &str) -> CancellationToken {
        let mut guard = self.tokens.write().await;
        guard.entry(run_id.to_string()).or_insert_with(CancellationToken::new).clone()
    }

    pub async fn cancel(&self, run_id: &str) -> bool {
        let guard = self.tokens.read().await;
        match guard.get(run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, run_id: &str) {
        self.tokens.write().await.remove(run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_is_idempotent_for_the_same_run() {
        let registry = CancellationRegistry::new();
        let a = registry.create("run-1").await;
        let b = registry.create("run-1").await;
        a.cancel();
        assert!(b.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_on_unknown_run_returns_false() {
        let registry = CancellationRegistry::new();
        assert!(!registry.cancel("missing").await);
    }

    #[tokio::test]
    async fn remove_drops_the_token_without_cancelling_it() {
        let registry = CancellationRegistry::new();
        let token = registry.create("run-1").await;
        registry.remove("run-1").await;
        assert!(!registry.cancel("run-1").await);
        assert!(!token.is_cancelled());
    }
}
