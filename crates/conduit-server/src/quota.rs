use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

/// Per-tenant outstanding-credit ceiling, enforced at ingress rather than inside the
/// Credit Manager (§4.7: "rate-limit gating ... is evaluated at ingress, not inside the
/// core loop"). Tracks only credits currently reserved by live runs, not lifetime spend.
#[derive(Clone, Default)]
pub struct TenantQuota {
    outstanding: Arc<RwLock<HashMap<String, u64>>>,
}

impl TenantQuota {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `amount` against `tenant_id`'s budget if it fits, returning whether the
    /// reservation succeeded.
    pub async fn try_reserve(&self, tenant_id: &str, amount: u64, budget: u64) -> bool {
        let mut guard = self.outstanding.write().await;
        let used = guard.entry(tenant_id.to_string()).or_insert(0);
        if used.saturating_add(amount) > budget {
            return false;
        }
        *used += amount;
        true
    }

    /// Returns `amount` to `tenant_id`'s budget once its run reaches a terminal status.
    pub async fn release(&self, tenant_id: &str, amount: u64) {
        let mut guard = self.outstanding.write().await;
        if let Some(used) = guard.get_mut(tenant_id) {
            *used = used.saturating_sub(amount);
        }
    }
}
