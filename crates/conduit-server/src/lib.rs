use std::sync::Arc;

use conduit_core::{Config, CreditManager, Dispatcher, EventStream, Supervisor};

pub mod http;
pub mod quota;
pub mod reaper;

pub use http::{app_router, serve};
pub use quota::TenantQuota;
pub use reaper::run_lease_reaper;

/// Everything a request handler needs, cloned cheaply per request (every field is
/// itself an `Arc`/internally-locked collaborator, matching the engine lineage's own
/// `AppState` shape).
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub store: conduit_core::SharedRunStore,
    pub artifacts: conduit_core::SharedArtifactStore,
    pub dispatcher: Dispatcher,
    pub credits: CreditManager,
    pub events: EventStream,
    pub quota: TenantQuota,
    pub config: Arc<Config>,
    pub worker_id: String,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        supervisor: Arc<Supervisor>,
        store: conduit_core::SharedRunStore,
        artifacts: conduit_core::SharedArtifactStore,
        dispatcher: Dispatcher,
        credits: CreditManager,
        events: EventStream,
        config: Arc<Config>,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            supervisor,
            store,
            artifacts,
            dispatcher,
            credits,
            events,
            quota: TenantQuota::new(),
            config,
            worker_id: worker_id.into(),
        }
    }
}
