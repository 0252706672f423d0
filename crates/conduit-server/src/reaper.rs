use std::time::Duration as StdDuration;

use chrono::Utc;
use conduit_orchestrator::apply_transition;
use conduit_types::{ErrorCode, OrchestratorError, RunStatus};
use tracing::{info, warn};

use crate::AppState;

/// Background sweep for leases a worker never renewed (dead process, network
/// partition). A reaped `planning`/`executing` run goes back to `queued` with
/// `retry_count` incremented if retries remain, or to `failed` with
/// `LEASE_EXPIRED_EXCEEDED` once they're exhausted (§4.2). A reaped `waiting_user` run
/// is left alone unless its own `timeout_at` has passed, in which case it moves to
/// `timeout` (§4.3); `paused` runs are never touched here, since neither a requeue nor
/// a timeout edge exists for `paused` in the transition table. Runs forever; callers
/// spawn it alongside `serve`.
pub async fn run_lease_reaper(state: AppState) {
    let interval = StdDuration::from_secs(state.config.reap_interval_seconds.max(1));
    loop {
        tokio::time::sleep(interval).await;
        reap_once(&state).await;
    }
}

async fn reap_once(state: &AppState) {
    for lease in state.dispatcher.reap_expired().await {
        let run = match state.store.load(&lease.run_id).await {
            Ok(Some(run)) => run,
            Ok(None) => continue,
            Err(err) => {
                warn!(run_id = %lease.run_id, error = %err, "reaper_failed_to_load_run");
                continue;
            }
        };

        if run.status.is_terminal() {
            continue;
        }

        // `paused`/`waiting_user` are deliberate suspension points (§5) — nothing is
        // driving the run, so its lease is expected to lapse without a renewal. That is
        // not a dead worker; only the run's own `timeout_at` (if any) can move it, and
        // only `waiting_user` has a `timeout` edge in the transition table (§4.1).
        if matches!(run.status, RunStatus::Paused | RunStatus::WaitingUser) {
            if run.status == RunStatus::WaitingUser {
                if run.timeout_at.is_some_and(|deadline| Utc::now() >= deadline) {
                    let mut timed_out = run.clone();
                    timed_out.error = Some(
                        OrchestratorError::new(ErrorCode::RunTimeout, "run exceeded its step or duration budget while waiting_user")
                            .recoverable(false),
                    );
                    apply_and_persist(state, &lease.run_id, apply_transition(&timed_out, RunStatus::Timeout, Utc::now())).await;
                }
            }
            continue;
        }

        // Only `planning`/`executing` are states a worker actively drives; an expired
        // lease here means the worker died mid-phase, not a deliberate suspension.
        let mut retried = run.clone();
        retried.retry_count += 1;

        let outcome = if retried.retry_count < retried.max_retries {
            apply_transition(&retried, RunStatus::Queued, Utc::now())
        } else {
            retried.error = Some(OrchestratorError::new(
                ErrorCode::LeaseExpiredExceeded,
                format!("lease expired {} times, exceeding max_retries={}", retried.retry_count, retried.max_retries),
            ));
            apply_transition(&retried, RunStatus::Failed, Utc::now())
        };

        apply_and_persist(state, &lease.run_id, outcome).await;
    }
}

/// Shared tail for every reaper-initiated transition: apply the `RunCommand`s against
/// the credit/quota/event collaborators the same way `start_run`'s spawned task would,
/// then persist. Logs and returns on any failure rather than panicking — a stuck run is
/// left for the next sweep to retry.
async fn apply_and_persist(
    state: &AppState,
    run_id: &str,
    outcome: Result<(conduit_types::Run, Vec<conduit_orchestrator::RunCommand>), OrchestratorError>,
) {
    let (next, commands) = match outcome {
        Ok(pair) => pair,
        Err(err) => {
            warn!(run_id = %run_id, error = %err, "reaper_could_not_apply_transition");
            return;
        }
    };

    for command in &commands {
        match command {
            conduit_orchestrator::RunCommand::FinalizeCredits { run_id } => state.credits.finalize(run_id).await,
            conduit_orchestrator::RunCommand::ReleaseCredits { run_id } => {
                state.credits.release(run_id).await;
                state.quota.release(&next.tenant_id, next.credits_reserved).await;
            }
            conduit_orchestrator::RunCommand::EmitEvent { event_type, payload } => {
                state.events.publish(&next.id, *event_type, payload.clone());
            }
            conduit_orchestrator::RunCommand::Enqueue => {}
        }
    }

    if let Err(err) = state.store.save(&next).await {
        warn!(run_id = %run_id, error = %err, "reaper_failed_to_save_run");
        return;
    }

    info!(run_id = %run_id, status = %next.status.as_str(), retry_count = next.retry_count, "run_reaped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use conduit_core::{Config, CreditManager, Dispatcher, EventStream, Supervisor};
    use conduit_providers::ProviderRegistry;
    use conduit_tools::ToolRegistry;
    use conduit_types::Run;
    use std::sync::Arc;

    async fn test_state() -> AppState {
        let dir = tempfile::tempdir().unwrap();
        let store: conduit_core::SharedRunStore = Arc::new(conduit_core::FileRunStore::new(dir.path()).await.unwrap());
        let artifacts: conduit_core::SharedArtifactStore =
            Arc::new(conduit_core::FileArtifactStore::new(dir.path().join("artifacts")).await.unwrap());
        let events = EventStream::default();
        let credits = CreditManager::new();
        let registry = Arc::new(ProviderRegistry::new());
        let tools = Arc::new(ToolRegistry::new());
        let supervisor = Arc::new(Supervisor::new(registry, tools, store.clone(), artifacts.clone(), events.clone(), credits.clone()));
        AppState::new(
            supervisor,
            store,
            artifacts,
            Dispatcher::new(),
            credits,
            events,
            Arc::new(Config::default()),
            "worker-test",
        )
    }

    #[tokio::test]
    async fn expired_lease_under_retry_limit_returns_run_to_queued() {
        let state = test_state().await;
        let mut run = Run::new("run-1".to_string(), "tenant-1".to_string(), "tenant-1".to_string(), "do x".to_string(), Default::default());
        run.status = RunStatus::Executing;
        run.credits_reserved = 10;
        state.store.save(&run).await.unwrap();
        state.dispatcher.acquire(&run.id, "dead-worker", Duration::seconds(-1)).await.unwrap();

        reap_once(&state).await;

        let reloaded = state.store.load(&run.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, RunStatus::Queued);
        assert_eq!(reloaded.retry_count, 1);
    }

    #[tokio::test]
    async fn expired_lease_beyond_retry_limit_fails_the_run() {
        let state = test_state().await;
        let mut run = Run::new("run-1".to_string(), "tenant-1".to_string(), "tenant-1".to_string(), "do x".to_string(), Default::default());
        run.status = RunStatus::Executing;
        run.credits_reserved = 10;
        run.retry_count = run.max_retries;
        state.store.save(&run).await.unwrap();
        state.dispatcher.acquire(&run.id, "dead-worker", Duration::seconds(-1)).await.unwrap();

        reap_once(&state).await;

        let reloaded = state.store.load(&run.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, RunStatus::Failed);
        assert_eq!(reloaded.error.unwrap().code, ErrorCode::LeaseExpiredExceeded);
    }

    #[tokio::test]
    async fn unexpired_lease_is_left_alone() {
        let state = test_state().await;
        let mut run = Run::new("run-1".to_string(), "tenant-1".to_string(), "tenant-1".to_string(), "do x".to_string(), Default::default());
        run.status = RunStatus::Executing;
        run.credits_reserved = 10;
        state.store.save(&run).await.unwrap();
        state.dispatcher.acquire(&run.id, "alive-worker", Duration::seconds(30)).await.unwrap();

        reap_once(&state).await;

        let reloaded = state.store.load(&run.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, RunStatus::Executing);
    }

    #[tokio::test]
    async fn waiting_user_past_its_deadline_times_out() {
        let state = test_state().await;
        let mut run = Run::new("run-1".to_string(), "tenant-1".to_string(), "tenant-1".to_string(), "do x".to_string(), Default::default());
        run.status = RunStatus::WaitingUser;
        run.credits_reserved = 10;
        run.timeout_at = Some(Utc::now() - Duration::seconds(1));
        state.store.save(&run).await.unwrap();
        state.dispatcher.acquire(&run.id, "dead-worker", Duration::seconds(-1)).await.unwrap();

        reap_once(&state).await;

        let reloaded = state.store.load(&run.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, RunStatus::Timeout);
        assert_eq!(reloaded.error.unwrap().code, ErrorCode::RunTimeout);
    }

    #[tokio::test]
    async fn waiting_user_still_within_its_deadline_is_left_alone() {
        let state = test_state().await;
        let mut run = Run::new("run-1".to_string(), "tenant-1".to_string(), "tenant-1".to_string(), "do x".to_string(), Default::default());
        run.status = RunStatus::WaitingUser;
        run.credits_reserved = 10;
        run.timeout_at = Some(Utc::now() + Duration::seconds(60));
        state.store.save(&run).await.unwrap();
        state.dispatcher.acquire(&run.id, "dead-worker", Duration::seconds(-1)).await.unwrap();

        reap_once(&state).await;

        let reloaded = state.store.load(&run.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, RunStatus::WaitingUser);
    }

    #[tokio::test]
    async fn paused_run_is_never_touched_by_the_reaper() {
        let state = test_state().await;
        let mut run = Run::new("run-1".to_string(), "tenant-1".to_string(), "tenant-1".to_string(), "do x".to_string(), Default::default());
        run.status = RunStatus::Paused;
        run.credits_reserved = 10;
        state.store.save(&run).await.unwrap();
        state.dispatcher.acquire(&run.id, "dead-worker", Duration::seconds(-1)).await.unwrap();

        reap_once(&state).await;

        let reloaded = state.store.load(&run.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, RunStatus::Paused);
    }
}
