use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration as StdDuration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration as ChronoDuration, Utc};
use conduit_orchestrator::{apply_transition, RunCommand};
use conduit_types::{ErrorCode, OrchestratorError, Run, RunStatus};
use conduit_wire::{ActionAck, CreateRunRequest, CreateRunResponse, EventFilterQuery, ResumeRunRequest, WireRun};
use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

use crate::AppState;

/// Errors this layer can surface, mapped to HTTP status via [`status_for`]. `NotFound`
/// has no natural `ErrorCode` (the run simply isn't there); everything else the core
/// crates raise already carries one.
pub enum ApiError {
    NotFound,
    Orchestrator(OrchestratorError),
    Internal(anyhow::Error),
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        ApiError::Orchestrator(err)
    }
}

/// Maps the error taxonomy (§7) onto HTTP status codes by category, not by individual
/// code, so a new `ErrorCode` variant in the same category needs no change here.
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidRequest
        | ErrorCode::UnknownTool
        | ErrorCode::ToolNotAllowed
        | ErrorCode::InvalidTransition
        | ErrorCode::PlanInvalid => StatusCode::BAD_REQUEST,
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::InsufficientCredits => StatusCode::PAYMENT_REQUIRED,
        ErrorCode::RateLimited | ErrorCode::ProviderRateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::LeaseExpired | ErrorCode::LeaseExpiredExceeded | ErrorCode::ConcurrentUpdate => StatusCode::CONFLICT,
        ErrorCode::PlanningFailed
        | ErrorCode::DecisionFailed
        | ErrorCode::ToolTimeout
        | ErrorCode::ToolFailed
        | ErrorCode::HandlerException
        | ErrorCode::AllModelsFailed
        | ErrorCode::ProviderUnavailable
        | ErrorCode::RunTimeout => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound => {
                (StatusCode::NOT_FOUND, Json(json!({ "code": "NOT_FOUND", "message": "no such run" }))).into_response()
            }
            ApiError::Orchestrator(err) => {
                let status = status_for(err.code);
                (status, Json(json!({ "code": err.code.as_str(), "message": err.message }))).into_response()
            }
            ApiError::Internal(err) => {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "code": "INTERNAL", "message": err.to_string() }))).into_response()
            }
        }
    }
}

/// Authentication itself (verifying the bearer token against an identity provider) is
/// out of scope here; the caller is an external collaborator whose interface is just
/// "send a bearer token". The token's value is trusted directly as the tenant id.
fn require_bearer(headers: &HeaderMap) -> Result<String, ApiError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::Orchestrator(OrchestratorError::new(ErrorCode::Unauthorized, "missing Authorization header")))?;

    header
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::Orchestrator(OrchestratorError::new(ErrorCode::Unauthorized, "expected a Bearer token")))
}

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn create_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateRunRequest>,
) -> Result<(StatusCode, Json<CreateRunResponse>), ApiError> {
    let tenant_id = require_bearer(&headers)?;
    let config = req.config.unwrap_or_default();
    let credit_budget = config.max_credits;

    if !state.quota.try_reserve(&tenant_id, credit_budget, state.config.tenant_credit_budget).await {
        return Err(OrchestratorError::new(ErrorCode::InsufficientCredits, "tenant credit budget exhausted").into());
    }

    let run_id = Uuid::new_v4().to_string();
    let mut run = Run::new(run_id.clone(), tenant_id.clone(), tenant_id.clone(), req.prompt, config);
    run.external_id = req.external_id;

    if let Err(err) = state.credits.reserve(&mut run, credit_budget).await {
        state.quota.release(&tenant_id, credit_budget).await;
        return Err(err.into());
    }

    state.store.save(&run).await.map_err(ApiError::Internal)?;
    Ok((StatusCode::CREATED, Json(CreateRunResponse::created(run_id))))
}

/// Moves a run from `pending` to `queued`, acquires the dispatch lease, and spawns the
/// background `drive` loop for it. The lease is renewed on a timer for as long as
/// `drive` is in flight and released (together with the tenant quota reservation) once
/// the run lands in a terminal status.
pub async fn start_run(State(state): State<AppState>, Path(run_id): Path<String>) -> Result<Json<ActionAck>, ApiError> {
    let run = state.store.load(&run_id).await.map_err(ApiError::Internal)?.ok_or(ApiError::NotFound)?;
    if run.status != RunStatus::Pending {
        return Err(OrchestratorError::new(
            ErrorCode::InvalidTransition,
            format!("cannot start a run in {} status", run.status.as_str()),
        )
        .into());
    }

    let ttl = ChronoDuration::seconds(state.config.lease_ttl_seconds);
    let lease = state
        .dispatcher
        .acquire(&run_id, &state.worker_id, ttl)
        .await
        .map_err(|existing| OrchestratorError::new(ErrorCode::ConcurrentUpdate, format!("run already leased by {}", existing.worker_id)))?;

    let (mut run, commands) = apply_transition(&run, RunStatus::Queued, Utc::now())?;
    for command in commands {
        if let RunCommand::Enqueue = command {
            // The Dispatcher lease above already reserves this run for `worker_id`;
            // there is no separate queue to push onto in a single-worker deployment.
        }
    }
    run.worker_id = Some(lease.worker_id.clone());
    run.lease_expires_at = Some(lease.lease_expires_at);
    state.store.save(&run).await.map_err(ApiError::Internal)?;

    let supervisor = state.supervisor.clone();
    let dispatcher = state.dispatcher.clone();
    let quota = state.quota.clone();
    let worker_id = state.worker_id.clone();
    let tenant_id = run.tenant_id.clone();
    let credit_budget = run.credits_reserved;
    let run_id_for_task = run_id.clone();
    let renew_interval = StdDuration::from_secs((state.config.lease_ttl_seconds.max(2) / 2) as u64);

    tokio::spawn(async move {
        let drive_fut = supervisor.drive(&mut run);
        tokio::pin!(drive_fut);
        loop {
            tokio::select! {
                result = &mut drive_fut => {
                    if let Err(err) = result {
                        info!(run_id = %run_id_for_task, error = %err, "run_drive_ended_with_error");
                    }
                    break;
                }
                _ = tokio::time::sleep(renew_interval) => {
                    dispatcher.renew(&run_id_for_task, &worker_id, ttl).await;
                }
            }
        }
        if run.status.is_terminal() {
            dispatcher.release(&run_id_for_task, &worker_id).await;
            quota.release(&tenant_id, credit_budget).await;
        }
    });

    Ok(Json(ActionAck { run_id, status: "queued".to_string() }))
}

/// Signals the run's cancellation token; the outcome (`cancelled`, or no-op if the run
/// already finished) is only visible via a later `status`/`events` read, not this
/// response.
pub async fn stop_run(State(state): State<AppState>, Path(run_id): Path<String>) -> Result<Json<ActionAck>, ApiError> {
    state.store.load(&run_id).await.map_err(ApiError::Internal)?.ok_or(ApiError::NotFound)?;
    state.supervisor.cancel(&run_id).await;
    Ok(Json(ActionAck { run_id, status: "cancelling".to_string() }))
}

/// Creates a brand-new run with the same prompt and config as a `failed` one (§6) — a
/// failed run is terminal and has no outgoing transition of its own.
pub async fn retry_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<(StatusCode, Json<CreateRunResponse>), ApiError> {
    let original = state.store.load(&run_id).await.map_err(ApiError::Internal)?.ok_or(ApiError::NotFound)?;
    if original.status != RunStatus::Failed {
        return Err(OrchestratorError::new(
            ErrorCode::InvalidTransition,
            format!("retry is only valid from failed, not {}", original.status.as_str()),
        )
        .into());
    }

    let new_id = Uuid::new_v4().to_string();
    let mut run = Run::new(new_id.clone(), original.tenant_id.clone(), original.user_id.clone(), original.prompt.clone(), original.config.clone());
    run.external_id = original.external_id.clone();
    let credit_budget = run.config.max_credits;

    if !state.quota.try_reserve(&run.tenant_id, credit_budget, state.config.tenant_credit_budget).await {
        return Err(OrchestratorError::new(ErrorCode::InsufficientCredits, "tenant credit budget exhausted").into());
    }
    if let Err(err) = state.credits.reserve(&mut run, credit_budget).await {
        state.quota.release(&run.tenant_id, credit_budget).await;
        return Err(err.into());
    }

    state.store.save(&run).await.map_err(ApiError::Internal)?;
    Ok((StatusCode::CREATED, Json(CreateRunResponse::created(new_id))))
}

/// Re-enters the `drive` loop for a run parked in `waiting_user` or `paused`.
pub async fn resume_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(req): Json<ResumeRunRequest>,
) -> Result<Json<ActionAck>, ApiError> {
    let mut run = state.store.load(&run_id).await.map_err(ApiError::Internal)?.ok_or(ApiError::NotFound)?;
    if !matches!(run.status, RunStatus::WaitingUser | RunStatus::Paused) {
        return Err(OrchestratorError::new(
            ErrorCode::InvalidTransition,
            format!("resume is only valid from waiting_user or paused, not {}", run.status.as_str()),
        )
        .into());
    }

    let supervisor = state.supervisor.clone();
    let dispatcher = state.dispatcher.clone();
    let quota = state.quota.clone();
    let worker_id = state.worker_id.clone();
    let tenant_id = run.tenant_id.clone();
    let credit_budget = run.credits_reserved;
    let run_id_for_task = run_id.clone();
    let user_input = req.user_input.unwrap_or_default();

    tokio::spawn(async move {
        if let Err(err) = supervisor.resume(&mut run, &user_input).await {
            info!(run_id = %run_id_for_task, error = %err, "run_resume_ended_with_error");
        }
        if run.status.is_terminal() {
            dispatcher.release(&run_id_for_task, &worker_id).await;
            quota.release(&tenant_id, credit_budget).await;
        }
    });

    Ok(Json(ActionAck { run_id, status: "resuming".to_string() }))
}

pub async fn status_run(State(state): State<AppState>, Path(run_id): Path<String>) -> Result<Json<WireRun>, ApiError> {
    let run = state.store.load(&run_id).await.map_err(ApiError::Internal)?.ok_or(ApiError::NotFound)?;
    Ok(Json(WireRun::from(&run)))
}

pub async fn events_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(filter): Query<EventFilterQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    state.store.load(&run_id).await.map_err(ApiError::Internal)?.ok_or(ApiError::NotFound)?;
    Ok(Sse::new(sse_stream(state, run_id, filter.since_seq)).keep_alive(KeepAlive::new().interval(StdDuration::from_secs(10))))
}

/// An initial `connected` event, then every live event for `run_id` with `seq` beyond
/// `since_seq`. A subscriber that lagged the broadcast ring buffer sees a `dropped`
/// marker rather than a silent gap (mirrors [`conduit_core::EventStream::recv_with_gap_marker`]).
fn sse_stream(state: AppState, run_id: String, since_seq: Option<u64>) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    let connected = stream::once({
        let run_id = run_id.clone();
        async move { Ok(SseEvent::default().event("connected").data(json!({ "run_id": run_id }).to_string())) }
    });

    let since_seq = since_seq.unwrap_or(0);
    let rx = state.events.subscribe();
    let live = BroadcastStream::new(rx).filter_map(move |item| {
        let run_id = run_id.clone();
        async move {
            match item {
                Ok(event) if event.run_id == run_id && event.seq > since_seq => {
                    let (event_name, data) = conduit_wire::sse_frame(&event);
                    Some(Ok(SseEvent::default().event(event_name).data(data)))
                }
                Ok(_) => None,
                Err(_lagged) => Some(Ok(SseEvent::default().event("dropped").data("{}"))),
            }
        }
    });

    connected.chain(live)
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/runs", post(create_run))
        .route("/runs/{id}", get(status_run))
        .route("/runs/{id}/start", post(start_run))
        .route("/runs/{id}/stop", post(stop_run))
        .route("/runs/{id}/retry", post(retry_run))
        .route("/runs/{id}/resume", post(resume_run))
        .route("/runs/{id}/events", get(events_run))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "conduit_server_listening");
    tokio::spawn(crate::reaper::run_lease_reaper(state.clone()));
    axum::serve(listener, app_router(state)).await?;
    Ok(())
}
