use chrono::{DateTime, Utc};
use conduit_types::ObservabilityEvent;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    Engine,
    Worker,
}

impl ProcessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Engine => "engine",
            ProcessKind::Worker => "worker",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggingInitInfo {
    pub process: String,
    pub logs_dir: String,
    pub initialized_at: DateTime<Utc>,
}

pub fn emit_event(level: Level, process: ProcessKind, event: &ObservabilityEvent) {
    let correlation_id = event.correlation_id.as_deref().unwrap_or("");
    let run_id = event.run_id.as_deref().unwrap_or("");
    let step_id = event.step_id.as_deref().unwrap_or("");
    let provider_id = event.provider_id.as_deref().unwrap_or("");
    let model_id = event.model_id.as_deref().unwrap_or("");
    let status = event.status.as_deref().unwrap_or("");
    let error_code = event.error_code.as_deref().unwrap_or("");
    let detail = event.detail.as_deref().unwrap_or("");

    match level {
        Level::ERROR => tracing::error!(
            target: "conduit.obs",
            process = process.as_str(),
            component = event.component,
            event = event.event,
            correlation_id,
            run_id,
            step_id,
            provider_id,
            model_id,
            status,
            error_code,
            detail,
            "observability_event"
        ),
        Level::WARN => tracing::warn!(
            target: "conduit.obs",
            process = process.as_str(),
            component = event.component,
            event = event.event,
            correlation_id,
            run_id,
            step_id,
            provider_id,
            model_id,
            status,
            error_code,
            detail,
            "observability_event"
        ),
        _ => tracing::info!(
            target: "conduit.obs",
            process = process.as_str(),
            component = event.component,
            event = event.event,
            correlation_id,
            run_id,
            step_id,
            provider_id,
            model_id,
            status,
            error_code,
            detail,
            "observability_event"
        ),
    }
}

/// Initializes a dual-layer subscriber: newline-delimited JSON to a rotating file, plus a
/// compact human layer on stderr. Returns the `WorkerGuard` — it must be held for the
/// process lifetime or the non-blocking file writer stops flushing.
pub fn init_process_logging(
    process: ProcessKind,
    logs_dir: &Path,
) -> anyhow::Result<(WorkerGuard, LoggingInitInfo)> {
    fs::create_dir_all(logs_dir)?;

    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(format!("conduit.{}", process.as_str()))
        .filename_suffix("jsonl")
        .build(logs_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_current_span(false)
        .with_span_list(false);

    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(true)
        .with_ansi(true);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    let info = LoggingInitInfo {
        process: process.as_str().to_string(),
        logs_dir: logs_dir.display().to_string(),
        initialized_at: Utc::now(),
    };

    Ok((guard, info))
}
