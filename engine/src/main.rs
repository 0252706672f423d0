use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use conduit_core::{Config, CreditManager, Dispatcher, EventStream, FileArtifactStore, FileRunStore, Supervisor};
use conduit_observability::{init_process_logging, ProcessKind};
use conduit_providers::{AnthropicAdapter, GoogleAdapter, OpenAiCompatibleAdapter, ProviderRegistry};
use conduit_server::{serve, AppState};
use conduit_tools::{install_default_tools, ToolRegistry};
use conduit_types::{Run, RunConfig, RunStatus};
use tracing::info;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "conduit-engine")]
#[command(about = "Headless agent run orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
        #[arg(long)]
        state_dir: Option<String>,
    },
    /// Creates a run for `prompt`, drives it to a terminal status in this process, and
    /// prints the final status as JSON. Bypasses the HTTP ingress entirely — useful for
    /// smoke-testing a provider/tool configuration without standing up a server.
    Run {
        prompt: String,
        #[arg(long)]
        state_dir: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { hostname, port, state_dir } => {
            let state_dir = resolve_state_dir(state_dir);
            let (_guard, _) = init_process_logging(ProcessKind::Engine, &state_dir.join("logs"))?;
            let state = build_state(&state_dir).await?;
            let addr: SocketAddr = format!("{hostname}:{port}").parse().context("invalid hostname or port")?;
            log_startup_paths(&state_dir, &addr);
            serve(addr, state).await?;
        }
        Command::Run { prompt, state_dir } => {
            let state_dir = resolve_state_dir(state_dir);
            let (_guard, _) = init_process_logging(ProcessKind::Engine, &state_dir.join("logs"))?;
            let state = build_state(&state_dir).await?;

            let mut run = Run::new(Uuid::new_v4().to_string(), "local".to_string(), "local".to_string(), prompt, RunConfig::default());
            state.credits.reserve(&mut run, run.config.max_credits).await?;
            run.status = RunStatus::Queued;
            state.supervisor.drive(&mut run).await?;

            println!("{}", serde_json::to_string_pretty(&conduit_wire::WireRun::from(&run))?);
        }
    }

    Ok(())
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("CONDUIT_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from(".conduit")
}

fn log_startup_paths(state_dir: &PathBuf, addr: &SocketAddr) {
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    let config_path = state_dir.join("config.json");
    info!("starting conduit-engine on http://{addr}");
    info!(
        "startup paths: exe={} cwd={} state_dir={} config_path={}",
        exe.display(),
        cwd.display(),
        state_dir.display(),
        config_path.display()
    );
}

/// Assembles every registry/store the Ingress layer needs into one `AppState`. The
/// provider catalog comes entirely from `Config.providers` (§6 Configuration) — there
/// is no built-in default provider, an empty catalog simply means every run fails at
/// the decision step with `ALL_MODELS_FAILED`.
async fn build_state(state_dir: &PathBuf) -> anyhow::Result<AppState> {
    let config = Config::load(state_dir.join("config.json")).await?;

    let mut providers = ProviderRegistry::new();
    for settings in &config.providers {
        let Some(api_key) = config.resolve_api_key(&settings.id) else {
            tracing::warn!(provider = %settings.id, "provider_missing_api_key_skipped");
            continue;
        };
        match settings.format.as_str() {
            "anthropic" => providers.register_adapter(Arc::new(AnthropicAdapter::new(settings.api_base.clone(), api_key))),
            "google" => providers.register_adapter(Arc::new(GoogleAdapter::new(settings.api_base.clone(), api_key))),
            _ => providers.register_adapter(Arc::new(OpenAiCompatibleAdapter::new(settings.id.clone(), settings.api_base.clone(), api_key))),
        }
        for model in &settings.models {
            providers.register_model(model.clone(), settings.id.clone());
        }
    }

    let tools = ToolRegistry::new();
    install_default_tools(&tools).await;

    let store: conduit_core::SharedRunStore = Arc::new(FileRunStore::new(state_dir.join("runs")).await?);
    let artifacts: conduit_core::SharedArtifactStore = Arc::new(FileArtifactStore::new(state_dir.join("artifacts")).await?);
    let events = EventStream::default();
    let credits = CreditManager::new();
    let dispatcher = Dispatcher::new();

    let providers = Arc::new(providers);
    let tools = Arc::new(tools);
    let supervisor = Arc::new(Supervisor::new(
        providers.clone(),
        tools.clone(),
        store.clone(),
        artifacts.clone(),
        events.clone(),
        credits.clone(),
    ));

    let worker_id = format!("worker-{}", Uuid::new_v4());
    Ok(AppState::new(supervisor, store, artifacts, dispatcher, credits, events, Arc::new(config), worker_id))
}
