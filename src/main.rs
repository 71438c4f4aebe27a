mod admin;
mod backend;
mod cache;
mod catalog;
mod cli;
mod config;
mod errors;
mod formatters;
mod llm;
mod orchestrator;
mod registry;
mod router;
mod safety;
mod session;
mod tracker;
mod types;
mod vecmath;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use backend::BackendClient;
use backend::pulse::PulseMonitor;
use cache::semantic_cache::SemanticCache;
use cli::{Cli, Command};
use config::Config;
use llm::agent::LlmAgent;
use llm::client::{HttpLlmClient, LlmBackend};
use orchestrator::Orchestrator;
use registry::ToolRegistry;
use router::intent_router::IntentRouter;
use router::regex_router::RegexRouter;
use router::retriever::Retriever;
use session::SessionStore;
use tracker::CallTracker;

/// Shared initialization: config, tracing, state dir, registry, routing
/// tiers, and the orchestrator that ties them together. Extracted from a
/// monolithic `main` so both the CLI entry points below and (eventually)
/// the admin API server can reuse it without duplication, mirroring
/// `gatemini::initialize`'s split between shared setup and the two run
/// modes it feeds.
async fn initialize() -> Result<Arc<Orchestrator>> {
    let config = Config::from_env()?;

    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    if !config.state_dir.exists() {
        std::fs::create_dir_all(&config.state_dir)?;
        tracing::info!(dir = %config.state_dir.display(), "created state directory");
    }

    tracing::info!(
        llm_model = %config.llm_model,
        state_dir = %config.state_dir.display(),
        "devops-dispatcher starting"
    );

    let registry = ToolRegistry::new();
    catalog::register_all(&registry);

    let llm: Arc<dyn LlmBackend> = Arc::new(HttpLlmClient::new(&config)?);

    let backend_client = Arc::new(BackendClient::new(&config)?);
    let pulse = PulseMonitor::new(now_ts());
    backend::pulse::spawn(
        pulse.clone(),
        backend_client.clone(),
        config.pulse_interval,
        config.pulse_timeout,
        now_ts,
    );

    let cache = SemanticCache::load(&config.semantic_cache_path(), llm.clone()).await;

    let regex_router = Arc::new(RegexRouter::new(Vec::new(), &registry.get_all()));

    let intent_router = Arc::new(
        IntentRouter::load(
            &config.intents_path(),
            &config.intent_embedding_cache_path(),
            llm.clone(),
        )
        .await,
    );

    let retriever = Retriever::load_or_create(&config.tool_index_path(), llm.clone()).await;
    retriever.sync_with_registry(&registry).await;
    retriever.spawn_sync_task(registry.subscribe());

    let llm_agent = Arc::new(LlmAgent::new(llm.clone(), config.max_retries));

    let sessions = SessionStore::new(config.session_log_path());
    let tracker = Arc::new(CallTracker::new());

    let orchestrator = Arc::new(Orchestrator::new(
        registry.clone(),
        backend_client.clone(),
        pulse.clone(),
        cache,
        regex_router,
        intent_router,
        retriever.clone(),
        llm_agent,
        llm,
        sessions,
        tracker,
        config.safety_confirm,
    ));

    #[cfg(feature = "admin")]
    if config.admin.enabled {
        let admin_state = admin::api::AdminState {
            registry: registry.clone(),
            pulse: pulse.clone(),
            retriever: retriever.clone(),
        };
        let listen = config.admin.listen.clone();
        let shutdown = Arc::new(tokio::sync::Notify::new());
        tokio::spawn(async move {
            if let Err(e) = admin::api::start(admin_state, &listen, shutdown).await {
                tracing::error!(error = %e, "admin API failed");
            }
        });
    }

    Ok(orchestrator)
}

fn now_ts() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let orchestrator = initialize().await?;

    match cli.command {
        Some(Command::Ask { query, yes, backends }) => {
            let forced = if backends.is_empty() { None } else { Some(backends) };
            cli::run_turn(&orchestrator, uuid::Uuid::new_v4(), query, yes, forced).await;
        }
        None => {
            cli::run_repl(orchestrator).await;
        }
    }

    // Give the pulse monitor's background tasks and any in-flight cache
    // save a moment to flush before the process exits.
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}
