//! CityPulse application binary - composition root.
//!
//! 1. Read `.env`, CLI flags and the TOML config
//! 2. Initialise tracing
//! 3. Open the session database
//! 4. Build the collaborator clients that have credentials
//! 5. Start the context-cache sweeper
//! 6. Serve the HTTP API

mod cli;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use citypulse_api::{start_server, AppState};
use citypulse_chat::collaborator::{GoogleMapsClient, OpenAiCompletion};
use citypulse_chat::{ChatOrchestrator, ContextStore, PlacesService, TextCompletion};
use citypulse_core::config::CityPulseConfig;
use citypulse_storage::{Database, SessionRepository};

use crate::cli::{expand_home, CliArgs};

/// Periodically drop expired search contexts.
async fn context_sweeper(store: Arc<dyn ContextStore>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        interval.tick().await;
        let evicted = store.evict_expired(chrono::Utc::now());
        if evicted > 0 {
            tracing::debug!(evicted, remaining = store.len(), "Evicted expired search contexts");
        }
    }
}

fn completion_client(config: &CityPulseConfig) -> Option<Arc<dyn TextCompletion>> {
    match OpenAiCompletion::from_config(&config.completion) {
        Ok(client) => {
            tracing::info!(model = client.model(), "Text completion configured");
            Some(Arc::new(client))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Text completion disabled; chat and extraction use fallbacks");
            None
        }
    }
}

fn places_client(config: &CityPulseConfig) -> Option<Arc<dyn PlacesService>> {
    match GoogleMapsClient::from_config(&config.maps) {
        Ok(client) => {
            tracing::info!("Maps service configured");
            Some(Arc::new(client))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Maps service disabled; place searches will be refused");
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let args = CliArgs::parse();

    // Config: file, then env, then CLI.
    let config_file = args.resolve_config_path();
    let mut config = CityPulseConfig::load_or_default(&config_file);
    config.apply_env_overrides();
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }
    config.general.port = args.resolve_port(config.general.port);

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting CityPulse v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Storage.
    let db_path = expand_home(&config.general.data_dir).join("sessions.db");
    let db = match Database::new(&db_path) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(path = %db_path.display(), error = %e, "Failed to open session database");
            return Err(e.into());
        }
    };
    tracing::info!(path = %db_path.display(), "Session database opened");

    // Pipeline.
    let orchestrator = Arc::new(ChatOrchestrator::new(
        SessionRepository::new(Arc::new(db)),
        completion_client(&config),
        places_client(&config),
        &config,
    ));

    // === Background tasks ===
    tokio::spawn(context_sweeper(
        orchestrator.context_store(),
        config.session.cache_sweep_interval_secs,
    ));

    // === API server ===
    let state = AppState::from_shared(Arc::new(config.clone()), orchestrator);
    if let Err(e) = start_server(&config, state).await {
        tracing::error!(port = config.general.port, error = %e, "API server stopped");
        return Err(e.into());
    }

    Ok(())
}
