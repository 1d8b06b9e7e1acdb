//! Wiring shared by the CLI and the MCP server.

use anyhow::{Context, Result};
use tracing::info;

use crate::backend::{InMemorySchedule, SchedulingBackend};
use crate::collaborators::{
    CommandCompletionClient, CompletionIntentClassifier, IntentClassifier, KeywordIntentClassifier,
    KeywordSlotExtractor,
};
use crate::config::RouterConfig;
use crate::orchestrator::{Router, TurnService};
use crate::store::{FileSessionStore, MemorySessionStore, SessionStore};

/// The turn service as assembled from configuration.
pub type ClinicService = TurnService<
    KeywordSlotExtractor,
    Box<dyn IntentClassifier>,
    InMemorySchedule,
    Box<dyn SessionStore>,
>;

/// Where sessions live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// JSON files under `storage.sessions_dir`
    Files,
    /// Process memory; everything is gone on exit
    Ephemeral,
}

/// Build the classifier named by the config: a completion-backed one when a
/// command is configured, otherwise the keyword rules.
pub fn build_classifier(config: &RouterConfig) -> Box<dyn IntentClassifier> {
    let client = config
        .router
        .completion_command
        .as_deref()
        .and_then(CommandCompletionClient::from_command_line);

    match client {
        Some(client) => {
            info!("Using completion command for intent classification");
            Box::new(CompletionIntentClassifier::new(client))
        }
        None => Box::new(KeywordIntentClassifier::new()),
    }
}

pub fn build_store(config: &RouterConfig, mode: StoreMode) -> Box<dyn SessionStore> {
    match mode {
        StoreMode::Files => {
            info!("Sessions directory: {}", config.storage.sessions_dir.display());
            Box::new(FileSessionStore::new(config.storage.sessions_dir.clone()))
        }
        StoreMode::Ephemeral => Box::new(MemorySessionStore::new()),
    }
}

/// Build the schedule; in file mode bookings are kept next to the sessions.
pub fn build_backend(config: &RouterConfig, mode: StoreMode) -> Result<InMemorySchedule> {
    let backend = InMemorySchedule::from_config(&config.schedule)?;
    match mode {
        StoreMode::Files => {
            let path = config.storage.bookings_path();
            info!("Bookings file: {}", path.display());
            backend.with_bookings_file(path)
        }
        StoreMode::Ephemeral => Ok(backend),
    }
}

/// Assemble router, collaborators, backend and store from `config`.
pub async fn build_service(config: &RouterConfig, mode: StoreMode) -> Result<ClinicService> {
    let backend = build_backend(config, mode)?;
    let directory = backend
        .directory()
        .await
        .context("Failed to read the doctor directory")?;

    let router = Router::from_config(
        KeywordSlotExtractor::new(&directory),
        build_classifier(config),
        backend,
        config,
    );
    Ok(TurnService::new(router, build_store(config, mode)))
}
