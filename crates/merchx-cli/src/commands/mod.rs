mod cache;
mod connection;
mod product;
mod products;
mod queue;
mod quota;
mod search;

use std::sync::Arc;

use merchx_core::{
    ApiResponse, Credentials, Engine, EngineConfig, ProviderId,
};
use merchx_queue::{ManagerJobExecutor, MemoryJobStore, QueueEngine};

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// Builds the engine from the configuration file (or defaults) plus
/// environment credentials, then dispatches the subcommand.
pub async fn run(cli: &Cli) -> Result<ApiResponse, CliError> {
    let config = load_config(cli)?;
    let queue_config = config.queue.clone();
    let engine = apply_credentials(Engine::builder(config)).build();

    match &cli.command {
        Command::Product(args) => product::run(&engine, args).await,
        Command::Search(args) => search::run(&engine, args).await,
        Command::Products(args) => products::run(&engine, args).await,
        Command::TestConnection(args) => connection::run(&engine, args).await,
        Command::Quota => quota::run(&engine),
        Command::Queue(command) => {
            let queue = QueueEngine::new(
                Arc::new(MemoryJobStore::new()),
                Arc::new(ManagerJobExecutor::new(engine.manager.clone())),
                queue_config,
                Arc::new(merchx_core::SystemClock),
            );
            queue::run(&queue, command).await
        }
        Command::Cache(command) => cache::run(&engine, command),
    }
}

fn load_config(cli: &Cli) -> Result<EngineConfig, CliError> {
    match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str(&raw)
                .map_err(|error| CliError::Config(format!("{}: {error}", path.display())))
        }
        None => Ok(EngineConfig::default()),
    }
}

fn apply_credentials(mut builder: merchx_core::EngineBuilder) -> merchx_core::EngineBuilder {
    if let Ok(api_key) = std::env::var("RAINFOREST_API_KEY") {
        builder = builder.credentials(
            ProviderId::Rainforest,
            Credentials::new().with("api_key", api_key),
        );
    }

    if let (Ok(access_key), Ok(secret_key), Ok(partner_tag)) = (
        std::env::var("PAAPI_ACCESS_KEY"),
        std::env::var("PAAPI_SECRET_KEY"),
        std::env::var("PAAPI_PARTNER_TAG"),
    ) {
        let mut credentials = Credentials::new()
            .with("access_key", access_key)
            .with("secret_key", secret_key)
            .with("partner_tag", partner_tag);
        if let Ok(marketplace) = std::env::var("PAAPI_MARKETPLACE") {
            credentials = credentials.with("marketplace", marketplace);
        }
        builder = builder.credentials(ProviderId::Paapi, credentials);
    }

    builder
}
