use std::sync::Arc;
use std::time::Duration;

use insight_agent::{AnalysisEngineClient, AnalysisOrchestrator, ChatCompletionsClient};
use insight_core::config::{AppConfig, ConfigError};
use insight_core::freshness::AnalysisCache;
use insight_db::repositories::{OrderSource, SqlOrderRepository, SqlProfileRepository};
use insight_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: Arc<AnalysisOrchestrator>,
    pub orders: Arc<dyn OrderSource>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("LLM client setup failed: {0}")]
    LlmClient(String),
}

/// Loads config and bootstraps in one step. The binary loads config itself so
/// logging is up before bootstrap events fire.
#[cfg(test)]
pub async fn bootstrap(
    options: insight_core::config::LoadOptions,
) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let llm = ChatCompletionsClient::from_config(&config.llm)
        .map_err(|error| BootstrapError::LlmClient(format!("{error:#}")))?;
    let engine = AnalysisEngineClient::new(
        Arc::new(llm),
        config.llm.instruction_template.clone(),
        Duration::from_secs(config.llm.timeout_secs),
    );
    let cache = AnalysisCache::with_staleness_minutes(config.analysis.staleness_minutes);
    let orchestrator = AnalysisOrchestrator::new(
        Arc::new(SqlProfileRepository::new(db_pool.clone())),
        engine,
        cache,
    );
    info!(
        event_name = "system.bootstrap.orchestrator_ready",
        correlation_id = "bootstrap",
        provider = ?config.llm.provider,
        model = %config.llm.model,
        staleness_minutes = config.analysis.staleness_minutes,
        "analysis orchestrator initialized"
    );

    Ok(Application {
        orchestrator: Arc::new(orchestrator),
        orders: Arc::new(SqlOrderRepository::new(db_pool.clone())),
        config,
        db_pool,
    })
}
