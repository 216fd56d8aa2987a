use std::sync::Arc;
use std::time::Duration;

use insight_agent::{AnalysisEngineClient, AnalysisOrchestrator, ChatCompletionsClient};
use insight_core::config::{AppConfig, LoadOptions};
use insight_core::freshness::AnalysisCache;
use insight_db::repositories::SqlProfileRepository;
use insight_db::{connect_with_settings, migrations, DbPool};
use tokio::runtime::Runtime;

use crate::commands::CommandResult;

/// `(error_class, message, exit_code)` raised inside an async command body.
pub(crate) type Failure = (&'static str, String, u8);

pub(crate) fn load_config(command: &str) -> Result<AppConfig, CommandResult> {
    AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            2,
        )
    })
}

pub(crate) fn runtime(command: &str) -> Result<Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })
}

/// Connects and brings the schema up to date.
pub(crate) async fn open_database(config: &AppConfig) -> Result<DbPool, Failure> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

    migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string(), 5u8))?;
    Ok(pool)
}

pub(crate) fn orchestrator(
    config: &AppConfig,
    pool: &DbPool,
) -> Result<AnalysisOrchestrator, Failure> {
    let llm = ChatCompletionsClient::from_config(&config.llm)
        .map_err(|error| ("llm_client", format!("{error:#}"), 3u8))?;
    let engine = AnalysisEngineClient::new(
        Arc::new(llm),
        config.llm.instruction_template.clone(),
        Duration::from_secs(config.llm.timeout_secs),
    );

    Ok(AnalysisOrchestrator::new(
        Arc::new(SqlProfileRepository::new(pool.clone())),
        engine,
        AnalysisCache::with_staleness_minutes(config.analysis.staleness_minutes),
    ))
}
