use insight_core::domain::customer::CustomerId;

use crate::commands::support::{load_config, open_database, orchestrator, runtime, Failure};
use crate::commands::CommandResult;

pub fn run(customer_id: i64, force: bool) -> CommandResult {
    let config = match load_config("analyze") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("analyze") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let orchestrator = orchestrator(&config, &pool)?;

        let outcome = orchestrator.get_analysis(CustomerId(customer_id), force).await;
        pool.close().await;

        let analysis = outcome.map_err(|error| (error.class(), error.to_string(), 6u8))?;
        let rendered = serde_json::to_string(&analysis)
            .map_err(|error| ("serialization", error.to_string(), 6u8))?;
        Ok::<String, Failure>(rendered)
    });

    match result {
        Ok(analysis) => CommandResult::success("analyze", analysis),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("analyze", error_class, message, exit_code)
        }
    }
}
