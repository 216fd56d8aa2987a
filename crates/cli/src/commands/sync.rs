use insight_db::repositories::SqlOrderRepository;

use crate::commands::support::{load_config, open_database, orchestrator, runtime, Failure};
use crate::commands::CommandResult;

pub fn run() -> CommandResult {
    let config = match load_config("sync") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("sync") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let orchestrator = orchestrator(&config, &pool)?;
        let orders = SqlOrderRepository::new(pool.clone());

        let report = orchestrator
            .trigger_sync(&orders)
            .await
            .map_err(|error| (error.class(), error.to_string(), 6u8))?;
        let summaries =
            report.summaries.load().await.map_err(|error| (error.class(), error.to_string(), 6u8))?;

        pool.close().await;
        Ok::<_, Failure>((report.facts_added, report.failures, summaries))
    });

    let (facts_added, failures, summaries) = match result {
        Ok(outcome) => outcome,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("sync", error_class, message, exit_code);
        }
    };

    let mut lines = vec![format!(
        "sync complete: {} profiles, {facts_added} new purchase records, {} failed groups",
        summaries.len(),
        failures.len()
    )];
    lines.extend(summaries.iter().map(|summary| {
        let analysis = match summary.analyzed_at {
            Some(analyzed_at) => format!("analyzed {}", analyzed_at.to_rfc3339()),
            None => "not analyzed".to_string(),
        };
        format!(
            "  - #{} {} ({}): {} purchase records, {analysis}",
            summary.id, summary.name, summary.phone_number, summary.order_count
        )
    }));
    lines.extend(failures.iter().map(|failure| {
        format!("  ! {} ({}): {}", failure.name, failure.phone_number, failure.error)
    }));

    if failures.is_empty() {
        CommandResult::success("sync", lines.join("\n"))
    } else {
        CommandResult::failure("sync", "sync_partial", lines.join("\n"), 6)
    }
}
