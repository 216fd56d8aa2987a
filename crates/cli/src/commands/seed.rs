use insight_db::DemoOrderDataset;

use crate::commands::support::{load_config, open_database, runtime, Failure};
use crate::commands::CommandResult;

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;

        let seed_result = DemoOrderDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verification = DemoOrderDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let run_result: Result<_, Failure> = if verification.all_present {
            Ok(seed_result)
        } else {
            let failed_checks = failed_checks(&verification.checks);
            Err(("seed_verification", verification_message(&failed_checks), 6u8))
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(seeded) => {
            let customers: Vec<String> =
                seeded.customers_seeded.iter().map(|name| format!("  - {name}")).collect();
            CommandResult::success(
                "seed",
                format!(
                    "demo order set loaded: {} orders for {} customers:\n{}",
                    seeded.orders_seeded,
                    seeded.customers_seeded.len(),
                    customers.join("\n")
                ),
            )
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn failed_checks(checks: &[(&'static str, bool)]) -> Vec<&'static str> {
    checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect()
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "some demo orders failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
