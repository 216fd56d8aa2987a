use std::collections::{HashMap, HashSet};

use insight_core::history::group_orders;
use insight_db::repositories::{OrderSource, SqlOrderRepository};
use insight_db::{connect_with_settings, migrations, DemoOrderDataset};

type SeedContractTestResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                $left,
                $right
            ));
        }
    };
    ($left:expr, $right:expr, $($arg:tt)*) => {
        if $left != $right {
            return Err(format!($($arg)*));
        }
    };
}

/// `(name, phone, distinct purchase facts)` every consumer of the demo set relies on.
const EXPECTED_CUSTOMERS: &[(&str, &str, usize)] = &[
    ("Kim Minji", "010-1111-2222", 3),
    ("Lee Jiho", "010-3333-4444", 2),
    ("Park Seoyeon", "010-5555-6666", 3),
];

/// Pulls `'demo-order-NNNN'` literals out of the fixture text.
fn quoted_order_refs(sql: &str) -> Vec<&str> {
    sql.split('\'').filter(|token| token.starts_with("demo-order-")).collect()
}

#[test]
fn every_line_item_references_a_seeded_header() -> SeedContractTestResult {
    let sql = DemoOrderDataset::SQL;
    let (headers, line_items) = sql
        .split_once("INSERT OR IGNORE INTO order_line_item")
        .ok_or_else(|| "fixture should insert order line items".to_string())?;

    let header_refs: HashSet<&str> = quoted_order_refs(headers).into_iter().collect();
    require_eq!(header_refs.len(), 5, "expected five demo orders, got {}", header_refs.len());

    for order_ref in quoted_order_refs(line_items) {
        require!(
            header_refs.contains(order_ref),
            "line item references unseeded order {order_ref}"
        );
    }

    require!(
        sql.matches("INSERT OR IGNORE").count() == 2,
        "fixture inserts must stay idempotent"
    );
    Ok(())
}

#[tokio::test]
async fn seeded_orders_group_into_expected_customers() -> SeedContractTestResult {
    let pool = connect_with_settings("sqlite::memory:", 1, 30)
        .await
        .map_err(|error| format!("connect: {error}"))?;
    migrations::run_pending(&pool).await.map_err(|error| format!("migrate: {error}"))?;
    DemoOrderDataset::load(&pool).await.map_err(|error| format!("seed: {error}"))?;

    let orders = SqlOrderRepository::new(pool.clone())
        .fetch_orders()
        .await
        .map_err(|error| format!("fetch orders: {error}"))?;
    require_eq!(orders.len(), 5);

    let groups = group_orders(&orders);
    require_eq!(groups.len(), EXPECTED_CUSTOMERS.len());

    let by_name: HashMap<&str, _> = groups.iter().map(|group| (group.name.as_str(), group)).collect();
    for (name, phone, expected_facts) in EXPECTED_CUSTOMERS {
        let group = by_name.get(name).ok_or_else(|| format!("missing customer group {name}"))?;
        require_eq!(group.phone_number.as_str(), *phone);

        let distinct: HashSet<_> = group.facts.iter().collect();
        require_eq!(
            distinct.len(),
            *expected_facts,
            "{name} should contribute {expected_facts} distinct purchase facts, got {}",
            distinct.len()
        );
    }

    let kim = by_name.get("Kim Minji").ok_or_else(|| "missing Kim Minji".to_string())?;
    let repeat_purchases = kim
        .facts
        .iter()
        .filter(|fact| fact.product_name == "Chocolate Milk" && fact.option_value == "Zero-sugar")
        .count();
    require_eq!(
        repeat_purchases,
        2,
        "the same product bought in two orders must stay two distinct facts"
    );

    pool.close().await;
    Ok(())
}
