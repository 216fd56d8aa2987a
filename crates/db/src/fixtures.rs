use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Expected shape of the demo order fixture, one entry per customer.
const DEMO_CUSTOMERS: &[DemoCustomerContract] = &[
    DemoCustomerContract {
        name: "Kim Minji",
        line_items_label: "Kim Minji line items",
        phone_number: "010-1111-2222",
        order_refs: &["demo-order-1001", "demo-order-1002"],
        expected_line_items: 3,
    },
    DemoCustomerContract {
        name: "Lee Jiho",
        line_items_label: "Lee Jiho line items",
        phone_number: "010-3333-4444",
        order_refs: &["demo-order-1003"],
        expected_line_items: 2,
    },
    DemoCustomerContract {
        name: "Park Seoyeon",
        line_items_label: "Park Seoyeon line items",
        phone_number: "010-5555-6666",
        order_refs: &["demo-order-1004", "demo-order-1005"],
        expected_line_items: 3,
    },
];

/// Deterministic order set used by `insight seed` and local demos.
pub struct DemoOrderDataset;

impl DemoOrderDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_orders.sql");

    /// Inserts the demo orders. Rows that already exist are left untouched.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            customers_seeded: DEMO_CUSTOMERS.iter().map(|customer| customer.name).collect(),
            orders_seeded: DEMO_CUSTOMERS.iter().map(|customer| customer.order_refs.len()).sum(),
        })
    }

    /// Checks every demo order header and its line item count.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for customer in DEMO_CUSTOMERS {
            let mut headers_ok = true;
            for order_ref in customer.order_refs {
                let exists: i64 = sqlx::query_scalar(
                    "SELECT EXISTS(SELECT 1 FROM order_header
                     WHERE order_ref = ?1 AND customer_name = ?2 AND customer_phone = ?3)",
                )
                .bind(*order_ref)
                .bind(customer.name)
                .bind(customer.phone_number)
                .fetch_one(pool)
                .await?;
                headers_ok &= exists == 1;
            }
            checks.push((customer.name, headers_ok));

            let line_items: i64 = sqlx::query_scalar(
                "SELECT COUNT(1) FROM order_line_item l
                 JOIN order_header h ON h.order_ref = l.order_ref
                 WHERE h.customer_name = ?1 AND h.customer_phone = ?2",
            )
            .bind(customer.name)
            .bind(customer.phone_number)
            .fetch_one(pool)
            .await?;
            checks.push((customer.line_items_label, line_items == customer.expected_line_items));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }
}

#[derive(Debug, Clone, Copy)]
struct DemoCustomerContract {
    name: &'static str,
    phone_number: &'static str,
    order_refs: &'static [&'static str],
    expected_line_items: i64,
    line_items_label: &'static str,
}

#[derive(Debug)]
pub struct SeedResult {
    pub customers_seeded: Vec<&'static str>,
    pub orders_seeded: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
