use chrono::{DateTime, Utc};
use insight_core::domain::order::{OrderLineItem, RawOrder};
use sqlx::Row;

use super::{OrderSource, RepositoryError};
use crate::DbPool;

/// Reads orders from the `order_header` / `order_line_item` tables.
pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Writes one order with its line items. Re-inserting an existing
    /// `order_ref` is a no-op.
    pub async fn insert_order(
        &self,
        order: &RawOrder,
        ordered_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT OR IGNORE INTO order_header (order_ref, customer_name, customer_phone, ordered_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&order.order_ref)
        .bind(&order.customer_name)
        .bind(&order.customer_phone)
        .bind(ordered_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for (line_no, item) in order.line_items.iter().enumerate() {
            sqlx::query(
                "INSERT OR IGNORE INTO order_line_item (order_ref, line_no, product_name, option_value)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&order.order_ref)
            .bind(line_no as i64 + 1)
            .bind(&item.product_name)
            .bind(&item.option_value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl OrderSource for SqlOrderRepository {
    async fn fetch_orders(&self) -> Result<Vec<RawOrder>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT h.order_ref, h.customer_name, h.customer_phone,
                    l.product_name, l.option_value
             FROM order_header h
             LEFT JOIN order_line_item l ON l.order_ref = h.order_ref
             ORDER BY h.ordered_at ASC, h.order_ref ASC, l.line_no ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());
        let mut orders: Vec<RawOrder> = Vec::new();

        for row in &rows {
            let order_ref: String = row.try_get("order_ref").map_err(decode)?;
            let product_name: Option<String> = row.try_get("product_name").map_err(decode)?;
            let option_value: Option<String> = row.try_get("option_value").map_err(decode)?;

            let starts_new_order =
                orders.last().map_or(true, |current| current.order_ref != order_ref);
            if starts_new_order {
                orders.push(RawOrder {
                    customer_name: row.try_get("customer_name").map_err(decode)?,
                    customer_phone: row.try_get("customer_phone").map_err(decode)?,
                    order_ref,
                    line_items: Vec::new(),
                });
            }

            if let (Some(product_name), Some(current)) = (product_name, orders.last_mut()) {
                current
                    .line_items
                    .push(OrderLineItem::new(product_name, option_value.unwrap_or_default()));
            }
        }

        Ok(orders)
    }
}
