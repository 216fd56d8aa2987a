use serde::{Deserialize, Serialize};

use crate::domain::purchase::PurchaseRecord;

/// One order as delivered by the upstream order repository. Read-only here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOrder {
    pub customer_name: String,
    pub customer_phone: String,
    pub order_ref: String,
    pub line_items: Vec<OrderLineItem>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineItem {
    pub product_name: String,
    pub option_value: String,
}

impl OrderLineItem {
    pub fn new(product_name: impl Into<String>, option_value: impl Into<String>) -> Self {
        Self { product_name: product_name.into(), option_value: option_value.into() }
    }
}

impl RawOrder {
    /// Flattens the line items into purchase facts tagged with this order's ref.
    pub fn facts(&self) -> impl Iterator<Item = PurchaseRecord> + '_ {
        self.line_items.iter().map(|item| {
            PurchaseRecord::new(
                self.order_ref.clone(),
                item.product_name.clone(),
                item.option_value.clone(),
            )
        })
    }
}
