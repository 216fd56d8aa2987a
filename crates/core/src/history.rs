//! Pure half of the history merge: grouping raw orders per customer and
//! folding purchase facts into a profile. Persistence and locking live with
//! the sync pass in `insight-agent`.

use std::collections::BTreeMap;

use crate::domain::customer::CustomerProfile;
use crate::domain::order::RawOrder;
use crate::domain::purchase::PurchaseRecord;

/// Every fact seen for one `(name, phone)` pair in a batch of raw orders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomerOrderGroup {
    pub name: String,
    pub phone_number: String,
    pub facts: Vec<PurchaseRecord>,
}

/// Groups orders by `(customer_name, customer_phone)` and flattens their line
/// items. Groups come back sorted by key; facts keep order-then-line order.
pub fn group_orders(orders: &[RawOrder]) -> Vec<CustomerOrderGroup> {
    let mut groups: BTreeMap<(&str, &str), Vec<PurchaseRecord>> = BTreeMap::new();

    for order in orders {
        groups
            .entry((order.customer_name.as_str(), order.customer_phone.as_str()))
            .or_default()
            .extend(order.facts());
    }

    groups
        .into_iter()
        .map(|((name, phone_number), facts)| CustomerOrderGroup {
            name: name.to_string(),
            phone_number: phone_number.to_string(),
            facts,
        })
        .collect()
}

/// Set union of the profile's history with `new_facts`. Idempotent: merging
/// the same facts twice yields the same profile as merging them once.
pub fn merge_history(mut profile: CustomerProfile, new_facts: &[PurchaseRecord]) -> CustomerProfile {
    profile.absorb(new_facts);
    profile
}
