use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// One `(order, product, option)` purchase fact. Two records are the same fact
/// iff all three fields are equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub order_ref: String,
    pub product_name: String,
    pub option_value: String,
}

impl PurchaseRecord {
    pub fn new(
        order_ref: impl Into<String>,
        product_name: impl Into<String>,
        option_value: impl Into<String>,
    ) -> Self {
        Self {
            order_ref: order_ref.into(),
            product_name: product_name.into(),
            option_value: option_value.into(),
        }
    }

    /// Single-line form handed to the analysis engine.
    pub fn description(&self) -> String {
        format!("{} {} {}", self.order_ref, self.product_name, self.option_value)
    }
}

/// Deduplicated purchase history.
///
/// Records keep their insertion order (the engine prompt lists them that way),
/// but equality is set equality: two histories holding the same facts in a
/// different order compare equal.
#[derive(Clone, Debug, Default)]
pub struct PurchaseHistory {
    records: Vec<PurchaseRecord>,
    index: HashSet<PurchaseRecord>,
}

impl PurchaseHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = PurchaseRecord>,
    {
        let mut history = Self::new();
        for record in records {
            history.insert(record);
        }
        history
    }

    /// Appends `record` unless an identical fact is already present.
    /// Returns whether the history grew.
    pub fn insert(&mut self, record: PurchaseRecord) -> bool {
        if self.index.contains(&record) {
            return false;
        }
        self.index.insert(record.clone());
        self.records.push(record);
        true
    }

    pub fn contains(&self, record: &PurchaseRecord) -> bool {
        self.index.contains(record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[PurchaseRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &PurchaseRecord> {
        self.records.iter()
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.records.iter().map(PurchaseRecord::description).collect()
    }
}

impl PartialEq for PurchaseHistory {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for PurchaseHistory {}

impl FromIterator<PurchaseRecord> for PurchaseHistory {
    fn from_iter<I: IntoIterator<Item = PurchaseRecord>>(iter: I) -> Self {
        Self::from_records(iter)
    }
}
