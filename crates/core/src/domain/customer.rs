use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::purchase::{PurchaseHistory, PurchaseRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(pub i64);

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decoded engine output, before it is stamped with an analysis time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisContent {
    pub frequent_orders: Vec<String>,
    pub personalized_recommendations: Vec<String>,
    pub personalized_recommendations_reason: String,
    pub customer_segments: String,
}

/// Analysis fields as persisted on a profile. The timestamp and the content
/// only ever exist together, so a profile either has both or neither.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAnalysis {
    #[serde(flatten)]
    pub content: AnalysisContent,
    pub analyzed_at: DateTime<Utc>,
}

impl CachedAnalysis {
    pub fn new(content: AnalysisContent, analyzed_at: DateTime<Utc>) -> Self {
        Self { content, analyzed_at }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomerProfile {
    pub id: CustomerId,
    pub name: String,
    pub phone_number: String,
    pub purchase_history: PurchaseHistory,
    pub analysis: Option<CachedAnalysis>,
    /// Optimistic concurrency token maintained by the profile store.
    pub version: i64,
}

impl CustomerProfile {
    /// Fresh profile as created on first sighting of a `(name, phone)` pair.
    pub fn new(id: CustomerId, name: impl Into<String>, phone_number: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            phone_number: phone_number.into(),
            purchase_history: PurchaseHistory::new(),
            analysis: None,
            version: 0,
        }
    }

    /// Appends every fact not already present. Returns how many were new.
    pub fn absorb<'a, I>(&mut self, facts: I) -> usize
    where
        I: IntoIterator<Item = &'a PurchaseRecord>,
    {
        let mut added = 0;
        for fact in facts {
            if self.purchase_history.insert(fact.clone()) {
                added += 1;
            }
        }
        added
    }

    /// Replaces the analysis fields and timestamp as one unit.
    pub fn replace_analysis(&mut self, analysis: CachedAnalysis) {
        self.analysis = Some(analysis);
    }

    pub fn analyzed_at(&self) -> Option<DateTime<Utc>> {
        self.analysis.as_ref().map(|analysis| analysis.analyzed_at)
    }

    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            id: self.id,
            name: self.name.clone(),
            phone_number: self.phone_number.clone(),
            has_analysis: self.analysis.is_some(),
            order_count: self.purchase_history.len(),
            analyzed_at: self.analyzed_at(),
            personalized_recommendations: self
                .analysis
                .as_ref()
                .map(|analysis| analysis.content.personalized_recommendations.clone())
                .unwrap_or_default(),
        }
    }

    /// Caller-facing view of the cached analysis, if any.
    pub fn analysis_result(&self) -> Option<AnalysisResult> {
        self.analysis.as_ref().map(|analysis| AnalysisResult {
            customer_id: self.id,
            name: self.name.clone(),
            content: analysis.content.clone(),
            analyzed_at: analysis.analyzed_at,
        })
    }
}

/// Reporting row produced by a sync pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub id: CustomerId,
    pub name: String,
    pub phone_number: String,
    pub has_analysis: bool,
    pub order_count: usize,
    pub analyzed_at: Option<DateTime<Utc>>,
    pub personalized_recommendations: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub customer_id: CustomerId,
    pub name: String,
    #[serde(flatten)]
    pub content: AnalysisContent,
    pub analyzed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{AnalysisContent, CachedAnalysis, CustomerId, CustomerProfile};
    use crate::domain::purchase::PurchaseRecord;

    #[test]
    fn absorb_counts_only_new_facts() {
        let mut profile = CustomerProfile::new(CustomerId(1), "Kim", "010");
        let facts = vec![
            PurchaseRecord::new("O1", "Milk", "Zero-sugar"),
            PurchaseRecord::new("O1", "Milk", "Zero-sugar"),
            PurchaseRecord::new("O2", "Juice", "Orange"),
        ];

        assert_eq!(profile.absorb(&facts), 2);
        assert_eq!(profile.absorb(&facts), 0);
        assert_eq!(profile.purchase_history.len(), 2);
    }

    #[test]
    fn summary_reflects_analysis_state() {
        let mut profile = CustomerProfile::new(CustomerId(7), "Lee", "011");
        profile.absorb(&[PurchaseRecord::new("O9", "Soap", "Lavender")]);

        let before = profile.summary();
        assert!(!before.has_analysis);
        assert_eq!(before.order_count, 1);
        assert!(before.analyzed_at.is_none());

        let now = Utc::now();
        profile.replace_analysis(CachedAnalysis::new(
            AnalysisContent {
                personalized_recommendations: vec!["Shampoo".to_string()],
                ..AnalysisContent::default()
            },
            now,
        ));

        let after = profile.summary();
        assert!(after.has_analysis);
        assert_eq!(after.analyzed_at, Some(now));
        assert_eq!(after.personalized_recommendations, vec!["Shampoo".to_string()]);
    }

    #[test]
    fn analysis_result_is_absent_until_analyzed() {
        let profile = CustomerProfile::new(CustomerId(3), "Park", "012");
        assert!(profile.analysis_result().is_none());
    }
}
