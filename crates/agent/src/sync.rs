use std::sync::Arc;

use insight_core::domain::customer::{CustomerId, CustomerProfile, ProfileSummary};
use insight_core::domain::order::RawOrder;
use insight_core::domain::purchase::PurchaseRecord;
use insight_core::errors::AnalysisError;
use insight_core::history::{group_orders, merge_history, CustomerOrderGroup};
use insight_db::repositories::{ProfileStore, RepositoryError};
use tracing::{info, warn};

use crate::locks::LockTable;

/// One customer group that could not be merged during a sync pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncFailure {
    pub name: String,
    pub phone_number: String,
    pub error: AnalysisError,
}

/// Re-readable view of every profile in the store.
#[derive(Clone)]
pub struct ProfileSummaries {
    store: Arc<dyn ProfileStore>,
}

impl ProfileSummaries {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self { store }
    }

    /// Reads the store again on every call.
    pub async fn load(&self) -> Result<Vec<ProfileSummary>, AnalysisError> {
        let profiles = self.store.list_profiles().await?;
        Ok(profiles.iter().map(CustomerProfile::summary).collect())
    }
}

pub struct SyncReport {
    /// Profiles whose group merged without error, in group order.
    pub profiles_touched: Vec<CustomerId>,
    pub facts_added: usize,
    pub failures: Vec<SyncFailure>,
    pub summaries: ProfileSummaries,
}

/// Folds raw orders into stored profiles.
pub struct HistoryMerger {
    store: Arc<dyn ProfileStore>,
    write_locks: Arc<LockTable<CustomerId>>,
}

impl HistoryMerger {
    pub fn new(store: Arc<dyn ProfileStore>, write_locks: Arc<LockTable<CustomerId>>) -> Self {
        Self { store, write_locks }
    }

    /// Set union of the profile history with `new_facts`.
    pub fn merge(profile: CustomerProfile, new_facts: &[PurchaseRecord]) -> CustomerProfile {
        merge_history(profile, new_facts)
    }

    /// Groups `orders` per customer and merges each group into its profile.
    ///
    /// A failing group is recorded in the report and the pass moves on.
    pub async fn sync_all(&self, orders: &[RawOrder]) -> SyncReport {
        let groups = group_orders(orders);
        let mut profiles_touched = Vec::with_capacity(groups.len());
        let mut facts_added = 0;
        let mut failures = Vec::new();

        for group in &groups {
            match self.sync_group(group).await {
                Ok((id, added)) => {
                    profiles_touched.push(id);
                    facts_added += added;
                }
                Err(error) => {
                    warn!(
                        event_name = "sync.group.failed",
                        customer_name = %group.name,
                        error_class = error.class(),
                        error = %error,
                        "failed to merge customer order group"
                    );
                    failures.push(SyncFailure {
                        name: group.name.clone(),
                        phone_number: group.phone_number.clone(),
                        error,
                    });
                }
            }
        }

        info!(
            event_name = "sync.completed",
            groups = groups.len(),
            profiles_touched = profiles_touched.len(),
            facts_added,
            failures = failures.len(),
            "sync pass completed"
        );

        SyncReport {
            profiles_touched,
            facts_added,
            failures,
            summaries: ProfileSummaries::new(Arc::clone(&self.store)),
        }
    }

    async fn sync_group(
        &self,
        group: &CustomerOrderGroup,
    ) -> Result<(CustomerId, usize), AnalysisError> {
        let id = self.store.find_or_create(&group.name, &group.phone_number).await?.id;
        let _write = self.write_locks.lock(id).await;

        let mut retried = false;
        loop {
            let profile = self.store.load(id).await?.ok_or(AnalysisError::NotFound(id))?;
            let before = profile.purchase_history.len();
            let merged = Self::merge(profile, &group.facts);
            let added = merged.purchase_history.len() - before;

            if added == 0 {
                return Ok((id, 0));
            }

            match self.store.save(merged).await {
                Ok(()) => return Ok((id, added)),
                Err(RepositoryError::Conflict(_)) if !retried => {
                    warn!(
                        event_name = "sync.group.conflict_retry",
                        customer_id = %id,
                        "profile changed during merge; re-reading once"
                    );
                    retried = true;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }
}
