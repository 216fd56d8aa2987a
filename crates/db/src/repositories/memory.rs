use std::collections::HashMap;

use tokio::sync::RwLock;

use insight_core::domain::customer::{CustomerId, CustomerProfile};
use insight_core::domain::order::RawOrder;

use super::{OrderSource, ProfileStore, RepositoryError};

#[derive(Default)]
struct ProfileTable {
    profiles: HashMap<CustomerId, CustomerProfile>,
    by_identity: HashMap<(String, String), CustomerId>,
    last_id: i64,
}

/// Process-local profile store with the same versioning contract as the SQL
/// repository.
#[derive(Default)]
pub struct InMemoryProfileStore {
    table: RwLock<ProfileTable>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn find_or_create(
        &self,
        name: &str,
        phone_number: &str,
    ) -> Result<CustomerProfile, RepositoryError> {
        let mut table = self.table.write().await;
        let identity = (name.to_string(), phone_number.to_string());

        if let Some(id) = table.by_identity.get(&identity).copied() {
            if let Some(profile) = table.profiles.get(&id) {
                return Ok(profile.clone());
            }
        }

        table.last_id += 1;
        let profile = CustomerProfile::new(CustomerId(table.last_id), name, phone_number);
        table.by_identity.insert(identity, profile.id);
        table.profiles.insert(profile.id, profile.clone());
        Ok(profile)
    }

    async fn load(&self, id: CustomerId) -> Result<Option<CustomerProfile>, RepositoryError> {
        let table = self.table.read().await;
        Ok(table.profiles.get(&id).cloned())
    }

    async fn save(&self, profile: CustomerProfile) -> Result<(), RepositoryError> {
        let mut table = self.table.write().await;
        let stored = table
            .profiles
            .get_mut(&profile.id)
            .ok_or(RepositoryError::MissingProfile(profile.id))?;

        if stored.version != profile.version {
            return Err(RepositoryError::Conflict(profile.id));
        }

        stored.absorb(profile.purchase_history.iter());
        stored.analysis = profile.analysis;
        stored.version += 1;
        Ok(())
    }

    async fn list_profiles(&self) -> Result<Vec<CustomerProfile>, RepositoryError> {
        let table = self.table.read().await;
        let mut profiles = table.profiles.values().cloned().collect::<Vec<_>>();
        profiles.sort_by_key(|profile| profile.id);
        Ok(profiles)
    }
}

/// Fixed list of orders, replaceable between sync passes.
#[derive(Default)]
pub struct InMemoryOrderSource {
    orders: RwLock<Vec<RawOrder>>,
}

impl InMemoryOrderSource {
    pub fn new(orders: Vec<RawOrder>) -> Self {
        Self { orders: RwLock::new(orders) }
    }

    pub async fn push(&self, order: RawOrder) {
        self.orders.write().await.push(order);
    }
}

#[async_trait::async_trait]
impl OrderSource for InMemoryOrderSource {
    async fn fetch_orders(&self) -> Result<Vec<RawOrder>, RepositoryError> {
        Ok(self.orders.read().await.clone())
    }
}
