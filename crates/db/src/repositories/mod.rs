use async_trait::async_trait;
use thiserror::Error;

use insight_core::domain::customer::{CustomerId, CustomerProfile};
use insight_core::domain::order::RawOrder;
use insight_core::errors::AnalysisError;

pub mod memory;
pub mod order;
pub mod profile;

pub use memory::{InMemoryOrderSource, InMemoryProfileStore};
pub use order::SqlOrderRepository;
pub use profile::SqlProfileRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("customer profile `{0}` was modified concurrently")]
    Conflict(CustomerId),
    #[error("customer profile `{0}` does not exist")]
    MissingProfile(CustomerId),
}

impl From<RepositoryError> for AnalysisError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Conflict(id) => AnalysisError::StoreConflict(id),
            RepositoryError::MissingProfile(id) => AnalysisError::NotFound(id),
            other => AnalysisError::Persistence(other.to_string()),
        }
    }
}

/// Durable keyed storage of customer profiles.
///
/// `save` is optimistic: it only succeeds when the stored version still
/// equals `profile.version`, and bumps it on success. Purchase records are
/// only ever added, never removed.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Returns the profile for `(name, phone_number)`, creating an empty one
    /// on first sighting. Concurrent callers observe the same profile.
    async fn find_or_create(
        &self,
        name: &str,
        phone_number: &str,
    ) -> Result<CustomerProfile, RepositoryError>;

    async fn load(&self, id: CustomerId) -> Result<Option<CustomerProfile>, RepositoryError>;

    async fn save(&self, profile: CustomerProfile) -> Result<(), RepositoryError>;

    /// All profiles ordered by id.
    async fn list_profiles(&self) -> Result<Vec<CustomerProfile>, RepositoryError>;
}

/// Read-only upstream supply of raw orders.
#[async_trait]
pub trait OrderSource: Send + Sync {
    async fn fetch_orders(&self) -> Result<Vec<RawOrder>, RepositoryError>;
}
