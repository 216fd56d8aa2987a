//! Domain model and pure policies for customer purchase-history analysis.
//!
//! Nothing in this crate performs I/O: persistence lives in `insight-db` and
//! the engine call plus orchestration in `insight-agent`.

pub mod config;
pub mod domain;
pub mod errors;
pub mod freshness;
pub mod history;

pub use domain::customer::{
    AnalysisContent, AnalysisResult, CachedAnalysis, CustomerId, CustomerProfile, ProfileSummary,
};
pub use domain::order::{OrderLineItem, RawOrder};
pub use domain::purchase::{PurchaseHistory, PurchaseRecord};
pub use errors::{AnalysisError, InterfaceError};
pub use freshness::{AnalysisCache, DEFAULT_STALENESS_MINUTES, MAX_STALENESS_MINUTES};
pub use history::{group_orders, merge_history, CustomerOrderGroup};
