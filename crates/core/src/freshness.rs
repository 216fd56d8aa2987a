//! Freshness policy for cached customer analyses.

use chrono::{DateTime, Duration, Utc};

use crate::domain::customer::CustomerProfile;

/// Staleness window applied when configuration does not override it.
pub const DEFAULT_STALENESS_MINUTES: i64 = 30;

/// Longest window configuration accepts: one year.
pub const MAX_STALENESS_MINUTES: i64 = 525_600;

/// Decides whether a profile's cached analysis may be served as-is.
///
/// Pure function of profile state and the supplied clock reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnalysisCache {
    staleness_window: Duration,
}

impl Default for AnalysisCache {
    fn default() -> Self {
        Self::with_staleness_minutes(DEFAULT_STALENESS_MINUTES)
    }
}

impl AnalysisCache {
    pub fn new(staleness_window: Duration) -> Self {
        Self { staleness_window }
    }

    /// Windows beyond what `Duration` can represent saturate to `Duration::MAX`.
    pub fn with_staleness_minutes(minutes: i64) -> Self {
        Self::new(Duration::try_minutes(minutes).unwrap_or(Duration::MAX))
    }

    pub fn staleness_window(&self) -> Duration {
        self.staleness_window
    }

    /// `false` when a refresh is forced, when nothing was ever analyzed, or
    /// when the analysis is at least one staleness window old.
    pub fn is_fresh(
        &self,
        profile: &CustomerProfile,
        now: DateTime<Utc>,
        force_refresh: bool,
    ) -> bool {
        if force_refresh {
            return false;
        }
        match profile.analyzed_at() {
            Some(analyzed_at) => now.signed_duration_since(analyzed_at) < self.staleness_window,
            None => false,
        }
    }
}
