use std::sync::Arc;

use chrono::Utc;
use insight_core::domain::customer::{
    AnalysisContent, AnalysisResult, CachedAnalysis, CustomerId, CustomerProfile,
};
use insight_core::errors::AnalysisError;
use insight_core::freshness::AnalysisCache;
use insight_db::repositories::{OrderSource, ProfileStore, RepositoryError};
use tracing::{debug, info, warn};

use crate::engine::AnalysisEngineClient;
use crate::locks::LockTable;
use crate::parser::ResponseParser;
use crate::sync::{HistoryMerger, SyncReport};

const RAW_PREVIEW_CHARS: usize = 200;

/// Entry point for sync passes and cached analysis lookups.
///
/// Holds two per-customer lock tables: `write_locks` serialises every
/// read-modify-write of a profile, `refresh_locks` admits at most one engine
/// call per customer at a time.
pub struct AnalysisOrchestrator {
    store: Arc<dyn ProfileStore>,
    engine: AnalysisEngineClient,
    cache: AnalysisCache,
    merger: HistoryMerger,
    write_locks: Arc<LockTable<CustomerId>>,
    refresh_locks: LockTable<CustomerId>,
}

impl AnalysisOrchestrator {
    pub fn new(
        store: Arc<dyn ProfileStore>,
        engine: AnalysisEngineClient,
        cache: AnalysisCache,
    ) -> Self {
        let write_locks = Arc::new(LockTable::new());
        Self {
            merger: HistoryMerger::new(Arc::clone(&store), Arc::clone(&write_locks)),
            store,
            engine,
            cache,
            write_locks,
            refresh_locks: LockTable::new(),
        }
    }

    pub fn merger(&self) -> &HistoryMerger {
        &self.merger
    }

    /// Pulls every order from `source` and merges it into the store.
    pub async fn trigger_sync(&self, source: &dyn OrderSource) -> Result<SyncReport, AnalysisError> {
        let orders = source.fetch_orders().await?;
        debug!(event_name = "sync.orders.fetched", orders = orders.len(), "fetched raw orders");
        Ok(self.merger.sync_all(&orders).await)
    }

    /// Returns the cached analysis when fresh, otherwise refreshes it through
    /// the engine. A failed refresh leaves the stored profile untouched.
    pub async fn get_analysis(
        &self,
        customer_id: CustomerId,
        force_refresh: bool,
    ) -> Result<AnalysisResult, AnalysisError> {
        let profile = self.load_profile(customer_id).await?;

        if self.cache.is_fresh(&profile, Utc::now(), force_refresh) {
            if let Some(result) = profile.analysis_result() {
                info!(
                    event_name = "analysis.cache.hit",
                    customer_id = %customer_id,
                    analyzed_at = %result.analyzed_at,
                    "serving cached analysis"
                );
                return Ok(result);
            }
        }

        let observed = profile.analyzed_at();
        let _refresh = self.refresh_locks.lock(customer_id).await;

        let current = self.load_profile(customer_id).await?;
        if current.analyzed_at() != observed {
            if let Some(result) = current.analysis_result() {
                info!(
                    event_name = "analysis.refresh.coalesced",
                    customer_id = %customer_id,
                    analyzed_at = %result.analyzed_at,
                    "another caller refreshed this analysis while we waited"
                );
                return Ok(result);
            }
        }

        info!(
            event_name = "analysis.refresh.started",
            customer_id = %customer_id,
            force_refresh,
            orders = current.purchase_history.len(),
            "refreshing customer analysis"
        );

        let raw = self.engine.analyze(&current).await?;
        let content = ResponseParser::parse(&raw).map_err(|error| {
            warn!(
                event_name = "analysis.response.malformed",
                customer_id = %customer_id,
                error = %error,
                raw_preview = %preview(&raw),
                "discarding malformed engine response"
            );
            error
        })?;

        let result = self.store_analysis(customer_id, content).await?;
        info!(
            event_name = "analysis.refresh.completed",
            customer_id = %customer_id,
            analyzed_at = %result.analyzed_at,
            "customer analysis refreshed"
        );
        Ok(result)
    }

    async fn load_profile(&self, customer_id: CustomerId) -> Result<CustomerProfile, AnalysisError> {
        self.store.load(customer_id).await?.ok_or(AnalysisError::NotFound(customer_id))
    }

    /// Applies new analysis fields to the latest stored profile so facts merged
    /// during the engine call are kept. One conflict is retried.
    async fn store_analysis(
        &self,
        customer_id: CustomerId,
        content: AnalysisContent,
    ) -> Result<AnalysisResult, AnalysisError> {
        let analysis = CachedAnalysis::new(content, Utc::now());
        let _write = self.write_locks.lock(customer_id).await;

        let mut retried = false;
        loop {
            let mut latest = self.load_profile(customer_id).await?;
            latest.replace_analysis(analysis.clone());
            let result = latest.analysis_result().ok_or(AnalysisError::NotFound(customer_id))?;

            match self.store.save(latest).await {
                Ok(()) => return Ok(result),
                Err(RepositoryError::Conflict(_)) if !retried => {
                    warn!(
                        event_name = "analysis.store.conflict_retry",
                        customer_id = %customer_id,
                        "profile changed while saving analysis; re-reading once"
                    );
                    retried = true;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }
}

fn preview(raw: &str) -> String {
    let mut chars = raw.chars();
    let head: String = chars.by_ref().take(RAW_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use insight_core::domain::customer::{
        AnalysisContent, CachedAnalysis, CustomerId, CustomerProfile,
    };
    use insight_core::domain::order::{OrderLineItem, RawOrder};
    use insight_core::errors::AnalysisError;
    use insight_core::freshness::AnalysisCache;
    use insight_db::repositories::{
        InMemoryOrderSource, InMemoryProfileStore, ProfileStore, RepositoryError,
    };

    use super::{preview, AnalysisOrchestrator};
    use crate::engine::AnalysisEngineClient;
    use crate::llm::LlmClient;

    const KIM_RESPONSE: &str = r#"{"frequentOrders":["Milk 1x"],"personalizedRecommendations":["Juice"],"personalizedRecommendationsReason":"...","customerSegments":"Food-focused"}"#;

    struct ScriptedLlm {
        calls: AtomicUsize,
        reply: Result<String, String>,
        delay: Duration,
    }

    impl ScriptedLlm {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                reply: Ok(reply.to_string()),
                delay: Duration::ZERO,
            })
        }

        fn slow(reply: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), reply: Ok(reply.to_string()), delay })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                reply: Err(message.to_string()),
                delay: Duration::ZERO,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.reply.clone().map_err(|message| anyhow!(message))
        }
    }

    fn kim_order(order_ref: &str) -> RawOrder {
        RawOrder {
            customer_name: "Kim".to_string(),
            customer_phone: "010".to_string(),
            order_ref: order_ref.to_string(),
            line_items: vec![OrderLineItem::new("Milk", "Zero-sugar")],
        }
    }

    fn orchestrator(
        store: Arc<InMemoryProfileStore>,
        llm: Arc<ScriptedLlm>,
    ) -> AnalysisOrchestrator {
        let engine = AnalysisEngineClient::new(llm, "Analyze.", Duration::from_secs(5));
        AnalysisOrchestrator::new(store, engine, AnalysisCache::default())
    }

    async fn seeded_kim(store: &InMemoryProfileStore) -> CustomerId {
        let mut profile = store.find_or_create("Kim", "010").await.expect("create");
        profile.absorb(kim_order("O1").facts().collect::<Vec<_>>().iter());
        let id = profile.id;
        store.save(profile).await.expect("save");
        id
    }

    async fn age_analysis(store: &InMemoryProfileStore, id: CustomerId, age: ChronoDuration) {
        let mut profile = store.load(id).await.expect("load").expect("exists");
        profile.replace_analysis(CachedAnalysis::new(
            AnalysisContent { customer_segments: "Old".to_string(), ..AnalysisContent::default() },
            Utc::now() - age,
        ));
        store.save(profile).await.expect("save");
    }

    #[tokio::test]
    async fn sync_twice_then_analyze_end_to_end() {
        let store = Arc::new(InMemoryProfileStore::new());
        let llm = ScriptedLlm::new(KIM_RESPONSE);
        let orchestrator = orchestrator(store.clone(), llm.clone());
        let source = InMemoryOrderSource::new(vec![kim_order("O1")]);

        orchestrator.trigger_sync(&source).await.expect("first sync");
        let report = orchestrator.trigger_sync(&source).await.expect("second sync");

        let summaries = report.summaries.load().await.expect("summaries");
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].order_count, 1);
        let kim_id = summaries[0].id;

        let before = Utc::now();
        let result = orchestrator.get_analysis(kim_id, false).await.expect("analysis");

        assert_eq!(result.content.frequent_orders, vec!["Milk 1x".to_string()]);
        assert_eq!(result.content.personalized_recommendations, vec!["Juice".to_string()]);
        assert_eq!(result.content.personalized_recommendations_reason, "...");
        assert_eq!(result.content.customer_segments, "Food-focused");
        assert!(result.analyzed_at >= before && result.analyzed_at <= Utc::now());
        assert_eq!(result.name, "Kim");
        assert_eq!(llm.calls(), 1);

        let stored = store.load(kim_id).await.expect("load").expect("exists");
        assert_eq!(stored.analysis_result(), Some(result));
        assert_eq!(stored.purchase_history.len(), 1);
    }

    #[tokio::test]
    async fn fresh_analysis_is_served_without_engine_call() {
        let store = Arc::new(InMemoryProfileStore::new());
        let llm = ScriptedLlm::new(KIM_RESPONSE);
        let orchestrator = orchestrator(store.clone(), llm.clone());
        let id = seeded_kim(&store).await;
        age_analysis(&store, id, ChronoDuration::minutes(5)).await;

        let result = orchestrator.get_analysis(id, false).await.expect("cached");
        assert_eq!(result.content.customer_segments, "Old");
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn force_refresh_bypasses_fresh_cache() {
        let store = Arc::new(InMemoryProfileStore::new());
        let llm = ScriptedLlm::new(KIM_RESPONSE);
        let orchestrator = orchestrator(store.clone(), llm.clone());
        let id = seeded_kim(&store).await;
        age_analysis(&store, id, ChronoDuration::minutes(5)).await;

        let result = orchestrator.get_analysis(id, true).await.expect("refreshed");
        assert_eq!(result.content.customer_segments, "Food-focused");
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn unknown_customer_is_not_found() {
        let store = Arc::new(InMemoryProfileStore::new());
        let llm = ScriptedLlm::new(KIM_RESPONSE);
        let orchestrator = orchestrator(store, llm.clone());

        let error = orchestrator.get_analysis(CustomerId(99), false).await.expect_err("missing");
        assert_eq!(error, AnalysisError::NotFound(CustomerId(99)));
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_response_leaves_profile_unchanged() {
        let store = Arc::new(InMemoryProfileStore::new());
        let llm = ScriptedLlm::new("not json");
        let orchestrator = orchestrator(store.clone(), llm.clone());
        let id = seeded_kim(&store).await;
        age_analysis(&store, id, ChronoDuration::hours(2)).await;
        let before = store.load(id).await.expect("load").expect("exists");

        let error = orchestrator.get_analysis(id, false).await.expect_err("malformed");
        assert!(matches!(error, AnalysisError::MalformedResponse { ref raw, .. } if raw == "not json"));

        let after = store.load(id).await.expect("load").expect("exists");
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn engine_failure_is_surfaced_without_stale_fallback() {
        let store = Arc::new(InMemoryProfileStore::new());
        let llm = ScriptedLlm::failing("503 from provider");
        let orchestrator = orchestrator(store.clone(), llm.clone());
        let id = seeded_kim(&store).await;
        age_analysis(&store, id, ChronoDuration::hours(2)).await;
        let before = store.load(id).await.expect("load").expect("exists");

        let error = orchestrator.get_analysis(id, false).await.expect_err("unavailable");
        assert!(matches!(error, AnalysisError::EngineUnavailable(_)));
        assert_eq!(store.load(id).await.expect("load").expect("exists"), before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_stale_requests_call_engine_once() {
        let store = Arc::new(InMemoryProfileStore::new());
        let llm = ScriptedLlm::slow(KIM_RESPONSE, Duration::from_millis(100));
        let orchestrator = Arc::new(orchestrator(store.clone(), llm.clone()));
        let id = seeded_kim(&store).await;
        age_analysis(&store, id, ChronoDuration::hours(2)).await;

        let first = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.get_analysis(id, false).await }
        });
        let second = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.get_analysis(id, false).await }
        });

        let first = first.await.expect("first task").expect("first result");
        let second = second.await.expect("second task").expect("second result");

        assert_eq!(llm.calls(), 1);
        assert_eq!(first.analyzed_at, second.analyzed_at);
        assert_eq!(first, second);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn facts_merged_during_refresh_are_kept() {
        let store = Arc::new(InMemoryProfileStore::new());
        let llm = ScriptedLlm::slow(KIM_RESPONSE, Duration::from_millis(100));
        let orchestrator = Arc::new(orchestrator(store.clone(), llm.clone()));
        let id = seeded_kim(&store).await;

        let refresh = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.get_analysis(id, false).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let report = orchestrator.merger().sync_all(&[kim_order("O2")]).await;
        assert!(report.failures.is_empty());

        refresh.await.expect("task").expect("analysis");
        let stored = store.load(id).await.expect("load").expect("exists");
        assert_eq!(stored.purchase_history.len(), 2);
        assert!(stored.analysis.is_some());
    }

    #[test]
    fn preview_truncates_long_output() {
        let long = "x".repeat(500);
        let shown = preview(&long);
        assert!(shown.ends_with("..."));
        assert_eq!(shown.chars().count(), 203);
        assert_eq!(preview("short"), "short");
    }

    /// Rejects the next `conflicts` saves as concurrent modifications.
    struct ConflictingSaves {
        inner: Arc<InMemoryProfileStore>,
        conflicts: AtomicUsize,
        saves: AtomicUsize,
    }

    impl ConflictingSaves {
        fn new(inner: Arc<InMemoryProfileStore>, conflicts: usize) -> Arc<Self> {
            Arc::new(Self {
                inner,
                conflicts: AtomicUsize::new(conflicts),
                saves: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ProfileStore for ConflictingSaves {
        async fn find_or_create(
            &self,
            name: &str,
            phone_number: &str,
        ) -> Result<CustomerProfile, RepositoryError> {
            self.inner.find_or_create(name, phone_number).await
        }

        async fn load(&self, id: CustomerId) -> Result<Option<CustomerProfile>, RepositoryError> {
            self.inner.load(id).await
        }

        async fn save(&self, profile: CustomerProfile) -> Result<(), RepositoryError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            let pending = self.conflicts.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            });
            if pending.is_ok() {
                return Err(RepositoryError::Conflict(profile.id));
            }
            self.inner.save(profile).await
        }

        async fn list_profiles(&self) -> Result<Vec<CustomerProfile>, RepositoryError> {
            self.inner.list_profiles().await
        }
    }

    fn orchestrator_over(store: Arc<ConflictingSaves>, llm: Arc<ScriptedLlm>) -> AnalysisOrchestrator {
        let engine = AnalysisEngineClient::new(llm, "Analyze.", Duration::from_secs(5));
        AnalysisOrchestrator::new(store, engine, AnalysisCache::default())
    }

    #[tokio::test]
    async fn analysis_save_conflict_is_retried_once() {
        let inner = Arc::new(InMemoryProfileStore::new());
        let id = seeded_kim(&inner).await;
        let store = ConflictingSaves::new(inner.clone(), 1);
        let llm = ScriptedLlm::new(KIM_RESPONSE);
        let orchestrator = orchestrator_over(store.clone(), llm.clone());

        let result = orchestrator.get_analysis(id, false).await.expect("analysis after retry");

        assert_eq!(result.content.customer_segments, "Food-focused");
        assert_eq!(store.saves.load(Ordering::SeqCst), 2);
        assert_eq!(llm.calls(), 1);
        let stored = inner.load(id).await.expect("load").expect("exists");
        assert_eq!(stored.analysis_result(), Some(result));
        assert_eq!(stored.purchase_history.len(), 1);
    }

    #[tokio::test]
    async fn second_analysis_save_conflict_is_surfaced() {
        let inner = Arc::new(InMemoryProfileStore::new());
        let id = seeded_kim(&inner).await;
        let store = ConflictingSaves::new(inner.clone(), 2);
        let orchestrator = orchestrator_over(store.clone(), ScriptedLlm::new(KIM_RESPONSE));

        let error = orchestrator.get_analysis(id, false).await.expect_err("conflict");

        assert!(matches!(error, AnalysisError::StoreConflict(conflicted) if conflicted == id));
        assert_eq!(store.saves.load(Ordering::SeqCst), 2);
        let stored = inner.load(id).await.expect("load").expect("exists");
        assert!(stored.analysis.is_none());
    }
}
