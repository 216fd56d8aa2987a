use std::collections::HashMap;

use chrono::{DateTime, Utc};
use insight_core::domain::customer::{AnalysisContent, CachedAnalysis, CustomerId, CustomerProfile};
use insight_core::domain::purchase::{PurchaseHistory, PurchaseRecord};
use sqlx::{sqlite::SqliteRow, Row};

use super::{ProfileStore, RepositoryError};
use crate::DbPool;

const PROFILE_COLUMNS: &str = "id, name, phone_number, frequent_orders_json, \
     personalized_recommendations_json, personalized_recommendations_reason, \
     customer_segments, analyzed_at, version";

pub struct SqlProfileRepository {
    pool: DbPool,
}

impl SqlProfileRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_history(&self, id: CustomerId) -> Result<PurchaseHistory, RepositoryError> {
        let rows = sqlx::query(
            "SELECT order_ref, product_name, option_value
             FROM purchase_record
             WHERE profile_id = ?
             ORDER BY position ASC",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        let records = rows.iter().map(purchase_record_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(PurchaseHistory::from_records(records))
    }
}

#[async_trait::async_trait]
impl ProfileStore for SqlProfileRepository {
    async fn find_or_create(
        &self,
        name: &str,
        phone_number: &str,
    ) -> Result<CustomerProfile, RepositoryError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO customer_profile (name, phone_number, version, created_at, updated_at)
             VALUES (?, ?, 0, ?, ?)
             ON CONFLICT (name, phone_number) DO NOTHING",
        )
        .bind(name)
        .bind(phone_number)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM customer_profile WHERE name = ? AND phone_number = ?"
        ))
        .bind(name)
        .bind(phone_number)
        .fetch_one(&self.pool)
        .await?;

        let mut profile = profile_from_row(&row)?;
        profile.purchase_history = self.load_history(profile.id).await?;
        Ok(profile)
    }

    async fn load(&self, id: CustomerId) -> Result<Option<CustomerProfile>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {PROFILE_COLUMNS} FROM customer_profile WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut profile = profile_from_row(&row)?;
        profile.purchase_history = self.load_history(id).await?;
        Ok(Some(profile))
    }

    async fn save(&self, profile: CustomerProfile) -> Result<(), RepositoryError> {
        let (frequent_orders, recommendations, reason, segments, analyzed_at) =
            match &profile.analysis {
                Some(analysis) => (
                    Some(encode_list(&analysis.content.frequent_orders)?),
                    Some(encode_list(&analysis.content.personalized_recommendations)?),
                    Some(analysis.content.personalized_recommendations_reason.clone()),
                    Some(analysis.content.customer_segments.clone()),
                    Some(analysis.analyzed_at.to_rfc3339()),
                ),
                None => (None, None, None, None, None),
            };

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE customer_profile
             SET name = ?,
                 phone_number = ?,
                 frequent_orders_json = ?,
                 personalized_recommendations_json = ?,
                 personalized_recommendations_reason = ?,
                 customer_segments = ?,
                 analyzed_at = ?,
                 version = version + 1,
                 updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(&profile.name)
        .bind(&profile.phone_number)
        .bind(frequent_orders)
        .bind(recommendations)
        .bind(reason)
        .bind(segments)
        .bind(analyzed_at)
        .bind(Utc::now().to_rfc3339())
        .bind(profile.id.0)
        .bind(profile.version)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let exists: i64 =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM customer_profile WHERE id = ?)")
                    .bind(profile.id.0)
                    .fetch_one(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Err(if exists == 1 {
                RepositoryError::Conflict(profile.id)
            } else {
                RepositoryError::MissingProfile(profile.id)
            });
        }

        for record in profile.purchase_history.iter() {
            sqlx::query(
                "INSERT INTO purchase_record
                    (profile_id, position, order_ref, product_name, option_value)
                 VALUES (
                    ?1,
                    (SELECT COALESCE(MAX(position) + 1, 0) FROM purchase_record WHERE profile_id = ?1),
                    ?2, ?3, ?4
                 )
                 ON CONFLICT (profile_id, order_ref, product_name, option_value) DO NOTHING",
            )
            .bind(profile.id.0)
            .bind(&record.order_ref)
            .bind(&record.product_name)
            .bind(&record.option_value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_profiles(&self) -> Result<Vec<CustomerProfile>, RepositoryError> {
        let rows = sqlx::query(&format!("SELECT {PROFILE_COLUMNS} FROM customer_profile ORDER BY id ASC"))
            .fetch_all(&self.pool)
            .await?;

        let record_rows = sqlx::query(
            "SELECT profile_id, order_ref, product_name, option_value
             FROM purchase_record
             ORDER BY profile_id ASC, position ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut histories: HashMap<i64, Vec<PurchaseRecord>> = HashMap::new();
        for row in &record_rows {
            let profile_id: i64 = row
                .try_get("profile_id")
                .map_err(|e| RepositoryError::Decode(e.to_string()))?;
            histories.entry(profile_id).or_default().push(purchase_record_from_row(row)?);
        }

        rows.iter()
            .map(|row| {
                let mut profile = profile_from_row(row)?;
                if let Some(records) = histories.remove(&profile.id.0) {
                    profile.purchase_history = PurchaseHistory::from_records(records);
                }
                Ok(profile)
            })
            .collect()
    }
}

fn profile_from_row(row: &SqliteRow) -> Result<CustomerProfile, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());

    let id = CustomerId(row.try_get("id").map_err(decode)?);
    let analyzed_at: Option<String> = row.try_get("analyzed_at").map_err(decode)?;

    let analysis = match analyzed_at {
        Some(analyzed_at) => {
            let frequent_orders: Option<String> =
                row.try_get("frequent_orders_json").map_err(decode)?;
            let recommendations: Option<String> =
                row.try_get("personalized_recommendations_json").map_err(decode)?;
            let reason: Option<String> =
                row.try_get("personalized_recommendations_reason").map_err(decode)?;
            let segments: Option<String> = row.try_get("customer_segments").map_err(decode)?;

            Some(CachedAnalysis::new(
                AnalysisContent {
                    frequent_orders: decode_list("frequent_orders_json", frequent_orders)?,
                    personalized_recommendations: decode_list(
                        "personalized_recommendations_json",
                        recommendations,
                    )?,
                    personalized_recommendations_reason: reason.unwrap_or_default(),
                    customer_segments: segments.unwrap_or_default(),
                },
                parse_timestamp("analyzed_at", analyzed_at)?,
            ))
        }
        None => None,
    };

    Ok(CustomerProfile {
        id,
        name: row.try_get("name").map_err(decode)?,
        phone_number: row.try_get("phone_number").map_err(decode)?,
        purchase_history: PurchaseHistory::new(),
        analysis,
        version: row.try_get("version").map_err(decode)?,
    })
}

fn purchase_record_from_row(row: &SqliteRow) -> Result<PurchaseRecord, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());
    Ok(PurchaseRecord {
        order_ref: row.try_get("order_ref").map_err(decode)?,
        product_name: row.try_get("product_name").map_err(decode)?,
        option_value: row.try_get("option_value").map_err(decode)?,
    })
}

fn encode_list(values: &[String]) -> Result<String, RepositoryError> {
    serde_json::to_string(values)
        .map_err(|e| RepositoryError::Decode(format!("failed to encode list column: {e}")))
}

fn decode_list(column: &str, value: Option<String>) -> Result<Vec<String>, RepositoryError> {
    match value {
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| RepositoryError::Decode(format!("invalid JSON list in `{column}`: {e}"))),
        None => Ok(Vec::new()),
    }
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("invalid timestamp in `{column}`: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use insight_core::domain::customer::{AnalysisContent, CachedAnalysis, CustomerId};
    use insight_core::domain::purchase::PurchaseRecord;

    use super::SqlProfileRepository;
    use crate::repositories::{ProfileStore, RepositoryError};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    #[tokio::test]
    async fn find_or_create_is_stable_per_name_and_phone() {
        let pool = setup().await;
        let repo = SqlProfileRepository::new(pool.clone());

        let first = repo.find_or_create("Kim", "010-1234").await.expect("create");
        let second = repo.find_or_create("Kim", "010-1234").await.expect("find");
        let other = repo.find_or_create("Kim", "010-9999").await.expect("create other");

        assert_eq!(first.id, second.id);
        assert_ne!(first.id, other.id);
        assert!(first.purchase_history.is_empty());
        assert!(first.analysis.is_none());
        assert_eq!(first.version, 0);

        pool.close().await;
    }

    #[tokio::test]
    async fn save_round_trips_history_order_and_analysis() {
        let pool = setup().await;
        let repo = SqlProfileRepository::new(pool.clone());

        let mut profile = repo.find_or_create("Lee", "011").await.expect("create");
        profile.absorb(&[
            PurchaseRecord::new("O2", "Earbuds", "Black"),
            PurchaseRecord::new("O1", "Cable", "2m"),
        ]);
        let analyzed_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("timestamp");
        profile.replace_analysis(CachedAnalysis::new(
            AnalysisContent {
                frequent_orders: vec!["Earbuds".to_string()],
                personalized_recommendations: vec!["Case".to_string(), "Charger".to_string()],
                personalized_recommendations_reason: "Accessories".to_string(),
                customer_segments: "Gadget fan".to_string(),
            },
            analyzed_at,
        ));
        repo.save(profile.clone()).await.expect("save");

        let stored = repo.load(profile.id).await.expect("load").expect("profile exists");
        assert_eq!(stored.version, 1);
        assert_eq!(stored.purchase_history, profile.purchase_history);
        let order: Vec<&str> =
            stored.purchase_history.iter().map(|record| record.order_ref.as_str()).collect();
        assert_eq!(order, vec!["O2", "O1"]);
        assert_eq!(stored.analysis, profile.analysis);

        pool.close().await;
    }

    #[tokio::test]
    async fn stale_version_is_rejected_as_conflict() {
        let pool = setup().await;
        let repo = SqlProfileRepository::new(pool.clone());

        let profile = repo.find_or_create("Park", "012").await.expect("create");
        let stale = profile.clone();

        let mut fresh = profile;
        fresh.absorb(&[PurchaseRecord::new("O1", "Hand Cream", "Lavender")]);
        repo.save(fresh).await.expect("first save");

        let error = repo.save(stale.clone()).await.expect_err("stale save must fail");
        assert!(matches!(error, RepositoryError::Conflict(id) if id == stale.id));

        let stored = repo.load(stale.id).await.expect("load").expect("profile exists");
        assert_eq!(stored.purchase_history.len(), 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn saving_unknown_profile_reports_missing() {
        let pool = setup().await;
        let repo = SqlProfileRepository::new(pool.clone());

        let ghost = insight_core::domain::customer::CustomerProfile::new(CustomerId(404), "Ghost", "000");
        let error = repo.save(ghost).await.expect_err("unknown profile");
        assert!(matches!(error, RepositoryError::MissingProfile(CustomerId(404))));

        pool.close().await;
    }

    #[tokio::test]
    async fn load_unknown_id_returns_none() {
        let pool = setup().await;
        let repo = SqlProfileRepository::new(pool.clone());

        assert!(repo.load(CustomerId(77)).await.expect("load").is_none());

        pool.close().await;
    }

    #[tokio::test]
    async fn list_profiles_attaches_each_history() {
        let pool = setup().await;
        let repo = SqlProfileRepository::new(pool.clone());

        let mut kim = repo.find_or_create("Kim", "010").await.expect("kim");
        kim.absorb(&[
            PurchaseRecord::new("O1", "Milk", "Zero-sugar"),
            PurchaseRecord::new("O2", "Milk", "Zero-sugar"),
        ]);
        repo.save(kim).await.expect("save kim");
        repo.find_or_create("Lee", "011").await.expect("lee");

        let profiles = repo.list_profiles().await.expect("list");
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].name, "Kim");
        assert_eq!(profiles[0].purchase_history.len(), 2);
        assert_eq!(profiles[1].name, "Lee");
        assert!(profiles[1].purchase_history.is_empty());

        pool.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_find_or_create_yields_one_profile() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("profiles.db").display());
        let pool = connect_with_settings(&url, 5, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        let repo = Arc::new(SqlProfileRepository::new(pool.clone()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let repo = Arc::clone(&repo);
            handles.push(tokio::spawn(async move { repo.find_or_create("Kim", "010").await }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            let profile = handle.await.expect("task").expect("find_or_create");
            ids.insert(profile.id);
        }
        assert_eq!(ids.len(), 1);

        let rows: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM customer_profile WHERE name = 'Kim' AND phone_number = '010'",
        )
        .fetch_one(&pool)
        .await
        .expect("count");
        assert_eq!(rows, 1);

        pool.close().await;
    }
}
