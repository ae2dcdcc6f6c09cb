//! Repository layer for database operations.
//!
//! Methods are organized across submodules by domain:
//! - `events.rs` - event log and account cache
//! - `metrics.rs` - current metrics, history points and trend buckets

mod events;
mod metrics;

use crate::domain::{
    AccountId, AccountProfile, Event, InfluenceHistoryPoint, InfluenceMetrics, TopicCategory,
    TrendKey,
};
use crate::engine::TrendBucket;
use crate::store::{EngineStore, StoreError};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;

/// SQLite-backed [`EngineStore`].
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl EngineStore for Repository {
    async fn append_event(&self, event: &Event) -> Result<bool, StoreError> {
        self.insert_event(event).await
    }

    async fn contains_event(&self, event: &Event) -> Result<bool, StoreError> {
        match event.event_key() {
            Some(key) => Ok(self.event_exists(&key).await?),
            None => Ok(false),
        }
    }

    async fn load_events(&self) -> Result<Vec<Event>, StoreError> {
        Ok(self.query_events().await?)
    }

    async fn upsert_account(&self, profile: &AccountProfile) -> Result<(), StoreError> {
        self.insert_account(profile).await
    }

    async fn load_accounts(&self) -> Result<Vec<AccountProfile>, StoreError> {
        Ok(self.query_accounts().await?)
    }

    async fn save_metrics(&self, metrics: &InfluenceMetrics) -> Result<(), StoreError> {
        self.upsert_metrics(metrics).await
    }

    async fn append_history(&self, point: &InfluenceHistoryPoint) -> Result<(), StoreError> {
        self.insert_history_point(point).await
    }

    async fn load_history(
        &self,
        account_id: &AccountId,
    ) -> Result<Vec<InfluenceHistoryPoint>, StoreError> {
        self.query_history(account_id).await
    }

    async fn save_trend_bucket(
        &self,
        key: &TrendKey,
        category: TopicCategory,
        bucket: &TrendBucket,
    ) -> Result<(), StoreError> {
        self.upsert_trend_bucket(key, category, bucket).await
    }
}
