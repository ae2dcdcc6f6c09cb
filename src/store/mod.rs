//! Persistence abstraction for the engine.
//!
//! Shard workers append accepted events before folding them and write derived
//! state (metrics, history points, trend buckets) afterwards. The SQLite
//! [`Repository`](crate::db::Repository) is the production implementation;
//! [`MemoryStore`] backs tests.

use crate::domain::{
    AccountId, AccountProfile, Event, InfluenceHistoryPoint, InfluenceMetrics, TopicCategory,
    TrendKey,
};
use crate::engine::TrendBucket;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub mod memory;

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait EngineStore: Send + Sync + fmt::Debug {
    /// Append an accepted event. Returns false if it was already stored.
    async fn append_event(&self, event: &Event) -> Result<bool, StoreError>;

    /// Whether an event with the same (shard key, seq) is already in the log.
    async fn contains_event(&self, event: &Event) -> Result<bool, StoreError>;

    /// Every stored event in acceptance order.
    async fn load_events(&self) -> Result<Vec<Event>, StoreError>;

    async fn upsert_account(&self, profile: &AccountProfile) -> Result<(), StoreError>;

    /// Every stored alignment version, ascending by (account, version).
    async fn load_accounts(&self) -> Result<Vec<AccountProfile>, StoreError>;

    /// Write the latest metrics row for outside readers. The engine never reads
    /// it back; restart rebuilds metrics by replaying the event log.
    async fn save_metrics(&self, metrics: &InfluenceMetrics) -> Result<(), StoreError>;

    /// Append a history point; a point with the same timestamp is kept as is.
    async fn append_history(&self, point: &InfluenceHistoryPoint) -> Result<(), StoreError>;

    async fn load_history(
        &self,
        account_id: &AccountId,
    ) -> Result<Vec<InfluenceHistoryPoint>, StoreError>;

    /// Write the current totals of one trend bucket. Write-only, like `save_metrics`.
    async fn save_trend_bucket(
        &self,
        key: &TrendKey,
        category: TopicCategory,
        bucket: &TrendBucket,
    ) -> Result<(), StoreError>;
}
