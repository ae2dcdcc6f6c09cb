//! In-memory store for tests and ephemeral runs.

use super::{EngineStore, StoreError};
use crate::domain::{
    AccountId, AccountProfile, Event, InfluenceHistoryPoint, InfluenceMetrics, TimeMs,
    TopicCategory, TrendKey,
};
use crate::engine::TrendBucket;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Default)]
struct Inner {
    events: Vec<Event>,
    event_keys: HashSet<String>,
    accounts: BTreeMap<(AccountId, u32), AccountProfile>,
    metrics: HashMap<AccountId, InfluenceMetrics>,
    history: BTreeMap<(AccountId, TimeMs), InfluenceHistoryPoint>,
    buckets: BTreeMap<(TrendKey, TimeMs), (TopicCategory, TrendBucket)>,
    fail_writes: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the event log, as if the events had been accepted earlier.
    pub fn with_events(self, events: Vec<Event>) -> Self {
        {
            let mut inner = self.inner.lock();
            for event in events {
                if let Some(key) = event.event_key() {
                    if inner.event_keys.insert(key) {
                        inner.events.push(event);
                    }
                }
            }
        }
        self
    }

    pub fn with_account(self, profile: AccountProfile) -> Self {
        self.inner
            .lock()
            .accounts
            .insert((profile.id.clone(), profile.alignment_version), profile);
        self
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }

    pub fn event_count(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn saved_metrics(&self, account_id: &AccountId) -> Option<InfluenceMetrics> {
        self.inner.lock().metrics.get(account_id).cloned()
    }

    pub fn history_count(&self) -> usize {
        self.inner.lock().history.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.inner.lock().buckets.len()
    }

    fn check_writable(inner: &Inner) -> Result<(), StoreError> {
        if inner.fail_writes {
            return Err(StoreError::Corrupt("store is read-only".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EngineStore for MemoryStore {
    async fn append_event(&self, event: &Event) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        Self::check_writable(&inner)?;
        let key = event
            .event_key()
            .ok_or_else(|| StoreError::Corrupt("event has no shard key".to_string()))?;
        if !inner.event_keys.insert(key) {
            return Ok(false);
        }
        inner.events.push(event.clone());
        Ok(true)
    }

    async fn contains_event(&self, event: &Event) -> Result<bool, StoreError> {
        Ok(event
            .event_key()
            .is_some_and(|key| self.inner.lock().event_keys.contains(&key)))
    }

    async fn load_events(&self) -> Result<Vec<Event>, StoreError> {
        Ok(self.inner.lock().events.clone())
    }

    async fn upsert_account(&self, profile: &AccountProfile) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        Self::check_writable(&inner)?;
        inner
            .accounts
            .insert((profile.id.clone(), profile.alignment_version), profile.clone());
        Ok(())
    }

    async fn load_accounts(&self) -> Result<Vec<AccountProfile>, StoreError> {
        Ok(self.inner.lock().accounts.values().cloned().collect())
    }

    async fn save_metrics(&self, metrics: &InfluenceMetrics) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        Self::check_writable(&inner)?;
        inner
            .metrics
            .insert(metrics.account_id.clone(), metrics.clone());
        Ok(())
    }

    async fn append_history(&self, point: &InfluenceHistoryPoint) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        Self::check_writable(&inner)?;
        inner
            .history
            .entry((point.account_id.clone(), point.timestamp))
            .or_insert_with(|| point.clone());
        Ok(())
    }

    async fn load_history(
        &self,
        account_id: &AccountId,
    ) -> Result<Vec<InfluenceHistoryPoint>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .history
            .range((account_id.clone(), TimeMs::new(i64::MIN))..=(account_id.clone(), TimeMs::new(i64::MAX)))
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn save_trend_bucket(
        &self,
        key: &TrendKey,
        category: TopicCategory,
        bucket: &TrendBucket,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        Self::check_writable(&inner)?;
        inner
            .buckets
            .insert((key.clone(), bucket.start), (category, bucket.clone()));
        Ok(())
    }
}
