use crate::broadcast::{BroadcastStats, LiveUpdate, NewsItem, Subscription, SubscriptionFilter};
use crate::config::EngineConfig;
use crate::domain::{
    normalize_tag, AccountId, AccountProfile, Category, Event, EventPayload, Granularity,
    InfluenceHistoryPoint, InfluenceMetrics, LeaderboardEntry, PersonaType, PoliticalAlignment,
    ShardKey, TimeMs, Timeframe, TopicCategory, Trend, TrendDirection, TrendSort,
};
use crate::engine::{
    classify, regression_slope, sort_trends, window_within_retention, Enrichment, RankInput,
    TopicContribution,
};
use crate::orchestration::ingest::{Accepted, FoldMode, IngestStatsSnapshot, Rejected};
use crate::orchestration::shard::{self, ShardCommand, SharedState};
use crate::store::{EngineStore, StoreError};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Commands buffered per shard before submitters wait.
const SHARD_QUEUE_DEPTH: usize = 1024;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("shard worker unavailable")]
    Unavailable,
}

/// Identity and alignment pushed by the account service.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRegistration {
    pub persona_type: PersonaType,
    pub alignment: PoliticalAlignment,
    #[serde(default)]
    pub effective_at: Option<TimeMs>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryReport {
    pub account_id: AccountId,
    pub timeframe: Timeframe,
    pub granularity: Granularity,
    pub points: Vec<InfluenceHistoryPoint>,
    pub trend: TrendDirection,
    /// Least-squares slope of the score, in points per day.
    pub slope_per_day: f64,
}

#[derive(Debug, Clone)]
pub struct TrendQuery {
    pub region: Option<String>,
    pub category: Option<TopicCategory>,
    pub timeframe: Timeframe,
    pub sort: TrendSort,
    pub limit: usize,
    pub include_inactive: bool,
}

impl Default for TrendQuery {
    fn default() -> Self {
        Self {
            region: None,
            category: None,
            timeframe: Timeframe::Hour,
            sort: TrendSort::Score,
            limit: 20,
            include_inactive: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeReport {
    pub accounts: usize,
    pub full: bool,
    pub evaluated_at: TimeMs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapReport {
    pub accounts: usize,
    pub history_points: usize,
    pub events_replayed: usize,
    pub events_skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub now: TimeMs,
    pub shards: usize,
    pub accounts: usize,
    pub trends: usize,
    pub ingest: IngestStatsSnapshot,
    pub broadcast: BroadcastStats,
}

/// Command queues of the running shard workers.
#[derive(Clone)]
struct ShardSet {
    senders: Arc<[mpsc::Sender<ShardCommand>]>,
}

impl ShardSet {
    fn len(&self) -> usize {
        self.senders.len()
    }

    fn index_for(&self, key: &ShardKey) -> usize {
        key.shard_index(self.senders.len())
    }

    fn is_ready(&self) -> bool {
        self.senders.iter().all(|tx| !tx.is_closed())
    }

    /// Send a command and wait for its reply. None if the worker is gone.
    async fn request<T>(
        &self,
        index: usize,
        command: impl FnOnce(oneshot::Sender<T>) -> ShardCommand,
    ) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.senders.get(index)?.send(command(tx)).await.ok()?;
        rx.await.ok()
    }
}

/// Routes events to shard workers and serves reads from their snapshots.
pub struct Engine {
    shared: Arc<SharedState>,
    shards: ShardSet,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("shards", &self.shards.len())
            .field("store", &self.shared.store)
            .finish()
    }
}

impl Engine {
    /// Spawn the shard workers. Must be called inside a tokio runtime.
    pub fn start(config: EngineConfig, store: Arc<dyn EngineStore>) -> Arc<Self> {
        let shard_count = config.shard_count();
        let shared = Arc::new(SharedState::new(config, store));
        let senders = (0..shard_count)
            .map(|index| shard::spawn(index, Arc::clone(&shared), SHARD_QUEUE_DEPTH))
            .collect();
        info!(shards = shard_count, "Engine started");
        Arc::new(Self {
            shared,
            shards: ShardSet { senders },
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Current evaluation time.
    pub fn now(&self) -> TimeMs {
        self.shared.now()
    }

    /// Move evaluation time forward; never moves it back.
    pub fn advance_clock(&self, at: TimeMs) {
        self.shared.observe(at);
    }

    /// True while every shard worker is running.
    pub fn is_ready(&self) -> bool {
        self.shards.is_ready()
    }

    /// Restore cached accounts and history, then replay the event log.
    pub async fn bootstrap(&self) -> Result<BootstrapReport, EngineError> {
        let store = &self.shared.store;
        for profile in store.load_accounts().await? {
            self.shared.accounts.insert(profile);
        }
        let ids = self.shared.accounts.ids();
        for id in &ids {
            if let Some(profile) = self.shared.accounts.latest(id) {
                let index = self.shards.index_for(&ShardKey::Account(id.clone()));
                self.shards
                    .request(index, |reply| ShardCommand::Register {
                        profile,
                        mode: FoldMode::Replay,
                        reply,
                    })
                    .await
                    .ok_or(EngineError::Unavailable)?;
            }
        }

        let mut history_points = 0;
        for id in &ids {
            for point in store.load_history(id).await? {
                self.shared.history.restore(point);
                history_points += 1;
            }
        }

        let mut replayed = 0;
        let mut skipped = 0;
        for event in store.load_events().await? {
            let seq = event.seq;
            match self.dispatch(event, FoldMode::Replay).await {
                Ok(_) => {
                    self.shared.stats.record_accepted(FoldMode::Replay);
                    replayed += 1;
                }
                Err(err) => {
                    warn!(seq, error = %err, "Skipping stored event during replay");
                    skipped += 1;
                }
            }
        }
        self.rebuild_rankings();

        let report = BootstrapReport {
            accounts: ids.len(),
            history_points,
            events_replayed: replayed,
            events_skipped: skipped,
        };
        info!(
            accounts = report.accounts,
            history_points,
            events_replayed = replayed,
            events_skipped = skipped,
            "Engine state restored"
        );
        Ok(report)
    }

    /// Append a new alignment version and (re)register the account with its shard.
    pub async fn register_account(
        &self,
        id: AccountId,
        registration: AccountRegistration,
    ) -> Result<Arc<AccountProfile>, EngineError> {
        registration
            .alignment
            .validate()
            .map_err(EngineError::Validation)?;
        let profile = self.shared.accounts.next_version(
            &id,
            registration.persona_type,
            registration.alignment,
            registration.effective_at,
            self.now(),
        );
        self.shared.store.upsert_account(&profile).await?;
        let profile = self.shared.accounts.insert(profile);

        let index = self.shards.index_for(&ShardKey::Account(id));
        let registered = Arc::clone(&profile);
        self.shards
            .request(index, |reply| ShardCommand::Register {
                profile: registered,
                mode: FoldMode::Live,
                reply,
            })
            .await
            .ok_or(EngineError::Unavailable)?;

        info!(
            account_id = %profile.id,
            version = profile.alignment_version,
            persona = %profile.persona_type,
            "Account registered"
        );
        Ok(profile)
    }

    /// Submit one event. Returns once the owning shard has folded it.
    pub async fn submit(&self, event: Event) -> Result<Accepted, Rejected> {
        let seq = event.seq;
        let result = self.dispatch(event, FoldMode::Live).await;
        match &result {
            Ok(accepted) => {
                self.shared.stats.record_accepted(FoldMode::Live);
                debug!(shard_key = %accepted.shard_key, seq, "Event accepted");
            }
            Err(rejected) => {
                self.shared.stats.record_rejected(rejected);
                if let Rejected::Duplicate { shard_key, .. } = rejected {
                    debug!(shard_key = %shard_key, seq, "Duplicate event ignored");
                }
            }
        }
        result
    }

    async fn dispatch(&self, event: Event, mode: FoldMode) -> Result<Accepted, Rejected> {
        event.validate().map_err(Rejected::Validation)?;
        let key = event.shard_key().ok_or_else(|| {
            Rejected::Validation("event subject does not map to a shard".to_string())
        })?;
        if let ShardKey::Account(id) = &key {
            if !self.shared.accounts.contains(id) {
                return Err(Rejected::unknown(&key));
            }
        }

        let enrichment = self.enrich(&event, &key);
        let shared = Arc::clone(&self.shared);
        let shards = self.shards.clone();
        // Topic and following updates finish even if the submitter goes away.
        tokio::spawn(async move { fan_out(&shared, &shards, key, event, enrichment, mode).await })
            .await
            .map_err(|err| {
                warn!(error = %err, "Ingest task failed");
                Rejected::Unavailable
            })?
    }

    /// Resolve both alignments at the event time and the actor's follower count.
    fn enrich(&self, event: &Event, key: &ShardKey) -> Enrichment {
        let accounts = &self.shared.accounts;
        let actor = accounts.profile_at(&event.actor_id, event.timestamp);
        let subject = match key {
            ShardKey::Account(id) => accounts.profile_at(id, event.timestamp),
            ShardKey::Topic(_) => None,
        };
        let mut warnings = Vec::new();
        let alignment_matters = matches!(
            event.payload,
            EventPayload::ReactionAdded { .. } | EventPayload::CommentAdded { .. }
        );
        if actor.is_none() && alignment_matters {
            warnings.push(format!(
                "alignment of {} unknown at {}, treated as neutral",
                event.actor_id, event.timestamp
            ));
        }
        let actor_followers = self
            .shared
            .snapshots
            .get(&event.actor_id)
            .map_or(0, |m| m.follower_count);
        Enrichment {
            actor,
            subject,
            actor_followers,
            warnings,
        }
    }

    /// Current metrics with ranks from the day leaderboards.
    pub fn metrics(&self, id: &AccountId) -> Option<InfluenceMetrics> {
        let snapshot = self.shared.snapshots.get(id).map(|m| Arc::clone(m.value()))?;
        let mut metrics = snapshot.as_ref().clone();
        let ranker = &self.shared.ranker;
        metrics.influence_rank = ranker.rank_of(id, Timeframe::Day, Category::All);
        metrics.category_rank =
            ranker.rank_of(id, Timeframe::Day, Category::Persona(metrics.persona_type));
        Some(metrics)
    }

    /// History over the timeframe ending now. Unknown accounts get an empty series.
    pub fn history(
        &self,
        id: &AccountId,
        timeframe: Timeframe,
        granularity: Granularity,
    ) -> HistoryReport {
        let points = self
            .shared
            .history
            .query(id, self.now(), timeframe.window_ms(), granularity);
        let tolerance = self.shared.config.history.stability_tolerance;
        HistoryReport {
            account_id: id.clone(),
            timeframe,
            granularity,
            trend: classify(&points, tolerance),
            slope_per_day: regression_slope(&points),
            points,
        }
    }

    pub fn leaderboard(
        &self,
        timeframe: Timeframe,
        category: Category,
        limit: usize,
        offset: usize,
    ) -> Vec<LeaderboardEntry> {
        self.shared.ranker.page(timeframe, category, limit, offset)
    }

    pub fn trends(&self, query: &TrendQuery) -> Result<Vec<Trend>, EngineError> {
        let config = &self.shared.config.trends;
        let window = query.timeframe.window_ms();
        if !window_within_retention(window, config) {
            return Err(EngineError::Validation(format!(
                "timeframe {} exceeds trend retention",
                query.timeframe.as_str()
            )));
        }
        let region = query
            .region
            .as_deref()
            .map(|r| normalize_tag(Some(r)))
            .filter(|r| !r.is_empty());
        let now = self.now();

        let snapshots: Vec<_> = self
            .shared
            .trends
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut trends: Vec<Trend> = snapshots
            .iter()
            .filter(|t| region.as_ref().map_or(true, |r| &t.key().region == r))
            .filter(|t| query.category.map_or(true, |c| t.category() == c))
            .map(|t| t.project(now, window, config))
            .filter(|t| t.volume > 0.0)
            .filter(|t| query.include_inactive || t.is_active)
            .collect();
        sort_trends(&mut trends, query.sort);
        trends.truncate(query.limit);
        Ok(trends)
    }

    /// Re-evaluate one account, or every account followed by an atomic
    /// leaderboard rebuild. Repeating it at the same clock changes nothing.
    pub async fn recompute(
        &self,
        account: Option<&AccountId>,
    ) -> Result<RecomputeReport, EngineError> {
        let now = self.now();
        let report = match account {
            Some(id) => {
                if !self.shared.accounts.contains(id) {
                    return Err(EngineError::NotFound(format!("account {}", id)));
                }
                let index = self.shards.index_for(&ShardKey::Account(id.clone()));
                let accounts = self
                    .shards
                    .request(index, |reply| ShardCommand::Recompute {
                        account: Some(id.clone()),
                        now,
                        rerank: true,
                        reply,
                    })
                    .await
                    .ok_or(EngineError::Unavailable)?;
                RecomputeReport {
                    accounts,
                    full: false,
                    evaluated_at: now,
                }
            }
            None => {
                let replies = join_all((0..self.shards.len()).map(|index| {
                    self.shards.request(index, move |reply| ShardCommand::Recompute {
                        account: None,
                        now,
                        rerank: false,
                        reply,
                    })
                }))
                .await;
                let mut accounts = 0;
                for reply in replies {
                    accounts += reply.ok_or(EngineError::Unavailable)?;
                }
                self.rebuild_rankings();
                RecomputeReport {
                    accounts,
                    full: true,
                    evaluated_at: now,
                }
            }
        };
        info!(
            accounts = report.accounts,
            full = report.full,
            at = %now,
            "Recompute finished"
        );
        Ok(report)
    }

    /// Apply trend hysteresis and retention at the current clock.
    pub async fn tick(&self) -> Result<usize, EngineError> {
        let now = self.now();
        let replies = join_all(
            (0..self.shards.len())
                .map(|index| self.shards.request(index, move |reply| ShardCommand::Tick { now, reply })),
        )
        .await;
        let mut deactivated = 0;
        for reply in replies {
            deactivated += reply.ok_or(EngineError::Unavailable)?;
        }
        if deactivated > 0 {
            debug!(deactivated, at = %now, "Trends went inactive");
        }
        Ok(deactivated)
    }

    /// Publish a news fact to live subscribers.
    pub fn publish_news(&self, news: NewsItem) -> Result<u64, EngineError> {
        if news.id.trim().is_empty() || news.headline.trim().is_empty() {
            return Err(EngineError::Validation(
                "news id and headline are required".to_string(),
            ));
        }
        let timestamp = news.published_at.unwrap_or_else(TimeMs::now);
        let region = news.region.clone();
        let category = news.category;
        let seq = self.shared.broadcaster.publish(
            LiveUpdate::News { news },
            timestamp,
            region.as_deref(),
            category,
        );
        Ok(seq)
    }

    pub fn subscribe(&self, filter: SubscriptionFilter, last_seq: Option<u64>) -> Subscription {
        self.shared.broadcaster.connect(filter, last_seq)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            now: self.now(),
            shards: self.shards.len(),
            accounts: self.shared.accounts.len(),
            trends: self.shared.trends.len(),
            ingest: self.shared.stats.snapshot(),
            broadcast: self.shared.broadcaster.stats(),
        }
    }

    fn rebuild_rankings(&self) {
        let since = self.shared.ranker.generation();
        let inputs: Vec<RankInput> = self
            .shared
            .snapshots
            .iter()
            .map(|entry| RankInput::from(entry.value().as_ref()))
            .collect();
        self.shared.ranker.rebuild(inputs, since);
    }
}

/// Ingest on the owning shard, then hand topic contributions and any
/// following change to the shards that own them.
async fn fan_out(
    shared: &SharedState,
    shards: &ShardSet,
    key: ShardKey,
    event: Event,
    enrichment: Enrichment,
    mode: FoldMode,
) -> Result<Accepted, Rejected> {
    let seq = event.seq;
    let at = event.timestamp;
    let actor = event.actor_id.clone();
    let report = shards
        .request(shards.index_for(&key), |reply| ShardCommand::Ingest {
            event,
            enrichment,
            mode,
            reply,
        })
        .await
        .ok_or(Rejected::Unavailable)??;
    shared.observe(at);

    let topics = route_topics(shards, report.topics, mode).await?;
    if let Some(delta) = report.following_delta {
        if shared.accounts.contains(&actor) {
            let index = shards.index_for(&ShardKey::Account(actor.clone()));
            shards
                .request(index, |reply| ShardCommand::AdjustFollowing {
                    account: actor,
                    delta,
                    at,
                    mode,
                    reply,
                })
                .await
                .ok_or(Rejected::Unavailable)?;
        }
    }

    Ok(Accepted {
        shard_key: key.as_key(),
        seq,
        topics,
    })
}

/// Group contributions by owning shard and send one batch per shard.
async fn route_topics(
    shards: &ShardSet,
    contributions: Vec<TopicContribution>,
    mode: FoldMode,
) -> Result<usize, Rejected> {
    let mut by_shard: BTreeMap<usize, Vec<TopicContribution>> = BTreeMap::new();
    for contribution in contributions {
        let index = shards.index_for(&ShardKey::Topic(contribution.key.topic.clone()));
        by_shard.entry(index).or_default().push(contribution);
    }
    let mut routed = 0;
    for (index, contributions) in by_shard {
        routed += contributions.len();
        shards
            .request(index, |reply| ShardCommand::ApplyTopics {
                contributions,
                mode,
                reply,
            })
            .await
            .ok_or(Rejected::Unavailable)?;
    }
    Ok(routed)
}
