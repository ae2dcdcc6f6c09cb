//! Shard workers: the single writer for every account and topic they own.
//!
//! Each worker is a tokio task draining an mpsc queue, so commands for one
//! shard are applied strictly in submission order. Workers publish immutable
//! snapshots (metrics, trends) that readers access without touching the queue.

use crate::broadcast::{Broadcaster, LiveUpdate};
use crate::config::EngineConfig;
use crate::domain::{
    normalize_tag, AccountId, AccountProfile, ContributingFactors, Event, EventPayload,
    InfluenceMetrics, ShardKey, TimeMs, Timeframe, Topic, TrendKey,
};
use crate::engine::{
    AccountState, Enrichment, FoldError, FoldOutcome, HistoryStore, LeaderboardRanker, RankInput,
    TopicContribution, TopicTrend,
};
use crate::orchestration::accounts::AccountDirectory;
use crate::orchestration::ingest::{FoldMode, IngestStats, Rejected};
use crate::store::EngineStore;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// State shared by all workers and read by queries.
pub(crate) struct SharedState {
    pub config: EngineConfig,
    pub store: Arc<dyn EngineStore>,
    pub accounts: AccountDirectory,
    pub snapshots: DashMap<AccountId, Arc<InfluenceMetrics>>,
    pub trends: DashMap<TrendKey, Arc<TopicTrend>>,
    pub ranker: LeaderboardRanker,
    pub history: HistoryStore,
    pub broadcaster: Arc<Broadcaster>,
    pub stats: IngestStats,
    clock: AtomicI64,
}

impl SharedState {
    pub fn new(config: EngineConfig, store: Arc<dyn EngineStore>) -> Self {
        let broadcaster = Broadcaster::new(config.broadcast.clone());
        Self {
            config,
            store,
            accounts: AccountDirectory::new(),
            snapshots: DashMap::new(),
            trends: DashMap::new(),
            ranker: LeaderboardRanker::new(),
            history: HistoryStore::new(),
            broadcaster,
            stats: IngestStats::default(),
            clock: AtomicI64::new(0),
        }
    }

    /// Engine evaluation time: the newest timestamp observed so far.
    pub fn now(&self) -> TimeMs {
        TimeMs::new(self.clock.load(Ordering::Acquire))
    }

    pub fn observe(&self, at: TimeMs) {
        self.clock.fetch_max(at.as_ms(), Ordering::AcqRel);
    }
}

/// What an account or topic shard hands back after ingesting an event.
#[derive(Debug, Default)]
pub(crate) struct IngestReport {
    pub topics: Vec<TopicContribution>,
    pub following_delta: Option<i64>,
}

pub(crate) enum ShardCommand {
    Ingest {
        event: Event,
        enrichment: Enrichment,
        mode: FoldMode,
        reply: oneshot::Sender<Result<IngestReport, Rejected>>,
    },
    ApplyTopics {
        contributions: Vec<TopicContribution>,
        mode: FoldMode,
        reply: oneshot::Sender<()>,
    },
    AdjustFollowing {
        account: AccountId,
        delta: i64,
        at: TimeMs,
        mode: FoldMode,
        reply: oneshot::Sender<()>,
    },
    Register {
        profile: Arc<AccountProfile>,
        mode: FoldMode,
        reply: oneshot::Sender<()>,
    },
    /// Re-evaluate accounts at `now`. Without `rerank` the caller rebuilds
    /// the leaderboards afterwards.
    Recompute {
        account: Option<AccountId>,
        now: TimeMs,
        rerank: bool,
        reply: oneshot::Sender<usize>,
    },
    /// Apply trend hysteresis and retention at `now`.
    Tick {
        now: TimeMs,
        reply: oneshot::Sender<usize>,
    },
}

pub(crate) fn spawn(
    index: usize,
    shared: Arc<SharedState>,
    queue_depth: usize,
) -> mpsc::Sender<ShardCommand> {
    let (tx, rx) = mpsc::channel(queue_depth.max(1));
    let worker = ShardWorker {
        index,
        shared,
        accounts: HashMap::new(),
        topics: HashMap::new(),
        watermarks: HashMap::new(),
    };
    tokio::spawn(worker.run(rx));
    tx
}

struct ShardWorker {
    index: usize,
    shared: Arc<SharedState>,
    accounts: HashMap<AccountId, AccountState>,
    topics: HashMap<TrendKey, TopicTrend>,
    /// Highest sequence number accepted per shard key.
    watermarks: HashMap<ShardKey, u64>,
}

impl ShardWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<ShardCommand>) {
        debug!(shard = self.index, "Shard worker started");
        while let Some(command) = rx.recv().await {
            match command {
                ShardCommand::Ingest {
                    event,
                    enrichment,
                    mode,
                    reply,
                } => {
                    let result = self.ingest(event, enrichment, mode).await;
                    let _ = reply.send(result);
                }
                ShardCommand::ApplyTopics {
                    contributions,
                    mode,
                    reply,
                } => {
                    for contribution in &contributions {
                        self.apply_topic(contribution, mode).await;
                    }
                    let _ = reply.send(());
                }
                ShardCommand::AdjustFollowing {
                    account,
                    delta,
                    at,
                    mode,
                    reply,
                } => {
                    self.adjust_following(&account, delta, at, mode).await;
                    let _ = reply.send(());
                }
                ShardCommand::Register {
                    profile,
                    mode,
                    reply,
                } => {
                    self.register(profile, mode).await;
                    let _ = reply.send(());
                }
                ShardCommand::Recompute {
                    account,
                    now,
                    rerank,
                    reply,
                } => {
                    let count = self.recompute(account.as_ref(), now, rerank).await;
                    let _ = reply.send(count);
                }
                ShardCommand::Tick { now, reply } => {
                    let _ = reply.send(self.tick(now));
                }
            }
        }
        debug!(shard = self.index, "Shard worker stopped");
    }

    async fn ingest(
        &mut self,
        event: Event,
        enrichment: Enrichment,
        mode: FoldMode,
    ) -> Result<IngestReport, Rejected> {
        let key = event.shard_key().ok_or_else(|| {
            Rejected::Validation("event subject does not map to a shard".to_string())
        })?;
        if let Some(last) = self
            .watermarks
            .get(&key)
            .copied()
            .filter(|last| event.seq <= *last)
        {
            return Err(self.stale_sequence(&event, &key, last, mode).await);
        }

        match &key {
            ShardKey::Account(id) => {
                let id = id.clone();
                self.ingest_account(&id, &key, event, enrichment, mode).await
            }
            ShardKey::Topic(topic) => {
                let topic = topic.clone();
                self.ingest_mention(topic, &key, event, enrichment, mode).await
            }
        }
    }

    async fn ingest_account(
        &mut self,
        id: &AccountId,
        key: &ShardKey,
        event: Event,
        enrichment: Enrichment,
        mode: FoldMode,
    ) -> Result<IngestReport, Rejected> {
        {
            let Some(state) = self.accounts.get(id) else {
                return Err(Rejected::unknown(key));
            };
            if let EventPayload::ReactionAdded { kind, .. } = &event.payload {
                if !kind.is_repost()
                    && state.has_active_reaction(&event.actor_id, &event.subject_id, *kind)
                {
                    return Err(Rejected::DuplicateReaction {
                        actor: event.actor_id.clone(),
                        post_id: event.subject_id.clone(),
                        kind: *kind,
                    });
                }
            }
        }

        if mode == FoldMode::Live {
            self.persist(&event, key).await?;
        }

        let outcome = {
            let state = self
                .accounts
                .get_mut(id)
                .ok_or_else(|| Rejected::unknown(key))?;
            state
                .fold(&event, &enrichment, &self.shared.config)
                .map_err(|err| match err {
                    FoldError::DuplicateReaction {
                        actor,
                        post_id,
                        kind,
                    } => Rejected::DuplicateReaction {
                        actor,
                        post_id,
                        kind,
                    },
                })?
        };
        self.watermarks.insert(key.clone(), event.seq);

        let FoldOutcome {
            metrics,
            factors,
            topics,
            following_delta,
            region,
            category,
        } = outcome;
        let metrics = self.publish_metrics(metrics, &factors, mode, true).await;
        if mode == FoldMode::Live {
            if let Some(update) = live_update(&event, &metrics) {
                self.shared.broadcaster.publish(
                    update,
                    event.timestamp,
                    region.as_deref(),
                    category,
                );
            }
        }

        Ok(IngestReport {
            topics,
            following_delta,
        })
    }

    async fn ingest_mention(
        &mut self,
        topic: Topic,
        key: &ShardKey,
        event: Event,
        enrichment: Enrichment,
        mode: FoldMode,
    ) -> Result<IngestReport, Rejected> {
        let EventPayload::TopicMentioned {
            region,
            language,
            category,
            sentiment,
            related_topics,
        } = &event.payload
        else {
            return Err(Rejected::Validation(
                "only topic mentions are keyed by topic".to_string(),
            ));
        };

        if mode == FoldMode::Live {
            self.persist(&event, key).await?;
        }
        self.watermarks.insert(key.clone(), event.seq);

        let mut related: Vec<Topic> = related_topics
            .iter()
            .filter_map(|t| Topic::normalize(t))
            .filter(|t| *t != topic)
            .collect();
        related.sort();
        related.dedup();

        let contribution = TopicContribution {
            key: TrendKey {
                topic,
                region: normalize_tag(region.as_deref()),
                language: normalize_tag(language.as_deref()),
            },
            at: event.timestamp,
            weight: 1.0,
            sentiment: *sentiment,
            controversy: event.controversy_hint.unwrap_or(0.0),
            bias: enrichment
                .actor
                .as_ref()
                .map_or(0.0, |p| p.alignment.bias()),
            category: *category,
            related,
        };
        self.apply_topic(&contribution, mode).await;
        Ok(IngestReport::default())
    }

    /// A sequence number at or below the watermark is a duplicate only if the
    /// log holds it; otherwise it arrived out of order.
    async fn stale_sequence(
        &self,
        event: &Event,
        key: &ShardKey,
        last: u64,
        mode: FoldMode,
    ) -> Rejected {
        let seen = if event.seq == last || mode == FoldMode::Replay {
            Ok(true)
        } else {
            self.shared.store.contains_event(event).await
        };
        match seen {
            Ok(true) => {
                debug!(shard = self.index, shard_key = %key, seq = event.seq, "Duplicate sequence number");
                Rejected::duplicate(key, event.seq)
            }
            Ok(false) => {
                debug!(shard = self.index, shard_key = %key, seq = event.seq, last, "Out-of-order sequence number");
                Rejected::Validation(format!(
                    "sequence {} for {} is below the last accepted sequence {}",
                    event.seq, key, last
                ))
            }
            Err(err) => {
                warn!(shard = self.index, shard_key = %key, seq = event.seq, error = %err, "Failed to look up event");
                Rejected::Storage(err)
            }
        }
    }

    async fn persist(&mut self, event: &Event, key: &ShardKey) -> Result<(), Rejected> {
        match self.shared.store.append_event(event).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.watermarks.insert(key.clone(), event.seq);
                Err(Rejected::duplicate(key, event.seq))
            }
            Err(err) => {
                warn!(shard = self.index, shard_key = %key, seq = event.seq, error = %err, "Failed to append event");
                Err(Rejected::Storage(err))
            }
        }
    }

    async fn apply_topic(&mut self, contribution: &TopicContribution, mode: FoldMode) {
        let shared = Arc::clone(&self.shared);
        let trend = self
            .topics
            .entry(contribution.key.clone())
            .or_insert_with(|| TopicTrend::new(contribution.key.clone(), contribution.at));
        let bucket = trend.add(contribution, &shared.config.trends);
        let snapshot = Arc::new(trend.clone());
        shared
            .trends
            .insert(contribution.key.clone(), Arc::clone(&snapshot));

        if mode == FoldMode::Replay {
            return;
        }
        if let Err(err) = shared
            .store
            .save_trend_bucket(&contribution.key, snapshot.category(), &bucket)
            .await
        {
            warn!(topic = %contribution.key.topic, error = %err, "Failed to save trend bucket");
        }
        let now = contribution.at.max(shared.now());
        let projected = snapshot.project(now, Timeframe::Hour.window_ms(), &shared.config.trends);
        let region = Some(contribution.key.region.as_str()).filter(|r| !r.is_empty());
        shared.broadcaster.publish(
            LiveUpdate::Trend { trend: projected },
            contribution.at,
            region,
            Some(snapshot.category()),
        );
    }

    async fn adjust_following(&mut self, id: &AccountId, delta: i64, at: TimeMs, mode: FoldMode) {
        let evaluated = self.accounts.get_mut(id).map(|state| {
            state.adjust_following(delta, at);
            state.evaluate(&self.shared.config)
        });
        if let Some((metrics, factors)) = evaluated {
            self.publish_metrics(metrics, &factors, mode, true).await;
        }
    }

    async fn register(&mut self, profile: Arc<AccountProfile>, mode: FoldMode) {
        let now = self.shared.now();
        let state = self
            .accounts
            .entry(profile.id.clone())
            .and_modify(|s| s.update_profile(Arc::clone(&profile)))
            .or_insert_with(|| {
                let mut state = AccountState::new(Arc::clone(&profile));
                state.advance_clock(now);
                state
            });
        let (metrics, factors) = state.evaluate(&self.shared.config);
        self.publish_metrics(metrics, &factors, mode, true).await;
    }

    async fn recompute(&mut self, account: Option<&AccountId>, now: TimeMs, rerank: bool) -> usize {
        let ids: Vec<AccountId> = match account {
            Some(id) if self.accounts.contains_key(id) => vec![id.clone()],
            Some(_) => Vec::new(),
            None => self.accounts.keys().cloned().collect(),
        };
        for id in &ids {
            let evaluated = self.accounts.get_mut(id).map(|state| {
                state.advance_clock(now);
                state.evaluate(&self.shared.config)
            });
            if let Some((metrics, factors)) = evaluated {
                self.publish_metrics(metrics, &factors, FoldMode::Live, rerank)
                    .await;
            }
        }
        ids.len()
    }

    fn tick(&mut self, now: TimeMs) -> usize {
        let config = &self.shared.config.trends;
        let horizon = now.minus(config.retention.as_millis() as i64);
        let mut deactivated = 0;
        let mut expired = Vec::new();
        for (key, trend) in self.topics.iter_mut() {
            if trend.tick(now, config) {
                deactivated += 1;
            }
            if trend.last_seen() < horizon {
                expired.push(key.clone());
            } else {
                self.shared.trends.insert(key.clone(), Arc::new(trend.clone()));
            }
        }
        for key in expired {
            self.topics.remove(&key);
            self.shared.trends.remove(&key);
        }
        deactivated
    }

    /// Swap in the new metrics snapshot and, for live input, persist it.
    async fn publish_metrics(
        &self,
        metrics: InfluenceMetrics,
        factors: &ContributingFactors,
        mode: FoldMode,
        rerank: bool,
    ) -> Arc<InfluenceMetrics> {
        let metrics = Arc::new(metrics);
        self.shared
            .snapshots
            .insert(metrics.account_id.clone(), Arc::clone(&metrics));
        if rerank {
            self.shared.ranker.upsert(RankInput::from(metrics.as_ref()));
        }
        if mode == FoldMode::Replay {
            return metrics;
        }

        let store = &self.shared.store;
        if let Err(err) = store.save_metrics(&metrics).await {
            warn!(account_id = %metrics.account_id, error = %err, "Failed to save metrics");
        }
        if let Some(point) =
            self.shared
                .history
                .maybe_record(&metrics, factors, &self.shared.config.history)
        {
            if let Err(err) = store.append_history(&point).await {
                warn!(account_id = %metrics.account_id, error = %err, "Failed to append history point");
            }
        }
        metrics
    }
}

fn live_update(event: &Event, metrics: &InfluenceMetrics) -> Option<LiveUpdate> {
    let reaction = |author_id: &AccountId, kind: &str| LiveUpdate::Reaction {
        post_id: event.subject_id.clone(),
        author_id: author_id.clone(),
        actor_id: event.actor_id.clone(),
        reaction: kind.to_string(),
        engagement_rate: metrics.engagement_rate,
        virality_score: metrics.virality_score,
        is_viral: metrics.is_viral,
    };
    match &event.payload {
        EventPayload::PostPublished { .. } => Some(LiveUpdate::Post {
            post_id: event.subject_id.clone(),
            author_id: event.actor_id.clone(),
            topics: event.topics().into_iter().map(|t| t.0).collect(),
            influence_score: metrics.influence_score,
            follower_count: metrics.follower_count,
        }),
        EventPayload::ReactionAdded {
            author_id, kind, ..
        } => Some(reaction(author_id, kind.as_str())),
        EventPayload::ReactionRemoved { author_id, .. } => Some(reaction(author_id, "removed")),
        EventPayload::CommentAdded { author_id, .. } => Some(reaction(author_id, "comment")),
        EventPayload::FollowChanged { .. } | EventPayload::TopicMentioned { .. } => None,
    }
}
