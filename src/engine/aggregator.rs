//! Per-account rolling state and the fold from events to metrics.
//!
//! An [`AccountState`] is owned by exactly one shard worker. Contributions keep
//! their original timestamps; decay and window membership are resolved when
//! metrics are evaluated, so folding is O(1) and evaluation is O(window).

use crate::config::EngineConfig;
use crate::domain::{
    sentiment_polarity, AccountId, AccountProfile, AlignmentInfluence, ContributingFactors, Event,
    EventPayload, FollowerInfluence, Growth, InfluenceMetrics, normalize_tag, Polarity,
    PoliticalAlignment, ReactionKind, TimeMs, Timeframe, Topic, TopicCategory, Totals, TrendKey, MS_PER_HOUR,
};
use crate::engine::decay::HalfLife;
use crate::engine::scoring::{self, EngagementCounts, InfluenceInputs, SpreadStats};
use crate::engine::trend::TopicContribution;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;

/// Stale-data annotations kept per account.
const MAX_WARNINGS: usize = 10;

/// Hourly weighted engagement at which the account trending score reaches ~63%.
const TRENDING_SCALE: f64 = 10.0;

/// Context resolved by ingest before the event reaches the shard.
#[derive(Debug, Clone, Default)]
pub struct Enrichment {
    /// Actor's alignment version effective at the event timestamp.
    pub actor: Option<Arc<AccountProfile>>,
    /// The owning account's alignment version effective at the event
    /// timestamp. Falls back to the cached profile when absent.
    pub subject: Option<Arc<AccountProfile>>,
    /// Actor's follower count, read from the latest published snapshot.
    pub actor_followers: u64,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FoldError {
    #[error("{actor} already left a {kind:?} on post {post_id}")]
    DuplicateReaction {
        actor: AccountId,
        post_id: String,
        kind: ReactionKind,
    },
}

/// Result of folding one event.
#[derive(Debug, Clone)]
pub struct FoldOutcome {
    pub metrics: InfluenceMetrics,
    pub factors: ContributingFactors,
    /// Contributions for the topic shards this event is tagged with.
    pub topics: Vec<TopicContribution>,
    /// Net change to the actor's following count (follow events only).
    pub following_delta: Option<i64>,
    /// Region and category of the post the event concerns, when known.
    pub region: Option<String>,
    pub category: Option<TopicCategory>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngagementKind {
    Reaction(ReactionKind),
    Comment,
}

#[derive(Debug, Clone)]
struct Engagement {
    at: TimeMs,
    post_id: String,
    actor: AccountId,
    kind: EngagementKind,
    polarity: Polarity,
    within_group: bool,
    /// Amplifier reach for reposts, zero otherwise.
    amplified_reach: f64,
    controversy_hint: Option<f64>,
}

#[derive(Debug, Clone)]
struct PostRecord {
    published_at: TimeMs,
    topics: Vec<Topic>,
    region: Option<String>,
    language: Option<String>,
    category: Option<TopicCategory>,
    /// Audience at publish time.
    original_reach: f64,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: TimeMs,
    value: f64,
}

/// Scores for one rolling window.
#[derive(Debug, Clone, Copy, Default)]
struct WindowScores {
    engagement_rate: f64,
    reach: f64,
    virality: f64,
    amplification_factor: f64,
    controversy: f64,
    approval: f64,
    within_group: f64,
    cross_alignment: f64,
    engaged_followers: u64,
    influence: f64,
    decay_factor: f64,
}

/// Rolling state for one account.
#[derive(Debug, Clone)]
pub struct AccountState {
    profile: Arc<AccountProfile>,
    followers: HashSet<AccountId>,
    following_count: u64,
    posts: HashMap<String, PostRecord>,
    engagements: VecDeque<Engagement>,
    impressions: VecDeque<Sample>,
    follow_changes: VecDeque<Sample>,
    active_reactions: HashSet<(AccountId, String, ReactionKind)>,
    totals: Totals,
    clock: TimeMs,
    last_activity: Option<TimeMs>,
    warnings: VecDeque<String>,
}

impl AccountState {
    pub fn new(profile: Arc<AccountProfile>) -> Self {
        Self {
            profile,
            followers: HashSet::new(),
            following_count: 0,
            posts: HashMap::new(),
            engagements: VecDeque::new(),
            impressions: VecDeque::new(),
            follow_changes: VecDeque::new(),
            active_reactions: HashSet::new(),
            totals: Totals::default(),
            clock: TimeMs::new(0),
            last_activity: None,
            warnings: VecDeque::new(),
        }
    }

    pub fn account_id(&self) -> &AccountId {
        &self.profile.id
    }

    pub fn profile(&self) -> &Arc<AccountProfile> {
        &self.profile
    }

    /// Replace the cached profile with a newer alignment version.
    pub fn update_profile(&mut self, profile: Arc<AccountProfile>) {
        if profile.alignment_version >= self.profile.alignment_version {
            self.profile = profile;
        }
    }

    pub fn follower_count(&self) -> u64 {
        self.followers.len() as u64
    }

    /// Latest timestamp folded into this account.
    pub fn clock(&self) -> TimeMs {
        self.clock
    }

    /// Whether the reaction would be rejected as a duplicate.
    pub fn has_active_reaction(&self, actor: &AccountId, post_id: &str, kind: ReactionKind) -> bool {
        self.active_reactions
            .contains(&(actor.clone(), post_id.to_string(), kind))
    }

    /// Fold one account event and evaluate metrics at the account clock.
    ///
    /// The event must be keyed to this account. Rejections leave state untouched.
    pub fn fold(
        &mut self,
        event: &Event,
        enrichment: &Enrichment,
        config: &EngineConfig,
    ) -> Result<FoldOutcome, FoldError> {
        if let EventPayload::ReactionAdded { kind, .. } = &event.payload {
            if !kind.is_repost() && self.has_active_reaction(&event.actor_id, &event.subject_id, *kind)
            {
                return Err(FoldError::DuplicateReaction {
                    actor: event.actor_id.clone(),
                    post_id: event.subject_id.clone(),
                    kind: *kind,
                });
            }
        }

        for warning in &enrichment.warnings {
            self.push_warning(warning.clone());
        }

        let at = event.timestamp;
        if at > self.clock {
            self.clock = at;
        }

        let within_group = self.is_within_group(enrichment, config);
        let mut following_delta = None;
        let mut topics = Vec::new();
        let post = self.posts.get(&event.subject_id).cloned();
        let mut region = post.as_ref().and_then(|p| p.region.clone());
        let mut category = post.as_ref().and_then(|p| p.category);

        match &event.payload {
            EventPayload::PostPublished {
                category: post_category,
                region: post_region,
                language,
                impressions,
                ..
            } => {
                let followers = self.follower_count();
                let audience = impressions.unwrap_or(followers);
                self.posts.insert(
                    event.subject_id.clone(),
                    PostRecord {
                        published_at: at,
                        topics: event.topics(),
                        region: post_region.clone(),
                        language: language.clone(),
                        category: *post_category,
                        original_reach: followers.max(1) as f64,
                    },
                );
                self.impressions.push_back(Sample {
                    at,
                    value: audience as f64,
                });
                self.touch(at);
                region = post_region.clone();
                category = *post_category;
                topics = self.topic_contributions(event, enrichment, 0.0, region.clone(), category);
            }
            EventPayload::ReactionAdded {
                kind,
                depth,
                region: reaction_region,
                ..
            } => {
                let amplified_reach = if kind.is_repost() {
                    scoring::amplifier_reach(
                        enrichment.actor_followers,
                        depth.unwrap_or(1),
                        &config.scoring,
                    )
                } else {
                    self.active_reactions.insert((
                        event.actor_id.clone(),
                        event.subject_id.clone(),
                        *kind,
                    ));
                    0.0
                };
                self.engagements.push_back(Engagement {
                    at,
                    post_id: event.subject_id.clone(),
                    actor: event.actor_id.clone(),
                    kind: EngagementKind::Reaction(*kind),
                    polarity: kind.polarity(),
                    within_group,
                    amplified_reach,
                    controversy_hint: event.controversy_hint,
                });
                if kind.is_repost() {
                    self.totals.reshares += 1;
                } else {
                    self.totals.likes += 1;
                }
                self.touch(at);
                if region.is_none() {
                    region = reaction_region.clone();
                }
                let sentiment = match kind.polarity() {
                    Polarity::Positive => 1.0,
                    Polarity::Negative => -1.0,
                    Polarity::Neutral => 0.0,
                };
                topics = self.topic_contributions(event, enrichment, sentiment, region.clone(), category);
            }
            EventPayload::ReactionRemoved { kind, .. } => {
                if self.remove_engagement(&event.actor_id, &event.subject_id, *kind) {
                    if kind.is_repost() {
                        self.totals.reshares = self.totals.reshares.saturating_sub(1);
                    } else {
                        self.totals.likes = self.totals.likes.saturating_sub(1);
                    }
                }
                self.active_reactions.remove(&(
                    event.actor_id.clone(),
                    event.subject_id.clone(),
                    *kind,
                ));
            }
            EventPayload::CommentAdded {
                sentiment,
                region: comment_region,
                ..
            } => {
                self.engagements.push_back(Engagement {
                    at,
                    post_id: event.subject_id.clone(),
                    actor: event.actor_id.clone(),
                    kind: EngagementKind::Comment,
                    polarity: sentiment_polarity(*sentiment),
                    within_group,
                    amplified_reach: 0.0,
                    controversy_hint: event.controversy_hint,
                });
                self.totals.comments += 1;
                self.touch(at);
                if region.is_none() {
                    region = comment_region.clone();
                }
                topics = self.topic_contributions(event, enrichment, *sentiment, region.clone(), category);
            }
            EventPayload::FollowChanged { followed } => {
                let changed = if *followed {
                    self.followers.insert(event.actor_id.clone())
                } else {
                    self.followers.remove(&event.actor_id)
                };
                if changed {
                    let delta = if *followed { 1 } else { -1 };
                    self.follow_changes.push_back(Sample {
                        at,
                        value: delta as f64,
                    });
                    following_delta = Some(delta);
                    self.touch(at);
                }
            }
            EventPayload::TopicMentioned { .. } => {}
        }

        Ok(self.outcome(topics, following_delta, region, category, config))
    }

    /// Apply a change to the number of accounts this account follows.
    pub fn adjust_following(&mut self, delta: i64, at: TimeMs) {
        if delta >= 0 {
            self.following_count = self.following_count.saturating_add(delta as u64);
        } else {
            self.following_count = self.following_count.saturating_sub(delta.unsigned_abs());
        }
        if at > self.clock {
            self.clock = at;
        }
    }

    /// Move the evaluation clock forward without folding anything.
    pub fn advance_clock(&mut self, now: TimeMs) {
        if now > self.clock {
            self.clock = now;
        }
    }

    /// Current metrics at the account clock.
    pub fn evaluate(&mut self, config: &EngineConfig) -> (InfluenceMetrics, ContributingFactors) {
        self.evict();
        self.metrics_at(self.clock, config)
    }

    fn outcome(
        &mut self,
        topics: Vec<TopicContribution>,
        following_delta: Option<i64>,
        region: Option<String>,
        category: Option<TopicCategory>,
        config: &EngineConfig,
    ) -> FoldOutcome {
        let (metrics, factors) = self.evaluate(config);
        FoldOutcome {
            metrics,
            factors,
            topics,
            following_delta,
            region,
            category,
        }
    }

    fn touch(&mut self, at: TimeMs) {
        if self.last_activity.map_or(true, |last| at > last) {
            self.last_activity = Some(at);
        }
    }

    fn push_warning(&mut self, warning: String) {
        tracing::warn!(account_id = %self.profile.id, "{}", warning);
        if self.warnings.len() == MAX_WARNINGS {
            self.warnings.pop_front();
        }
        self.warnings.push_back(warning);
    }

    /// The account's own alignment as of the event being folded.
    fn alignment_at<'a>(&'a self, enrichment: &'a Enrichment) -> &'a PoliticalAlignment {
        match &enrichment.subject {
            Some(subject) => &subject.alignment,
            None => &self.profile.alignment,
        }
    }

    /// Unknown alignments resolve to a distance of exactly the threshold.
    fn is_within_group(&self, enrichment: &Enrichment, config: &EngineConfig) -> bool {
        let threshold = config.scoring.alignment_threshold;
        let distance = match &enrichment.actor {
            Some(actor) => actor.alignment.distance(self.alignment_at(enrichment)),
            None => threshold,
        };
        distance <= threshold
    }

    fn remove_engagement(&mut self, actor: &AccountId, post_id: &str, kind: ReactionKind) -> bool {
        let position = self.engagements.iter().rposition(|e| {
            &e.actor == actor && e.post_id == post_id && e.kind == EngagementKind::Reaction(kind)
        });
        match position {
            Some(idx) => {
                self.engagements.remove(idx);
                true
            }
            None => false,
        }
    }

    fn topic_contributions(
        &self,
        event: &Event,
        enrichment: &Enrichment,
        sentiment: f64,
        region: Option<String>,
        category: Option<TopicCategory>,
    ) -> Vec<TopicContribution> {
        let mut tags = event.topics();
        let post = self.posts.get(&event.subject_id);
        if let Some(post) = post {
            tags.extend(post.topics.iter().cloned());
            tags.sort();
            tags.dedup();
        }
        let language = post.and_then(|p| p.language.clone());
        let bias = self.alignment_at(enrichment).bias();
        tags.iter()
            .map(|topic| TopicContribution {
                key: TrendKey {
                    topic: topic.clone(),
                    region: normalize_tag(region.as_deref()),
                    language: normalize_tag(language.as_deref()),
                },
                at: event.timestamp,
                weight: 1.0,
                sentiment,
                controversy: event.controversy_hint.unwrap_or(0.0),
                bias,
                category,
                related: tags.iter().filter(|t| *t != topic).cloned().collect(),
            })
            .collect()
    }

    /// Drop contributions older than the longest window, along with the posts
    /// and reaction markers they reference.
    fn evict(&mut self) {
        let horizon = self.clock.minus(Timeframe::Month.window_ms());
        while let Some(e) = self.engagements.pop_front() {
            if e.at >= horizon {
                self.engagements.push_front(e);
                break;
            }
            if let EngagementKind::Reaction(kind) = e.kind {
                if !kind.is_repost() {
                    self.active_reactions.remove(&(e.actor, e.post_id, kind));
                }
            }
        }
        self.posts.retain(|_, post| post.published_at >= horizon);
        while self.impressions.front().is_some_and(|s| s.at < horizon) {
            self.impressions.pop_front();
        }
        while self.follow_changes.front().is_some_and(|s| s.at < horizon) {
            self.follow_changes.pop_front();
        }
    }

    fn metrics_at(&self, now: TimeMs, config: &EngineConfig) -> (InfluenceMetrics, ContributingFactors) {
        let windows: BTreeMap<Timeframe, WindowScores> = Timeframe::ALL
            .into_iter()
            .map(|tf| (tf, self.window_scores(tf, now, config)))
            .collect();
        let day = windows.get(&Timeframe::Day).copied().unwrap_or_default();
        let follower_count = self.follower_count();

        let metrics = InfluenceMetrics {
            account_id: self.profile.id.clone(),
            persona_type: self.profile.persona_type,
            follower_count,
            following_count: self.following_count,
            engagement_rate: day.engagement_rate,
            reach_score: day.reach,
            approval_rating: day.approval,
            controversy_level: day.controversy,
            trending_score: self.trending_score(now, config),
            virality_score: day.virality,
            is_viral: day.virality > config.scoring.viral_threshold,
            amplification_factor: day.amplification_factor,
            influence_score: day.influence,
            growth: Growth {
                daily: self.growth(Timeframe::Day, now, config),
                weekly: self.growth(Timeframe::Week, now, config),
                monthly: self.growth(Timeframe::Month, now, config),
            },
            totals: self.totals.clone(),
            follower_influence: FollowerInfluence {
                total_followers: follower_count,
                engaged_followers: day.engaged_followers,
            },
            alignment: AlignmentInfluence {
                within_group_influence: day.within_group,
                cross_alignment_influence: day.cross_alignment,
                anomaly: day.cross_alignment > day.within_group,
            },
            timeframe_scores: windows.iter().map(|(tf, w)| (*tf, w.influence)).collect(),
            influence_rank: None,
            category_rank: None,
            last_updated: now,
            warnings: self.warnings.iter().cloned().collect(),
        };
        let factors = ContributingFactors {
            engagement_rate: day.engagement_rate,
            reach: day.reach,
            virality: day.virality,
            controversy: day.controversy,
            decay_factor: day.decay_factor,
        };
        (metrics, factors)
    }

    fn window_scores(&self, timeframe: Timeframe, now: TimeMs, config: &EngineConfig) -> WindowScores {
        let scoring_cfg = &config.scoring;
        let engagement_decay = HalfLife::new(config.decay.engagement_half_life);
        let virality_decay = HalfLife::new(config.decay.virality_half_life);
        let influence_decay = HalfLife::new(config.decay.influence_half_life);
        let start = now.minus(timeframe.window_ms());
        let in_window = |at: TimeMs| at >= start && at <= now;

        let mut counts = EngagementCounts::default();
        let mut positive = 0.0;
        let mut negative = 0.0;
        let mut within = 0.0;
        let mut cross = 0.0;
        let mut amplified = 0.0;
        let mut hints = (0.0, 0usize);
        let mut engaged_followers: HashSet<&AccountId> = HashSet::new();
        let mut spreads: HashMap<&str, PostSpread<'_>> = HashMap::new();

        for sample in self.impressions.iter().filter(|s| in_window(s.at)) {
            counts.impressions += sample.value * engagement_decay.weight(sample.at, now);
        }

        for e in self.engagements.iter().filter(|e| in_window(e.at)) {
            let w = engagement_decay.weight(e.at, now);
            let kind_weight = match e.kind {
                EngagementKind::Comment => {
                    counts.comments += w;
                    scoring_cfg.comment_weight
                }
                EngagementKind::Reaction(kind) if kind.is_repost() => {
                    counts.reposts += w;
                    scoring_cfg.repost_weight
                }
                EngagementKind::Reaction(_) => {
                    counts.likes += w;
                    scoring_cfg.like_weight
                }
            };
            match e.polarity {
                Polarity::Positive => positive += w,
                Polarity::Negative => negative += w,
                Polarity::Neutral => {}
            }
            if e.within_group {
                within += kind_weight * w;
            } else {
                cross += kind_weight * w;
            }
            if let Some(hint) = e.controversy_hint {
                hints.0 += hint;
                hints.1 += 1;
            }
            if self.followers.contains(&e.actor) {
                engaged_followers.insert(&e.actor);
            }

            let vw = virality_decay.weight(e.at, now);
            let spread = spreads.entry(e.post_id.as_str()).or_default();
            spread.engagers.insert(&e.actor);
            if e.amplified_reach > 0.0 {
                amplified += e.amplified_reach * vw;
                spread.reposts += vw;
                spread.amplified += e.amplified_reach * vw;
                spread.first_repost = Some(spread.first_repost.map_or(e.at, |f: TimeMs| f.min(e.at)));
            }
        }

        let follower_count = self.follower_count();
        let mut virality = 0.0;
        let mut amplification_factor = 0.0;
        for (post_id, spread) in &spreads {
            let original_reach = self
                .posts
                .get(*post_id)
                .map(|p| p.original_reach)
                .unwrap_or(follower_count.max(1) as f64);
            let velocity = match spread.first_repost {
                Some(first) => {
                    let span_hours = (now.since(first).max(MS_PER_HOUR)) as f64 / MS_PER_HOUR as f64;
                    spread.reposts / span_hours
                }
                None => 0.0,
            };
            let stats = SpreadStats {
                velocity,
                unique_engagers: spread.engagers.len() as u64,
                follower_count,
                amplified_reach: spread.amplified,
                original_reach,
            };
            let score = scoring::virality_score(&stats, scoring_cfg);
            if score > virality {
                virality = score;
                amplification_factor = stats.amplification_factor();
            }
        }

        let polar = scoring::controversy_score(positive, negative, scoring_cfg);
        let controversy = if hints.1 > 0 {
            (polar + hints.0 / hints.1 as f64) / 2.0
        } else {
            polar
        };
        let engagement_rate = scoring::engagement_rate(&counts, scoring_cfg);
        let reach = scoring::reach_score(follower_count, amplified, scoring_cfg);
        let decay_factor = self
            .last_activity
            .map_or(1.0, |last| influence_decay.weight(last, now));
        let influence = scoring::influence_score(
            &InfluenceInputs {
                engagement_rate,
                reach,
                virality,
                controversy,
                decay_factor,
            },
            scoring_cfg,
        );

        WindowScores {
            engagement_rate,
            reach,
            virality,
            amplification_factor,
            controversy,
            approval: scoring::approval_rating(positive, negative),
            within_group: within,
            cross_alignment: cross,
            engaged_followers: engaged_followers.len() as u64,
            influence,
            decay_factor,
        }
    }

    fn trending_score(&self, now: TimeMs, config: &EngineConfig) -> f64 {
        let decay = HalfLife::new(config.decay.virality_half_life);
        let start = now.minus(MS_PER_HOUR);
        let weighted: f64 = self
            .engagements
            .iter()
            .filter(|e| e.at >= start && e.at <= now)
            .map(|e| {
                let w = match e.kind {
                    EngagementKind::Comment => config.scoring.comment_weight,
                    EngagementKind::Reaction(k) if k.is_repost() => config.scoring.repost_weight,
                    EngagementKind::Reaction(_) => config.scoring.like_weight,
                };
                w * decay.weight(e.at, now)
            })
            .sum();
        scoring::saturate(weighted, TRENDING_SCALE)
    }

    /// Decayed net follower change over the window, as a percentage of the base.
    fn growth(&self, timeframe: Timeframe, now: TimeMs, config: &EngineConfig) -> f64 {
        let decay = HalfLife::new(config.decay.follower_half_life);
        let start = now.minus(timeframe.window_ms());
        let mut raw = 0.0;
        let mut weighted = 0.0;
        for change in self.follow_changes.iter().filter(|c| c.at >= start && c.at <= now) {
            raw += change.value;
            weighted += change.value * decay.weight(change.at, now);
        }
        let base = (self.follower_count() as f64 - raw).max(1.0);
        100.0 * weighted / base
    }
}

#[derive(Default)]
struct PostSpread<'a> {
    engagers: HashSet<&'a AccountId>,
    reposts: f64,
    amplified: f64,
    first_repost: Option<TimeMs>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PersonaType;

    const T0: i64 = 1_700_000_000_000;

    fn profile(id: &str, economic: f64) -> Arc<AccountProfile> {
        Arc::new(AccountProfile {
            id: AccountId::new(id),
            persona_type: PersonaType::Influencer,
            alignment: PoliticalAlignment {
                economic_position: economic,
                social_position: economic,
                ..PoliticalAlignment::neutral()
            },
            alignment_version: 1,
            effective_at: TimeMs::new(0),
        })
    }

    fn event(seq: u64, offset_ms: i64, actor: &str, subject: &str, payload: EventPayload) -> Event {
        Event {
            seq,
            timestamp: TimeMs::new(T0 + offset_ms),
            actor_id: AccountId::new(actor),
            subject_id: subject.to_string(),
            controversy_hint: None,
            payload,
        }
    }

    fn post(seq: u64, offset_ms: i64, post_id: &str) -> Event {
        event(
            seq,
            offset_ms,
            "alice",
            post_id,
            EventPayload::PostPublished {
                topics: vec!["#Vote".to_string()],
                category: Some(TopicCategory::Politics),
                region: Some("US".to_string()),
                language: None,
                impressions: None,
            },
        )
    }

    fn reaction(seq: u64, offset_ms: i64, actor: &str, post_id: &str, kind: ReactionKind) -> Event {
        event(
            seq,
            offset_ms,
            actor,
            post_id,
            EventPayload::ReactionAdded {
                author_id: AccountId::new("alice"),
                kind,
                depth: None,
                topics: vec![],
                region: None,
            },
        )
    }

    fn follow(seq: u64, actor: &str) -> Event {
        event(seq, 0, actor, "alice", EventPayload::FollowChanged { followed: true })
    }

    fn known(actor: &str) -> Enrichment {
        Enrichment {
            actor: Some(profile(actor, 50.0)),
            ..Default::default()
        }
    }

    #[test]
    fn test_duplicate_reaction_rejected_other_kind_accepted() {
        let cfg = EngineConfig::default();
        let mut state = AccountState::new(profile("alice", 50.0));
        state.fold(&post(1, 0, "p1"), &known("alice"), &cfg).unwrap();
        state
            .fold(&reaction(2, 10, "bob", "p1", ReactionKind::Like), &known("bob"), &cfg)
            .unwrap();

        let err = state
            .fold(&reaction(3, 20, "bob", "p1", ReactionKind::Like), &known("bob"), &cfg)
            .unwrap_err();
        assert!(matches!(err, FoldError::DuplicateReaction { .. }));

        let ok = state
            .fold(&reaction(4, 30, "bob", "p1", ReactionKind::Love), &known("bob"), &cfg)
            .unwrap();
        assert_eq!(ok.metrics.totals.likes, 2);
    }

    #[test]
    fn test_reaction_removed_allows_reacting_again() {
        let cfg = EngineConfig::default();
        let mut state = AccountState::new(profile("alice", 50.0));
        state
            .fold(&reaction(1, 0, "bob", "p1", ReactionKind::Like), &known("bob"), &cfg)
            .unwrap();
        let removed = event(
            2,
            5,
            "bob",
            "p1",
            EventPayload::ReactionRemoved {
                author_id: AccountId::new("alice"),
                kind: ReactionKind::Like,
            },
        );
        let out = state.fold(&removed, &known("bob"), &cfg).unwrap();
        assert_eq!(out.metrics.totals.likes, 0);
        assert!(state
            .fold(&reaction(3, 10, "bob", "p1", ReactionKind::Like), &known("bob"), &cfg)
            .is_ok());
    }

    #[test]
    fn test_engagement_rate_and_reach_monotone_per_reaction() {
        let cfg = EngineConfig::default();
        let mut state = AccountState::new(profile("alice", 50.0));
        for (i, f) in ["f1", "f2", "f3"].iter().enumerate() {
            state.fold(&follow(i as u64 + 1, f), &known(f), &cfg).unwrap();
        }
        state.fold(&post(10, 0, "p1"), &known("alice"), &cfg).unwrap();
        let mut last_rate = -1.0;
        let mut last_reach = -1.0;
        for (i, actor) in ["a", "b", "c", "d"].iter().enumerate() {
            let kind = if i % 2 == 0 { ReactionKind::Like } else { ReactionKind::Repost };
            let out = state
                .fold(&reaction(20 + i as u64, 0, actor, "p1", kind), &known(actor), &cfg)
                .unwrap();
            assert!(out.metrics.engagement_rate >= last_rate);
            assert!(out.metrics.reach_score >= last_reach);
            last_rate = out.metrics.engagement_rate;
            last_reach = out.metrics.reach_score;
        }
    }

    #[test]
    fn test_follow_is_idempotent_and_reports_delta() {
        let cfg = EngineConfig::default();
        let mut state = AccountState::new(profile("alice", 50.0));
        let first = state.fold(&follow(1, "bob"), &known("bob"), &cfg).unwrap();
        assert_eq!(first.following_delta, Some(1));
        let again = state.fold(&follow(2, "bob"), &known("bob"), &cfg).unwrap();
        assert_eq!(again.following_delta, None);
        assert_eq!(again.metrics.follower_count, 1);
        assert!(again.metrics.growth.daily > 0.0);
    }

    #[test]
    fn test_cross_alignment_engagement_flags_anomaly() {
        let cfg = EngineConfig::default();
        let mut state = AccountState::new(profile("alice", 10.0));
        let far = Enrichment {
            actor: Some(profile("bob", 90.0)),
            ..Default::default()
        };
        let out = state
            .fold(&reaction(1, 0, "bob", "p1", ReactionKind::Like), &far, &cfg)
            .unwrap();
        assert!(out.metrics.alignment.anomaly);
        assert_eq!(out.metrics.alignment.within_group_influence, 0.0);
    }

    #[test]
    fn test_unknown_actor_alignment_counts_within_group_with_warning() {
        let cfg = EngineConfig::default();
        let mut state = AccountState::new(profile("alice", 10.0));
        let unknown = Enrichment {
            warnings: vec!["no cached alignment for ghost".to_string()],
            ..Default::default()
        };
        let out = state
            .fold(&reaction(1, 0, "ghost", "p1", ReactionKind::Like), &unknown, &cfg)
            .unwrap();
        assert!(!out.metrics.alignment.anomaly);
        assert!(out.metrics.alignment.within_group_influence > 0.0);
        assert_eq!(out.metrics.warnings.len(), 1);
    }

    #[test]
    fn test_post_topics_flow_to_reactions() {
        let cfg = EngineConfig::default();
        let mut state = AccountState::new(profile("alice", 50.0));
        let out = state.fold(&post(1, 0, "p1"), &known("alice"), &cfg).unwrap();
        assert_eq!(out.topics.len(), 1);
        assert_eq!(out.topics[0].key.region, "us");

        let out = state
            .fold(&reaction(2, 10, "bob", "p1", ReactionKind::Dislike), &known("bob"), &cfg)
            .unwrap();
        assert_eq!(out.topics.len(), 1);
        assert_eq!(out.topics[0].key.topic.as_str(), "vote");
        assert_eq!(out.topics[0].sentiment, -1.0);
        assert_eq!(out.region.as_deref(), Some("US"));
    }

    #[test]
    fn test_own_alignment_follows_event_version() {
        let cfg = EngineConfig::default();
        let mut state = AccountState::new(profile("alice", 90.0));
        let at_event = Enrichment {
            actor: Some(profile("bob", 15.0)),
            subject: Some(profile("alice", 10.0)),
            ..Default::default()
        };
        let out = state
            .fold(&reaction(1, 0, "bob", "p1", ReactionKind::Like), &at_event, &cfg)
            .unwrap();
        assert!(!out.metrics.alignment.anomaly);
        assert!(out.metrics.alignment.within_group_influence > 0.0);
        assert_eq!(out.metrics.alignment.cross_alignment_influence, 0.0);
    }

    #[test]
    fn test_old_posts_and_reactions_are_evicted() {
        let cfg = EngineConfig::default();
        let mut state = AccountState::new(profile("alice", 50.0));
        state.fold(&post(1, 0, "p1"), &known("alice"), &cfg).unwrap();
        state
            .fold(&reaction(2, 10, "bob", "p1", ReactionKind::Like), &known("bob"), &cfg)
            .unwrap();
        state
            .fold(&reaction(3, 20, "carol", "p1", ReactionKind::Repost), &known("carol"), &cfg)
            .unwrap();
        assert_eq!(state.posts.len(), 1);
        assert!(state.has_active_reaction(&AccountId::new("bob"), "p1", ReactionKind::Like));

        let later = Timeframe::Month.window_ms() + MS_PER_HOUR;
        state.fold(&post(4, later, "p2"), &known("alice"), &cfg).unwrap();
        assert_eq!(state.posts.len(), 1);
        assert!(state.posts.contains_key("p2"));
        assert!(state.engagements.is_empty());
        assert!(state.active_reactions.is_empty());
        assert_eq!(state.impressions.len(), 1);
    }

    #[test]
    fn test_last_updated_tracks_latest_event() {
        let cfg = EngineConfig::default();
        let mut state = AccountState::new(profile("alice", 50.0));
        state
            .fold(&reaction(1, 5_000, "bob", "p1", ReactionKind::Like), &known("bob"), &cfg)
            .unwrap();
        let out = state
            .fold(&reaction(2, 1_000, "carol", "p1", ReactionKind::Like), &known("carol"), &cfg)
            .unwrap();
        assert_eq!(out.metrics.last_updated, TimeMs::new(T0 + 5_000));
    }
}
