//! Domain types for the influence engine.
//!
//! This module provides:
//! - Primitives: TimeMs, AccountId, Topic
//! - Account identity and political alignment
//! - Canonical engagement events and their shard keys
//! - Metrics, history points, leaderboard and trend types
//! - Stable rank ordering for deterministic leaderboards

pub mod account;
pub mod event;
pub mod metrics;
pub mod ordering;
pub mod primitives;
pub mod trend;

pub use account::{AccountProfile, PersonaType, PoliticalAlignment};
pub use event::{sentiment_polarity, Event, EventKind, EventPayload, Polarity, ReactionKind, ShardKey};
pub use metrics::{
    AlignmentInfluence, Category, ContributingFactors, FollowerInfluence, Granularity, Growth,
    InfluenceHistoryPoint, InfluenceMetrics, LeaderboardEntry, Timeframe, Totals, TrendDirection,
};
pub use ordering::RankKey;
pub use primitives::{
    normalize_tag, AccountId, IdParseError, TimeMs, Topic, MS_PER_DAY, MS_PER_HOUR, MS_PER_MINUTE,
};
pub use trend::{TopicCategory, Trend, TrendKey, TrendSort};
