//! Pure computation: decay, scoring formulas, per-account and per-topic state,
//! history and ranking. Nothing in here performs I/O.

pub mod aggregator;
pub mod decay;
pub mod history;
pub mod ranker;
pub mod scoring;
pub mod trend;

pub use aggregator::{AccountState, Enrichment, FoldError, FoldOutcome};
pub use decay::HalfLife;
pub use history::{classify, regression_slope, HistoryStore};
pub use ranker::{LeaderboardRanker, RankInput};
pub use trend::{sort_trends, window_within_retention, TopicContribution, TopicTrend, TrendBucket};
