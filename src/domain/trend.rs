//! Trending-topic types.

use crate::domain::{TimeMs, Topic};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Topic category. Closed set, unknown values fail validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicCategory {
    Politics,
    Technology,
    Entertainment,
    Business,
    Sports,
    Science,
    Health,
    World,
    Other,
}

impl TopicCategory {
    pub const ALL: [TopicCategory; 9] = [
        TopicCategory::Politics,
        TopicCategory::Technology,
        TopicCategory::Entertainment,
        TopicCategory::Business,
        TopicCategory::Sports,
        TopicCategory::Science,
        TopicCategory::Health,
        TopicCategory::World,
        TopicCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TopicCategory::Politics => "politics",
            TopicCategory::Technology => "technology",
            TopicCategory::Entertainment => "entertainment",
            TopicCategory::Business => "business",
            TopicCategory::Sports => "sports",
            TopicCategory::Science => "science",
            TopicCategory::Health => "health",
            TopicCategory::World => "world",
            TopicCategory::Other => "other",
        }
    }
}

impl FromStr for TopicCategory {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        TopicCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or(())
    }
}

/// Identity of a trend: (topic, region, language). Empty region/language = global.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendKey {
    pub topic: Topic,
    pub region: String,
    pub language: String,
}

/// Read-side projection of a topic's bucket store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trend {
    pub topic: String,
    pub region: String,
    pub language: String,
    pub category: TopicCategory,
    pub volume: f64,
    pub velocity: f64,
    pub trending_score: f64,
    pub sentiment: f64,
    pub controversy_level: f64,
    pub political_bias: f64,
    pub peak_time: TimeMs,
    pub related_topics: Vec<String>,
    pub is_active: bool,
    pub first_seen: TimeMs,
    pub last_seen: TimeMs,
}

/// Sort order for trend listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrendSort {
    #[default]
    Score,
    Volume,
    Velocity,
}

impl FromStr for TrendSort {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "score" => Ok(TrendSort::Score),
            "volume" => Ok(TrendSort::Volume),
            "velocity" => Ok(TrendSort::Velocity),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse() {
        assert_eq!(TopicCategory::from_str("Politics"), Ok(TopicCategory::Politics));
        assert!(TopicCategory::from_str("gossip").is_err());
    }

    #[test]
    fn test_sort_parse() {
        assert_eq!(TrendSort::from_str("VOLUME"), Ok(TrendSort::Volume));
        assert!(TrendSort::from_str("").is_err());
    }
}
