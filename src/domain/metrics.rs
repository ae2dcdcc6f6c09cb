//! Influence metrics, history points, and the timeframe/category vocabulary.

use crate::domain::{AccountId, PersonaType, TimeMs, MS_PER_DAY, MS_PER_HOUR};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Rolling window a score is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    Hour,
    Day,
    Week,
    Month,
}

impl Timeframe {
    pub const ALL: [Timeframe; 4] = [
        Timeframe::Hour,
        Timeframe::Day,
        Timeframe::Week,
        Timeframe::Month,
    ];

    pub fn window_ms(&self) -> i64 {
        match self {
            Timeframe::Hour => MS_PER_HOUR,
            Timeframe::Day => MS_PER_DAY,
            Timeframe::Week => 7 * MS_PER_DAY,
            Timeframe::Month => 30 * MS_PER_DAY,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Hour => "hour",
            Timeframe::Day => "day",
            Timeframe::Week => "week",
            Timeframe::Month => "month",
        }
    }
}

impl FromStr for Timeframe {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" | "1h" => Ok(Timeframe::Hour),
            "day" | "24h" | "daily" => Ok(Timeframe::Day),
            "week" | "7d" | "weekly" => Ok(Timeframe::Week),
            "month" | "30d" | "monthly" => Ok(Timeframe::Month),
            _ => Err(()),
        }
    }
}

/// Leaderboard partition: everyone, or a single persona type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    All,
    Persona(PersonaType),
}

impl Category {
    pub fn all() -> Vec<Category> {
        std::iter::once(Category::All)
            .chain(PersonaType::ALL.into_iter().map(Category::Persona))
            .collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::All => "all",
            Category::Persona(p) => p.as_str(),
        }
    }

    pub fn includes(&self, persona: PersonaType) -> bool {
        match self {
            Category::All => true,
            Category::Persona(p) => *p == persona,
        }
    }
}

impl FromStr for Category {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s == "all" || s == "overall" {
            return Ok(Category::All);
        }
        PersonaType::from_str(&s).map(Category::Persona)
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// History downsampling granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
    Week,
}

impl Granularity {
    pub fn bucket_ms(&self) -> i64 {
        match self {
            Granularity::Hour => MS_PER_HOUR,
            Granularity::Day => MS_PER_DAY,
            Granularity::Week => 7 * MS_PER_DAY,
        }
    }
}

impl FromStr for Granularity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" | "hourly" => Ok(Granularity::Hour),
            "day" | "daily" => Ok(Granularity::Day),
            "week" | "weekly" => Ok(Granularity::Week),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Growth {
    pub daily: f64,
    pub weekly: f64,
    pub monthly: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub likes: u64,
    pub reshares: u64,
    pub comments: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowerInfluence {
    pub total_followers: u64,
    /// Followers who engaged with the account inside the day window.
    pub engaged_followers: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlignmentInfluence {
    pub within_group_influence: f64,
    pub cross_alignment_influence: f64,
    /// Set when cross-alignment influence exceeds within-group influence.
    pub anomaly: bool,
}

/// Current metrics for one account. Written only by the owning shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfluenceMetrics {
    pub account_id: AccountId,
    pub persona_type: PersonaType,
    pub follower_count: u64,
    pub following_count: u64,
    pub engagement_rate: f64,
    pub reach_score: f64,
    pub approval_rating: f64,
    pub controversy_level: f64,
    pub trending_score: f64,
    pub virality_score: f64,
    pub is_viral: bool,
    pub amplification_factor: f64,
    pub influence_score: f64,
    pub growth: Growth,
    pub totals: Totals,
    pub follower_influence: FollowerInfluence,
    pub alignment: AlignmentInfluence,
    pub timeframe_scores: BTreeMap<Timeframe, f64>,
    pub influence_rank: Option<u32>,
    pub category_rank: Option<u32>,
    pub last_updated: TimeMs,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl InfluenceMetrics {
    /// Zero state for a freshly registered account.
    pub fn empty(account_id: AccountId, persona_type: PersonaType, at: TimeMs) -> Self {
        Self {
            account_id,
            persona_type,
            follower_count: 0,
            following_count: 0,
            engagement_rate: 0.0,
            reach_score: 0.0,
            approval_rating: 50.0,
            controversy_level: 0.0,
            trending_score: 0.0,
            virality_score: 0.0,
            is_viral: false,
            amplification_factor: 0.0,
            influence_score: 0.0,
            growth: Growth::default(),
            totals: Totals::default(),
            follower_influence: FollowerInfluence::default(),
            alignment: AlignmentInfluence::default(),
            timeframe_scores: Timeframe::ALL.into_iter().map(|t| (t, 0.0)).collect(),
            influence_rank: None,
            category_rank: None,
            last_updated: at,
            warnings: Vec::new(),
        }
    }

    pub fn score_for(&self, timeframe: Timeframe) -> f64 {
        self.timeframe_scores.get(&timeframe).copied().unwrap_or(0.0)
    }
}

/// Score components recorded alongside a history point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributingFactors {
    pub engagement_rate: f64,
    pub reach: f64,
    pub virality: f64,
    pub controversy: f64,
    pub decay_factor: f64,
}

/// Immutable append-only snapshot of an account's influence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfluenceHistoryPoint {
    pub account_id: AccountId,
    pub timestamp: TimeMs,
    pub score: f64,
    pub follower_count: u64,
    pub engagement_rate: f64,
    pub contributing_factors: ContributingFactors,
}

/// Direction of an account's score over a history window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

/// One row of a ranked leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub account_id: AccountId,
    pub persona_type: PersonaType,
    pub score: f64,
    pub follower_count: u64,
    pub timeframe: Timeframe,
    pub category: Category,
    /// previousRank - currentRank; positive means the account moved up.
    pub change: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_and_serialize() {
        assert_eq!(Category::from_str("all"), Ok(Category::All));
        assert_eq!(
            Category::from_str("Journalist"),
            Ok(Category::Persona(PersonaType::Journalist))
        );
        assert!(Category::from_str("unknown").is_err());
        assert_eq!(
            serde_json::to_string(&Category::Persona(PersonaType::Activist)).unwrap(),
            "\"activist\""
        );
    }

    #[test]
    fn test_timeframe_windows_increase() {
        let windows: Vec<i64> = Timeframe::ALL.iter().map(|t| t.window_ms()).collect();
        assert!(windows.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(Timeframe::from_str("24h"), Ok(Timeframe::Day));
    }

    #[test]
    fn test_metrics_json_is_camel_case() {
        let m = InfluenceMetrics::empty(AccountId::new("a"), PersonaType::Influencer, TimeMs::new(5));
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["followerInfluence"]["totalFollowers"], 0);
        assert_eq!(v["timeframeScores"]["day"], 0.0);
        assert!(v.get("warnings").is_none());
    }
}
