//! Subscription filters and the live update envelope.

use crate::domain::{normalize_tag, AccountId, TimeMs, TopicCategory, Trend};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BroadcastError {
    #[error("invalid subscription filter: {0}")]
    InvalidFilter(String),
}

/// Kinds of facts a subscriber can ask for. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Posts,
    Reactions,
    News,
    Trends,
}

impl UpdateType {
    pub const ALL: [UpdateType; 4] = [
        UpdateType::Posts,
        UpdateType::Reactions,
        UpdateType::News,
        UpdateType::Trends,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::Posts => "posts",
            UpdateType::Reactions => "reactions",
            UpdateType::News => "news",
            UpdateType::Trends => "trends",
        }
    }
}

impl FromStr for UpdateType {
    type Err = BroadcastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UpdateType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| BroadcastError::InvalidFilter(format!("unknown update type '{}'", s)))
    }
}

/// What a connection wants to receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub types: BTreeSet<UpdateType>,
    pub region: Option<String>,
    pub category: Option<TopicCategory>,
}

impl SubscriptionFilter {
    /// Parse a comma-separated type list plus optional region and category.
    ///
    /// Missing, empty, unknown or malformed types are rejected.
    pub fn parse(
        types: Option<&str>,
        region: Option<&str>,
        category: Option<&str>,
    ) -> Result<Self, BroadcastError> {
        let raw = types
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| BroadcastError::InvalidFilter("types must not be empty".to_string()))?;

        let mut parsed = BTreeSet::new();
        for part in raw.split(',') {
            if part.trim().is_empty() {
                return Err(BroadcastError::InvalidFilter(format!(
                    "malformed types list '{}'",
                    raw
                )));
            }
            parsed.insert(part.parse::<UpdateType>()?);
        }

        let category = match category.map(str::trim).filter(|c| !c.is_empty()) {
            Some(c) => Some(TopicCategory::from_str(c).map_err(|_| {
                BroadcastError::InvalidFilter(format!("unknown category '{}'", c))
            })?),
            None => None,
        };
        let region = Some(normalize_tag(region)).filter(|r| !r.is_empty());

        Ok(Self {
            types: parsed,
            region,
            category,
        })
    }

    /// Facts without a region or category pass those filters.
    pub fn matches(&self, envelope: &Envelope) -> bool {
        if !self.types.contains(&envelope.update_type) {
            return false;
        }
        if let (Some(wanted), Some(actual)) = (&self.region, &envelope.region) {
            if wanted != actual {
                return false;
            }
        }
        if let (Some(wanted), Some(actual)) = (self.category, envelope.category) {
            if wanted != actual {
                return false;
            }
        }
        true
    }
}

/// News item pushed by the external news collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsItem {
    pub id: String,
    pub headline: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub category: Option<TopicCategory>,
    #[serde(default)]
    pub published_at: Option<TimeMs>,
}

/// Typed payload of a live fact.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LiveUpdate {
    #[serde(rename_all = "camelCase")]
    Post {
        post_id: String,
        author_id: AccountId,
        topics: Vec<String>,
        influence_score: f64,
        follower_count: u64,
    },
    #[serde(rename_all = "camelCase")]
    Reaction {
        post_id: String,
        author_id: AccountId,
        actor_id: AccountId,
        /// Reaction kind, `comment`, or `removed`.
        reaction: String,
        engagement_rate: f64,
        virality_score: f64,
        is_viral: bool,
    },
    #[serde(rename_all = "camelCase")]
    Trend { trend: Trend },
    #[serde(rename_all = "camelCase")]
    News { news: NewsItem },
}

impl LiveUpdate {
    pub fn update_type(&self) -> UpdateType {
        match self {
            LiveUpdate::Post { .. } => UpdateType::Posts,
            LiveUpdate::Reaction { .. } => UpdateType::Reactions,
            LiveUpdate::Trend { .. } => UpdateType::Trends,
            LiveUpdate::News { .. } => UpdateType::News,
        }
    }
}

/// A published fact with its global sequence number.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub seq: u64,
    pub timestamp: TimeMs,
    #[serde(rename = "type")]
    pub update_type: UpdateType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<TopicCategory>,
    pub payload: LiveUpdate,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(update_type: UpdateType, region: Option<&str>, category: Option<TopicCategory>) -> Envelope {
        Envelope {
            seq: 1,
            timestamp: TimeMs::new(0),
            update_type,
            region: region.map(str::to_string),
            category,
            payload: LiveUpdate::News {
                news: NewsItem {
                    id: "n1".to_string(),
                    headline: "h".to_string(),
                    summary: None,
                    url: None,
                    region: None,
                    category: None,
                    published_at: None,
                },
            },
        }
    }

    #[test]
    fn test_parse_rejects_empty_unknown_and_malformed() {
        assert!(SubscriptionFilter::parse(None, None, None).is_err());
        assert!(SubscriptionFilter::parse(Some("  "), None, None).is_err());
        assert!(SubscriptionFilter::parse(Some("posts,memes"), None, None).is_err());
        assert!(SubscriptionFilter::parse(Some("posts,,news"), None, None).is_err());
        assert!(SubscriptionFilter::parse(Some("posts"), None, Some("gossip")).is_err());
    }

    #[test]
    fn test_parse_normalizes() {
        let f = SubscriptionFilter::parse(Some("Posts, trends"), Some(" US "), Some("Politics")).unwrap();
        assert_eq!(
            f.types.iter().copied().collect::<Vec<_>>(),
            vec![UpdateType::Posts, UpdateType::Trends]
        );
        assert_eq!(f.region.as_deref(), Some("us"));
        assert_eq!(f.category, Some(TopicCategory::Politics));
    }

    #[test]
    fn test_matches_type_region_category() {
        let f = SubscriptionFilter::parse(Some("posts"), Some("us"), Some("politics")).unwrap();
        assert!(f.matches(&envelope(UpdateType::Posts, Some("us"), Some(TopicCategory::Politics))));
        assert!(!f.matches(&envelope(UpdateType::News, Some("us"), Some(TopicCategory::Politics))));
        assert!(!f.matches(&envelope(UpdateType::Posts, Some("uk"), None)));
        assert!(!f.matches(&envelope(UpdateType::Posts, None, Some(TopicCategory::Sports))));
        // Facts without region or category pass.
        assert!(f.matches(&envelope(UpdateType::Posts, None, None)));
    }

    #[test]
    fn test_envelope_json_shape() {
        let v = serde_json::to_value(envelope(UpdateType::News, None, None)).unwrap();
        assert_eq!(v["type"], "news");
        assert_eq!(v["payload"]["kind"], "news");
        assert!(v.get("region").is_none());
    }
}
