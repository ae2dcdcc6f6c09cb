//! Canonical engagement events.
//!
//! Events are immutable facts. Each one belongs to exactly one shard key and
//! carries a sequence number that is strictly increasing within that shard.

use crate::domain::{AccountId, TimeMs, Topic, TopicCategory};
use serde::{Deserialize, Serialize};

/// Kind of reaction left on a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Like,
    Love,
    Laugh,
    Dislike,
    Angry,
    Repost,
}

/// Polarity of an engagement for controversy and approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
    Neutral,
}

impl ReactionKind {
    pub fn polarity(&self) -> Polarity {
        match self {
            ReactionKind::Like | ReactionKind::Love | ReactionKind::Laugh => Polarity::Positive,
            ReactionKind::Dislike | ReactionKind::Angry => Polarity::Negative,
            ReactionKind::Repost => Polarity::Neutral,
        }
    }

    pub fn is_repost(&self) -> bool {
        matches!(self, ReactionKind::Repost)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReactionKind::Like => "like",
            ReactionKind::Love => "love",
            ReactionKind::Laugh => "laugh",
            ReactionKind::Dislike => "dislike",
            ReactionKind::Angry => "angry",
            ReactionKind::Repost => "repost",
        }
    }
}

/// Sentiment scalar to polarity; exact zero is neutral.
pub fn sentiment_polarity(sentiment: f64) -> Polarity {
    if sentiment > 0.0 {
        Polarity::Positive
    } else if sentiment < 0.0 {
        Polarity::Negative
    } else {
        Polarity::Neutral
    }
}

/// Type-specific event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventPayload {
    /// `actor` published post `subject`.
    #[serde(rename_all = "camelCase")]
    PostPublished {
        #[serde(default)]
        topics: Vec<String>,
        #[serde(default)]
        category: Option<TopicCategory>,
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        language: Option<String>,
        /// Audience estimate; defaults to the author's follower count.
        #[serde(default)]
        impressions: Option<u64>,
    },
    /// `actor` reacted to post `subject` written by `author_id`.
    #[serde(rename_all = "camelCase")]
    ReactionAdded {
        author_id: AccountId,
        kind: ReactionKind,
        /// Repost-chain depth, 1 = direct repost of the original.
        #[serde(default)]
        depth: Option<u8>,
        #[serde(default)]
        topics: Vec<String>,
        #[serde(default)]
        region: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ReactionRemoved {
        author_id: AccountId,
        kind: ReactionKind,
    },
    /// `actor` followed (or unfollowed) account `subject`.
    #[serde(rename_all = "camelCase")]
    FollowChanged { followed: bool },
    #[serde(rename_all = "camelCase")]
    CommentAdded {
        author_id: AccountId,
        #[serde(default)]
        sentiment: f64,
        #[serde(default)]
        topics: Vec<String>,
        #[serde(default)]
        region: Option<String>,
    },
    /// `actor` mentioned topic `subject`.
    #[serde(rename_all = "camelCase")]
    TopicMentioned {
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        language: Option<String>,
        #[serde(default)]
        category: Option<TopicCategory>,
        #[serde(default)]
        sentiment: f64,
        #[serde(default)]
        related_topics: Vec<String>,
    },
}

/// Discriminant of [`EventPayload`], used for logging and persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PostPublished,
    ReactionAdded,
    ReactionRemoved,
    FollowChanged,
    CommentAdded,
    TopicMentioned,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PostPublished => "postPublished",
            EventKind::ReactionAdded => "reactionAdded",
            EventKind::ReactionRemoved => "reactionRemoved",
            EventKind::FollowChanged => "followChanged",
            EventKind::CommentAdded => "commentAdded",
            EventKind::TopicMentioned => "topicMentioned",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partition that owns an event.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShardKey {
    Account(AccountId),
    Topic(Topic),
}

impl ShardKey {
    /// Stable string form, e.g. `account:alice` or `topic:election`.
    pub fn as_key(&self) -> String {
        match self {
            ShardKey::Account(id) => format!("account:{}", id),
            ShardKey::Topic(t) => format!("topic:{}", t),
        }
    }

    /// Deterministic worker index for this key.
    pub fn shard_index(&self, shard_count: usize) -> usize {
        use sha2::{Digest, Sha256};

        if shard_count <= 1 {
            return 0;
        }
        let digest = Sha256::digest(self.as_key().as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(prefix) % shard_count as u64) as usize
    }
}

impl std::fmt::Display for ShardKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_key())
    }
}

/// An engagement fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub seq: u64,
    pub timestamp: TimeMs,
    pub actor_id: AccountId,
    /// Post id, followed account id, or raw topic, depending on the payload.
    pub subject_id: String,
    /// Pre-computed controversy scalar in [0, 100].
    #[serde(default)]
    pub controversy_hint: Option<f64>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::PostPublished { .. } => EventKind::PostPublished,
            EventPayload::ReactionAdded { .. } => EventKind::ReactionAdded,
            EventPayload::ReactionRemoved { .. } => EventKind::ReactionRemoved,
            EventPayload::FollowChanged { .. } => EventKind::FollowChanged,
            EventPayload::CommentAdded { .. } => EventKind::CommentAdded,
            EventPayload::TopicMentioned { .. } => EventKind::TopicMentioned,
        }
    }

    /// The shard owning this event, or None if the subject cannot be keyed.
    pub fn shard_key(&self) -> Option<ShardKey> {
        match &self.payload {
            EventPayload::PostPublished { .. } => Some(ShardKey::Account(self.actor_id.clone())),
            EventPayload::ReactionAdded { author_id, .. }
            | EventPayload::ReactionRemoved { author_id, .. }
            | EventPayload::CommentAdded { author_id, .. } => {
                Some(ShardKey::Account(author_id.clone()))
            }
            EventPayload::FollowChanged { .. } => {
                let subject = self.subject_id.trim();
                (!subject.is_empty()).then(|| ShardKey::Account(AccountId::new(subject)))
            }
            EventPayload::TopicMentioned { .. } => {
                Topic::normalize(&self.subject_id).map(ShardKey::Topic)
            }
        }
    }

    /// Topics this event is tagged with, normalized and deduplicated.
    pub fn topics(&self) -> Vec<Topic> {
        let raw: Vec<&String> = match &self.payload {
            EventPayload::PostPublished { topics, .. }
            | EventPayload::ReactionAdded { topics, .. }
            | EventPayload::CommentAdded { topics, .. } => topics.iter().collect(),
            EventPayload::TopicMentioned { .. } => vec![&self.subject_id],
            EventPayload::ReactionRemoved { .. } | EventPayload::FollowChanged { .. } => Vec::new(),
        };
        let mut topics: Vec<Topic> = raw.into_iter().filter_map(|t| Topic::normalize(t)).collect();
        topics.sort();
        topics.dedup();
        topics
    }

    /// Stable idempotency key for the persisted event log.
    pub fn event_key(&self) -> Option<String> {
        use sha2::{Digest, Sha256};

        let shard = self.shard_key()?;
        let mut hasher = Sha256::new();
        hasher.update(shard.as_key());
        hasher.update(self.seq.to_le_bytes());
        let hash = hasher.finalize();
        Some(format!("evt:{}", hex::encode(&hash[..16])))
    }

    /// Structural validation performed before any state change.
    pub fn validate(&self) -> Result<(), String> {
        if self.actor_id.as_str().trim().is_empty() {
            return Err("actorId is required".to_string());
        }
        if self.subject_id.trim().is_empty() {
            return Err("subjectId is required".to_string());
        }
        if let Some(hint) = self.controversy_hint {
            if !hint.is_finite() || !(0.0..=100.0).contains(&hint) {
                return Err("controversyHint must be within [0, 100]".to_string());
            }
        }
        match &self.payload {
            EventPayload::ReactionAdded { depth: Some(0), .. } => {
                return Err("depth must be >= 1".to_string());
            }
            EventPayload::CommentAdded { sentiment, .. }
            | EventPayload::TopicMentioned { sentiment, .. } => {
                if !sentiment.is_finite() || !(-1.0..=1.0).contains(sentiment) {
                    return Err("sentiment must be within [-1, 1]".to_string());
                }
            }
            EventPayload::FollowChanged { .. } => {
                if self.actor_id.as_str() == self.subject_id.trim() {
                    return Err("an account cannot follow itself".to_string());
                }
            }
            _ => {}
        }
        if self.shard_key().is_none() {
            return Err("event subject does not map to a shard".to_string());
        }
        Ok(())
    }
}
