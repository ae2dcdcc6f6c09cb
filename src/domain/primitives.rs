//! Domain primitives: TimeMs, AccountId, Topic, Region.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const MS_PER_MINUTE: i64 = 60_000;
pub const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
pub const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Time in milliseconds since Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        TimeMs(chrono::Utc::now().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_ms(&self) -> i64 {
        self.0
    }

    /// Milliseconds elapsed from `earlier` to `self`, never negative.
    pub fn since(&self, earlier: TimeMs) -> i64 {
        self.0.saturating_sub(earlier.0).max(0)
    }

    pub fn minus(&self, ms: i64) -> TimeMs {
        TimeMs(self.0.saturating_sub(ms))
    }

    pub fn plus(&self, ms: i64) -> TimeMs {
        TimeMs(self.0.saturating_add(ms))
    }

    /// Floor this timestamp to a multiple of `width_ms`.
    pub fn floor_to(&self, width_ms: i64) -> TimeMs {
        if width_ms <= 0 {
            return *self;
        }
        TimeMs(self.0.div_euclid(width_ms) * width_ms)
    }
}

impl std::fmt::Display for TimeMs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque account identifier issued by the account service.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        AccountId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid identifier: {0}")]
pub struct IdParseError(pub String);

impl FromStr for AccountId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty()
            || trimmed.len() > 128
            || !trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
        {
            return Err(IdParseError(s.to_string()));
        }
        Ok(AccountId(trimmed.to_string()))
    }
}

/// Normalized topic / hashtag: lowercase, no leading `#`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(pub String);

impl Topic {
    /// Normalize a raw topic string. Returns None for blank input.
    pub fn normalize(raw: &str) -> Option<Topic> {
        let t = raw.trim().trim_start_matches('#').trim().to_lowercase();
        if t.is_empty() {
            None
        } else {
            Some(Topic(t))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lowercased region or language tag. Empty means "global".
pub fn normalize_tag(raw: Option<&str>) -> String {
    raw.map(|s| s.trim().to_lowercase()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timems_ordering() {
        let t1 = TimeMs::new(1000);
        let t2 = TimeMs::new(2000);
        assert!(t1 < t2);
        assert_eq!(t2.since(t1), 1000);
        assert_eq!(t1.since(t2), 0);
    }

    #[test]
    fn test_floor_to_bucket() {
        assert_eq!(TimeMs::new(601_234).floor_to(300_000), TimeMs::new(600_000));
        assert_eq!(TimeMs::new(-1).floor_to(300_000), TimeMs::new(-300_000));
    }

    #[test]
    fn test_account_id_parse() {
        assert_eq!(
            AccountId::from_str(" acct-1 ").unwrap(),
            AccountId::new("acct-1")
        );
        assert!(AccountId::from_str("").is_err());
        assert!(AccountId::from_str("has space").is_err());
    }

    #[test]
    fn test_topic_normalize() {
        assert_eq!(Topic::normalize("#Election2024").unwrap().as_str(), "election2024");
        assert!(Topic::normalize("  # ").is_none());
    }
}
