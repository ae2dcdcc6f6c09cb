//! Stable ranking order for deterministic leaderboards.

use crate::domain::AccountId;
use std::cmp::Ordering;

/// Ordering key for leaderboard entries.
///
/// Ordering: score desc -> follower_count desc -> account_id asc. Every pair
/// of distinct accounts compares unequal, so ranks are a total order.
#[derive(Debug, Clone)]
pub struct RankKey {
    pub score: f64,
    pub follower_count: u64,
    pub account_id: AccountId,
}

impl RankKey {
    pub fn new(score: f64, follower_count: u64, account_id: AccountId) -> Self {
        // NaN would break the total order; treat it as the lowest score.
        let score = if score.is_nan() { f64::NEG_INFINITY } else { score };
        Self {
            score,
            follower_count,
            account_id,
        }
    }
}

impl PartialEq for RankKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RankKey {}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| other.follower_count.cmp(&self.follower_count))
            .then_with(|| self.account_id.cmp(&other.account_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(score: f64, followers: u64, id: &str) -> RankKey {
        RankKey::new(score, followers, AccountId::new(id))
    }

    #[test]
    fn test_higher_score_first() {
        assert!(key(10.0, 0, "b") < key(5.0, 100, "a"));
    }

    #[test]
    fn test_tie_broken_by_followers_then_id() {
        let mut keys = vec![key(1.0, 5, "c"), key(1.0, 9, "z"), key(1.0, 5, "a")];
        keys.sort();
        let ids: Vec<&str> = keys.iter().map(|k| k.account_id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a", "c"]);
    }

    #[test]
    fn test_nan_sorts_last() {
        let mut keys = vec![key(f64::NAN, 100, "a"), key(0.0, 0, "b")];
        keys.sort();
        assert_eq!(keys[0].account_id.as_str(), "b");
    }

    #[test]
    fn test_rank_key_determinism() {
        assert_eq!(key(3.5, 2, "x"), key(3.5, 2, "x"));
    }
}
