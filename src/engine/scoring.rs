//! Scoring formulas. Everything here is a pure function of its inputs.

use crate::config::ScoringConfig;

/// Saturating normalization onto [0, 100): `100 * (1 - e^(-x/scale))`.
pub fn saturate(x: f64, scale: f64) -> f64 {
    if x <= 0.0 || !x.is_finite() {
        return 0.0;
    }
    100.0 * (1.0 - (-x / scale.max(f64::EPSILON)).exp())
}

/// Weighted engagement counts for one window (decay already applied).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngagementCounts {
    pub likes: f64,
    pub comments: f64,
    pub reposts: f64,
    pub impressions: f64,
}

impl EngagementCounts {
    pub fn weighted(&self, cfg: &ScoringConfig) -> f64 {
        cfg.like_weight * self.likes
            + cfg.comment_weight * self.comments
            + cfg.repost_weight * self.reposts
    }
}

/// `100 * weighted / max(impressions, 1)`, clamped to [0, 100].
pub fn engagement_rate(counts: &EngagementCounts, cfg: &ScoringConfig) -> f64 {
    let rate = 100.0 * counts.weighted(cfg) / counts.impressions.max(1.0);
    rate.clamp(0.0, 100.0)
}

/// Weight of an amplifier at repost-chain `depth`; zero beyond the hop limit.
pub fn amplification_weight(depth: u8, cfg: &ScoringConfig) -> f64 {
    let depth = depth.max(1);
    if depth > cfg.max_amplification_hops {
        return 0.0;
    }
    cfg.amplification_decay.powi(i32::from(depth) - 1)
}

/// Reach an amplifier contributes: its audience plus itself, scaled by hop depth.
pub fn amplifier_reach(amplifier_followers: u64, depth: u8, cfg: &ScoringConfig) -> f64 {
    (amplifier_followers as f64 + 1.0) * amplification_weight(depth, cfg)
}

/// `followers * factor + Σ amplifier reach`.
pub fn reach_score(follower_count: u64, amplified_reach: f64, cfg: &ScoringConfig) -> f64 {
    follower_count as f64 * cfg.follower_engagement_factor + amplified_reach.max(0.0)
}

/// Inputs to the virality score of one post.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpreadStats {
    /// Reposts per hour.
    pub velocity: f64,
    pub unique_engagers: u64,
    pub follower_count: u64,
    pub amplified_reach: f64,
    pub original_reach: f64,
}

impl SpreadStats {
    pub fn breadth(&self) -> f64 {
        self.unique_engagers as f64 / (self.follower_count.max(1)) as f64
    }

    /// `Σ amplifier reach / original reach`.
    pub fn amplification_factor(&self) -> f64 {
        self.amplified_reach / self.original_reach.max(1.0)
    }
}

/// Normalized combination of velocity, breadth and amplification, in [0, 100).
pub fn virality_score(stats: &SpreadStats, cfg: &ScoringConfig) -> f64 {
    let velocity = saturate(stats.velocity, cfg.velocity_scale);
    let breadth = saturate(stats.breadth(), cfg.breadth_scale);
    let amplification = saturate(stats.amplification_factor(), cfg.amplification_scale);
    0.4 * velocity + 0.3 * breadth + 0.3 * amplification
}

/// `1 - |positive - negative| / total`; zero when there is no polar engagement.
pub fn polarization(positive: f64, negative: f64) -> f64 {
    let total = positive + negative;
    if total <= 0.0 {
        return 0.0;
    }
    1.0 - (positive - negative).abs() / total
}

/// `100 * polarization * weight`, clamped to [0, 100].
pub fn controversy_score(positive: f64, negative: f64, cfg: &ScoringConfig) -> f64 {
    (100.0 * polarization(positive, negative) * cfg.controversy_weight).clamp(0.0, 100.0)
}

/// Share of positive engagement, 50 when nothing polar has happened yet.
pub fn approval_rating(positive: f64, negative: f64) -> f64 {
    let total = positive + negative;
    if total <= 0.0 {
        50.0
    } else {
        100.0 * positive / total
    }
}

/// Components feeding the overall influence score.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InfluenceInputs {
    pub engagement_rate: f64,
    pub reach: f64,
    pub virality: f64,
    pub controversy: f64,
    pub decay_factor: f64,
}

/// Weighted sum of the components, multiplied by the decay factor.
pub fn influence_score(inputs: &InfluenceInputs, cfg: &ScoringConfig) -> f64 {
    let reach = saturate(inputs.reach, cfg.reach_scale);
    let raw = cfg.engagement_weight * inputs.engagement_rate
        + cfg.reach_weight * reach
        + cfg.virality_weight * inputs.virality
        + cfg.controversy_penalty_weight * (100.0 - inputs.controversy);
    (raw * inputs.decay_factor).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ScoringConfig {
        ScoringConfig::default()
    }

    #[test]
    fn test_weights_order_comment_repost_like() {
        let c = cfg();
        assert!(c.comment_weight > c.repost_weight && c.repost_weight > c.like_weight);
    }

    #[test]
    fn test_engagement_rate_clamped_and_guarded() {
        let counts = EngagementCounts {
            likes: 500.0,
            ..Default::default()
        };
        assert_eq!(engagement_rate(&counts, &cfg()), 100.0);

        let counts = EngagementCounts {
            likes: 2.0,
            comments: 1.0,
            reposts: 1.0,
            impressions: 100.0,
        };
        assert!((engagement_rate(&counts, &cfg()) - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_second_degree_amplification_weighs_less() {
        let c = cfg();
        assert!(amplification_weight(2, &c) < amplification_weight(1, &c));
        assert_eq!(amplification_weight(3, &c), 0.0);
        assert_eq!(amplifier_reach(9, 1, &c), 10.0);
    }

    #[test]
    fn test_even_split_more_controversial_than_one_sided() {
        let c = cfg();
        let split = controversy_score(6.0, 4.0, &c);
        let one_sided = controversy_score(7.0, 0.0, &c);
        assert!((split - 80.0).abs() < 1e-9);
        assert_eq!(one_sided, 0.0);
        assert!(split > one_sided);
    }

    #[test]
    fn test_virality_of_heavily_amplified_post() {
        let stats = SpreadStats {
            velocity: 15.0,
            unique_engagers: 5,
            follower_count: 0,
            amplified_reach: 15.0,
            original_reach: 1.0,
        };
        assert!(virality_score(&stats, &cfg()) > 80.0);
        assert!(stats.amplification_factor() > 1.0);
    }

    #[test]
    fn test_influence_respects_decay_factor() {
        let inputs = InfluenceInputs {
            engagement_rate: 40.0,
            reach: 100.0,
            virality: 10.0,
            controversy: 20.0,
            decay_factor: 1.0,
        };
        let full = influence_score(&inputs, &cfg());
        let half = influence_score(
            &InfluenceInputs {
                decay_factor: 0.5,
                ..inputs
            },
            &cfg(),
        );
        assert!(full > 0.0);
        assert!((half - full / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_approval_default_is_neutral() {
        assert_eq!(approval_rating(0.0, 0.0), 50.0);
        assert_eq!(approval_rating(3.0, 1.0), 75.0);
    }
}
