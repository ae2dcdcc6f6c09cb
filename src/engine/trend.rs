//! Time-bucketed topic counters and the trend projection.

use crate::config::TrendConfig;
use crate::domain::{TimeMs, Topic, TopicCategory, Trend, TrendKey, TrendSort, MS_PER_HOUR};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Number of co-mentioned topics reported per trend.
const RELATED_LIMIT: usize = 5;

/// One topic-tagged fact destined for a topic shard.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicContribution {
    pub key: TrendKey,
    pub at: TimeMs,
    pub weight: f64,
    /// Sentiment in [-1, 1].
    pub sentiment: f64,
    /// Controversy in [0, 100].
    pub controversy: f64,
    /// Political bias in [-1, 1].
    pub bias: f64,
    pub category: Option<TopicCategory>,
    pub related: Vec<Topic>,
}

/// One fixed-width bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendBucket {
    pub start: TimeMs,
    pub volume: f64,
    pub sentiment_sum: f64,
    pub controversy_sum: f64,
    pub bias_sum: f64,
}

impl TrendBucket {
    fn empty(start: TimeMs) -> Self {
        Self {
            start,
            volume: 0.0,
            sentiment_sum: 0.0,
            controversy_sum: 0.0,
            bias_sum: 0.0,
        }
    }
}

/// Bucket store for one (topic, region, language).
#[derive(Debug, Clone)]
pub struct TopicTrend {
    key: TrendKey,
    category: TopicCategory,
    buckets: VecDeque<TrendBucket>,
    /// Co-mention counts keyed by bucket start, retained with the buckets.
    related: BTreeMap<TimeMs, HashMap<Topic, u64>>,
    is_active: bool,
    first_seen: TimeMs,
    last_seen: TimeMs,
}

impl TopicTrend {
    pub fn new(key: TrendKey, at: TimeMs) -> Self {
        Self {
            key,
            category: TopicCategory::Other,
            buckets: VecDeque::new(),
            related: BTreeMap::new(),
            is_active: false,
            first_seen: at,
            last_seen: at,
        }
    }

    pub fn key(&self) -> &TrendKey {
        &self.key
    }

    pub fn category(&self) -> TopicCategory {
        self.category
    }

    pub fn last_seen(&self) -> TimeMs {
        self.last_seen
    }

    pub fn buckets(&self) -> impl Iterator<Item = &TrendBucket> {
        self.buckets.iter()
    }

    /// Fold one contribution and return the bucket it landed in.
    pub fn add(&mut self, c: &TopicContribution, config: &TrendConfig) -> TrendBucket {
        let width = bucket_width_ms(config);
        let start = c.at.floor_to(width);

        if let Some(category) = c.category {
            self.category = category;
        }
        if c.at < self.first_seen {
            self.first_seen = c.at;
        }
        if c.at > self.last_seen {
            self.last_seen = c.at;
        }
        for topic in c.related.iter().filter(|t| **t != self.key.topic) {
            *self
                .related
                .entry(start)
                .or_default()
                .entry(topic.clone())
                .or_insert(0) += 1;
        }

        let idx = match self.buckets.binary_search_by(|b| b.start.cmp(&start)) {
            Ok(idx) => idx,
            Err(idx) => {
                self.buckets.insert(idx, TrendBucket::empty(start));
                idx
            }
        };
        let bucket = &mut self.buckets[idx];
        bucket.volume += c.weight;
        bucket.sentiment_sum += c.sentiment * c.weight;
        bucket.controversy_sum += c.controversy * c.weight;
        bucket.bias_sum += c.bias * c.weight;
        let landed = bucket.clone();

        let newest = self.last_seen.floor_to(width);
        if start == newest && landed.volume >= config.volume_floor {
            self.is_active = true;
        }
        self.evict(config);
        landed
    }

    /// Apply hysteresis and retention at `now`. Returns true when the topic
    /// went from active to inactive.
    pub fn tick(&mut self, now: TimeMs, config: &TrendConfig) -> bool {
        let was_active = self.is_active;
        self.is_active = self.active_at(now, config);
        self.evict_before(now.minus(retention_ms(config)));
        was_active && !self.is_active
    }

    /// Active state at `now`: inactive after enough consecutive quiet buckets.
    pub fn active_at(&self, now: TimeMs, config: &TrendConfig) -> bool {
        self.is_active && self.quiet_streak(now, config) < config.inactive_after_buckets
    }

    /// Read-side projection over the window ending at `now`.
    pub fn project(&self, now: TimeMs, window_ms: i64, config: &TrendConfig) -> Trend {
        let start = now.minus(window_ms);
        let mut volume = 0.0;
        let mut sentiment = 0.0;
        let mut controversy = 0.0;
        let mut bias = 0.0;
        let mut peak: Option<&TrendBucket> = None;
        let first_bucket = start.floor_to(bucket_width_ms(config));
        for b in self
            .buckets
            .iter()
            .filter(|b| b.start >= first_bucket && b.start <= now)
        {
            volume += b.volume;
            sentiment += b.sentiment_sum;
            controversy += b.controversy_sum;
            bias += b.bias_sum;
            if peak.map_or(true, |p| b.volume > p.volume) {
                peak = Some(b);
            }
        }
        let avg = |sum: f64, lo: f64, hi: f64| {
            if volume > 0.0 {
                (sum / volume).clamp(lo, hi)
            } else {
                0.0
            }
        };
        let velocity = self.velocity(now, config);

        Trend {
            topic: self.key.topic.to_string(),
            region: self.key.region.clone(),
            language: self.key.language.clone(),
            category: self.category,
            volume,
            velocity,
            trending_score: (volume * config.volume_weight + velocity * config.velocity_weight)
                .max(0.0),
            sentiment: avg(sentiment, -1.0, 1.0),
            controversy_level: avg(controversy, 0.0, 100.0),
            political_bias: avg(bias, -1.0, 1.0),
            peak_time: peak.map_or(self.last_seen, |b| b.start),
            related_topics: self.related_topics(),
            is_active: self.active_at(now, config),
            first_seen: self.first_seen,
            last_seen: self.last_seen,
        }
    }

    /// Volume in the latest velocity window minus the window before, per hour.
    pub fn velocity(&self, now: TimeMs, config: &TrendConfig) -> f64 {
        let window = config.velocity_window.as_millis().max(1) as i64;
        let width = bucket_width_ms(config);
        let current_start = now.floor_to(width).plus(width).minus(window);
        let previous_start = current_start.minus(window);
        let mut current = 0.0;
        let mut previous = 0.0;
        for b in &self.buckets {
            if b.start >= current_start && b.start <= now {
                current += b.volume;
            } else if b.start >= previous_start && b.start < current_start {
                previous += b.volume;
            }
        }
        (current - previous) / (window as f64 / MS_PER_HOUR as f64)
    }

    fn related_topics(&self) -> Vec<String> {
        let mut counts: HashMap<&Topic, u64> = HashMap::new();
        for (topic, n) in self.related.values().flatten() {
            *counts.entry(topic).or_insert(0) += n;
        }
        let mut related: Vec<(&Topic, u64)> = counts.into_iter().collect();
        related.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        related
            .into_iter()
            .take(RELATED_LIMIT)
            .map(|(t, _)| t.to_string())
            .collect()
    }

    /// Consecutive buckets, ending with the one containing `now`, below the floor.
    fn quiet_streak(&self, now: TimeMs, config: &TrendConfig) -> u32 {
        let width = bucket_width_ms(config);
        let mut cursor = now.floor_to(width);
        let mut streak = 0;
        while streak < config.inactive_after_buckets {
            let volume = self
                .buckets
                .binary_search_by(|b| b.start.cmp(&cursor))
                .map(|idx| self.buckets[idx].volume)
                .unwrap_or(0.0);
            if volume >= config.volume_floor {
                break;
            }
            streak += 1;
            cursor = cursor.minus(width);
        }
        streak
    }

    fn evict(&mut self, config: &TrendConfig) {
        let horizon = self.last_seen.minus(retention_ms(config));
        self.evict_before(horizon);
    }

    fn evict_before(&mut self, horizon: TimeMs) {
        while self.buckets.front().is_some_and(|b| b.start < horizon) {
            self.buckets.pop_front();
        }
        self.related = self.related.split_off(&horizon);
    }
}

fn bucket_width_ms(config: &TrendConfig) -> i64 {
    config.bucket_width.as_millis().max(1) as i64
}

fn retention_ms(config: &TrendConfig) -> i64 {
    config.retention.as_millis() as i64
}

/// Sort trends in place; ties are broken by topic name.
pub fn sort_trends(trends: &mut [Trend], sort: TrendSort) {
    trends.sort_by(|a, b| {
        let primary = match sort {
            TrendSort::Score => b.trending_score.total_cmp(&a.trending_score),
            TrendSort::Volume => b.volume.total_cmp(&a.volume),
            TrendSort::Velocity => b.velocity.total_cmp(&a.velocity),
        };
        primary
            .then_with(|| a.topic.cmp(&b.topic))
            .then_with(|| a.region.cmp(&b.region))
            .then_with(|| a.language.cmp(&b.language))
    });
}

/// Whether `window_ms` fits inside the retained buckets.
pub fn window_within_retention(window_ms: i64, config: &TrendConfig) -> bool {
    window_ms <= retention_ms(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MS_PER_MINUTE, Timeframe};

    const T0: i64 = 1_700_000_100_000;

    fn key(topic: &str) -> TrendKey {
        TrendKey {
            topic: Topic::normalize(topic).unwrap(),
            region: String::new(),
            language: String::new(),
        }
    }

    fn mention(topic: &str, offset_ms: i64) -> TopicContribution {
        TopicContribution {
            key: key(topic),
            at: TimeMs::new(T0 + offset_ms),
            weight: 1.0,
            sentiment: 0.5,
            controversy: 20.0,
            bias: 0.0,
            category: Some(TopicCategory::Politics),
            related: vec![],
        }
    }

    #[test]
    fn test_burst_of_mentions_scores_above_fifty() {
        let cfg = TrendConfig::default();
        let mut trend = TopicTrend::new(key("#vote"), TimeMs::new(T0));
        for i in 0..9 {
            trend.add(&mention("vote", i * 5 * MS_PER_MINUTE), &cfg);
        }
        let now = TimeMs::new(T0 + 40 * MS_PER_MINUTE);
        let t = trend.project(now, Timeframe::Hour.window_ms(), &cfg);
        assert_eq!(t.volume, 9.0);
        assert_eq!(t.velocity, 9.0);
        assert_eq!(t.trending_score, 63.0);
        assert!(t.is_active);
        assert_eq!(t.category, TopicCategory::Politics);
        assert!((t.sentiment - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_velocity_negative_when_cooling() {
        let cfg = TrendConfig::default();
        let mut trend = TopicTrend::new(key("vote"), TimeMs::new(T0));
        for i in 0..4 {
            trend.add(&mention("vote", i * MS_PER_MINUTE), &cfg);
        }
        let later = TimeMs::new(T0 + 90 * MS_PER_MINUTE);
        assert!(trend.velocity(later, &cfg) < 0.0);
    }

    #[test]
    fn test_goes_inactive_after_quiet_buckets_and_reactivates() {
        let cfg = TrendConfig::default();
        let mut trend = TopicTrend::new(key("vote"), TimeMs::new(T0));
        trend.add(&mention("vote", 0), &cfg);
        assert!(trend.active_at(TimeMs::new(T0), &cfg));

        // Five quiet buckets after the active one: still active.
        let five = TimeMs::new(T0 + 5 * 5 * MS_PER_MINUTE);
        assert!(trend.active_at(five, &cfg));

        let seven = TimeMs::new(T0 + 7 * 5 * MS_PER_MINUTE);
        assert!(trend.tick(seven, &cfg));
        assert!(!trend.active_at(seven, &cfg));

        trend.add(&mention("vote", 8 * 5 * MS_PER_MINUTE), &cfg);
        assert!(trend.active_at(TimeMs::new(T0 + 8 * 5 * MS_PER_MINUTE), &cfg));
    }

    #[test]
    fn test_related_topics_ranked_by_co_mentions() {
        let cfg = TrendConfig::default();
        let mut trend = TopicTrend::new(key("vote"), TimeMs::new(T0));
        let mut c = mention("vote", 0);
        c.related = vec![Topic::normalize("poll").unwrap(), Topic::normalize("senate").unwrap()];
        trend.add(&c, &cfg);
        c.related = vec![Topic::normalize("senate").unwrap(), Topic::normalize("vote").unwrap()];
        trend.add(&c, &cfg);
        let t = trend.project(TimeMs::new(T0), MS_PER_HOUR, &cfg);
        assert_eq!(t.related_topics, vec!["senate".to_string(), "poll".to_string()]);
    }

    #[test]
    fn test_buckets_older_than_retention_evicted() {
        let cfg = TrendConfig::default();
        let mut trend = TopicTrend::new(key("vote"), TimeMs::new(T0));
        trend.add(&mention("vote", 0), &cfg);
        trend.add(&mention("vote", 25 * MS_PER_HOUR), &cfg);
        assert_eq!(trend.buckets().count(), 1);
    }

    #[test]
    fn test_related_topics_expire_with_their_buckets() {
        let cfg = TrendConfig::default();
        let mut trend = TopicTrend::new(key("vote"), TimeMs::new(T0));
        let mut old = mention("vote", 0);
        old.related = vec![Topic::normalize("poll").unwrap()];
        trend.add(&old, &cfg);
        trend.add(&old, &cfg);

        let mut fresh = mention("vote", 25 * MS_PER_HOUR);
        fresh.related = vec![Topic::normalize("senate").unwrap()];
        trend.add(&fresh, &cfg);
        assert_eq!(trend.related.len(), 1);
        let t = trend.project(TimeMs::new(T0 + 25 * MS_PER_HOUR), MS_PER_HOUR, &cfg);
        assert_eq!(t.related_topics, vec!["senate".to_string()]);

        trend.tick(TimeMs::new(T0 + 50 * MS_PER_HOUR), &cfg);
        assert!(trend.related.is_empty());
        assert_eq!(trend.buckets().count(), 0);
    }

    #[test]
    fn test_sort_ties_by_topic() {
        let cfg = TrendConfig::default();
        let now = TimeMs::new(T0);
        let mut a = TopicTrend::new(key("beta"), now);
        a.add(&mention("beta", 0), &cfg);
        let mut b = TopicTrend::new(key("alpha"), now);
        b.add(&mention("alpha", 0), &cfg);
        let mut trends = vec![a.project(now, MS_PER_HOUR, &cfg), b.project(now, MS_PER_HOUR, &cfg)];
        sort_trends(&mut trends, TrendSort::Score);
        assert_eq!(trends[0].topic, "alpha");
        assert!(window_within_retention(MS_PER_HOUR, &cfg));
        assert!(!window_within_retention(Timeframe::Week.window_ms(), &cfg));
    }
}
