//! Append-only influence history with cadence and delta-triggered snapshots.

use crate::config::HistoryConfig;
use crate::domain::{
    AccountId, ContributingFactors, Granularity, InfluenceHistoryPoint, InfluenceMetrics, TimeMs,
    TrendDirection, MS_PER_DAY,
};
use dashmap::DashMap;

/// In-memory history, one ascending series per account.
///
/// Each series is appended to only by the shard that owns the account; reads
/// clone the requested slice, so queries can be retried freely.
#[derive(Debug, Default)]
pub struct HistoryStore {
    series: DashMap<AccountId, Vec<InfluenceHistoryPoint>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a snapshot if the cadence has elapsed or the score moved past the
    /// delta threshold. Returns the appended point.
    pub fn maybe_record(
        &self,
        metrics: &InfluenceMetrics,
        factors: &ContributingFactors,
        config: &HistoryConfig,
    ) -> Option<InfluenceHistoryPoint> {
        let mut series = self.series.entry(metrics.account_id.clone()).or_default();
        let at = metrics.last_updated;

        let due = match series.last() {
            None => true,
            Some(last) if at <= last.timestamp => false,
            Some(last) => {
                let interval = config.snapshot_interval.as_millis() as i64;
                at.since(last.timestamp) >= interval
                    || (metrics.influence_score - last.score).abs() > config.delta_threshold
            }
        };
        if !due {
            return None;
        }

        let point = InfluenceHistoryPoint {
            account_id: metrics.account_id.clone(),
            timestamp: at,
            score: metrics.influence_score,
            follower_count: metrics.follower_count,
            engagement_rate: metrics.engagement_rate,
            contributing_factors: factors.clone(),
        };
        series.push(point.clone());

        let horizon = at.minus(config.retention.as_millis() as i64);
        let stale = series.partition_point(|p| p.timestamp < horizon);
        if stale > 0 {
            series.drain(..stale);
        }
        Some(point)
    }

    /// Insert a previously persisted point, keeping the series ascending.
    pub fn restore(&self, point: InfluenceHistoryPoint) {
        let mut series = self.series.entry(point.account_id.clone()).or_default();
        match series.binary_search_by(|p| p.timestamp.cmp(&point.timestamp)) {
            Ok(_) => {}
            Err(idx) => series.insert(idx, point),
        }
    }

    /// Points in `[now - window, now]`, keeping the last point per granularity
    /// bucket. Unknown accounts yield an empty series.
    pub fn query(
        &self,
        account_id: &AccountId,
        now: TimeMs,
        window_ms: i64,
        granularity: Granularity,
    ) -> Vec<InfluenceHistoryPoint> {
        let Some(series) = self.series.get(account_id) else {
            return Vec::new();
        };
        let start = now.minus(window_ms);
        let width = granularity.bucket_ms();

        let mut out: Vec<InfluenceHistoryPoint> = Vec::new();
        for point in series.iter().filter(|p| p.timestamp >= start && p.timestamp <= now) {
            let bucket = point.timestamp.floor_to(width);
            match out.last_mut() {
                Some(last) if last.timestamp.floor_to(width) == bucket => *last = point.clone(),
                _ => out.push(point.clone()),
            }
        }
        out
    }

    pub fn len(&self, account_id: &AccountId) -> usize {
        self.series.get(account_id).map_or(0, |s| s.len())
    }
}

/// Classify a series by its least-squares slope in score per day.
pub fn classify(points: &[InfluenceHistoryPoint], tolerance: f64) -> TrendDirection {
    let slope = regression_slope(points);
    if slope.abs() <= tolerance {
        TrendDirection::Stable
    } else if slope > 0.0 {
        TrendDirection::Increasing
    } else {
        TrendDirection::Decreasing
    }
}

/// Score change per day. Zero with fewer than two distinct timestamps.
pub fn regression_slope(points: &[InfluenceHistoryPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let origin = points[0].timestamp.as_ms();
    let xs: Vec<f64> = points
        .iter()
        .map(|p| (p.timestamp.as_ms() - origin) as f64 / MS_PER_DAY as f64)
        .collect();
    let n = points.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.score).sum::<f64>() / n;

    let mut num = 0.0;
    let mut den = 0.0;
    for (x, p) in xs.iter().zip(points) {
        num += (x - mean_x) * (p.score - mean_y);
        den += (x - mean_x) * (x - mean_x);
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PersonaType, MS_PER_HOUR};

    fn metrics(at: i64, score: f64) -> InfluenceMetrics {
        let mut m = InfluenceMetrics::empty(AccountId::new("alice"), PersonaType::Journalist, TimeMs::new(at));
        m.influence_score = score;
        m
    }

    fn record(store: &HistoryStore, at: i64, score: f64) -> bool {
        store
            .maybe_record(&metrics(at, score), &ContributingFactors::default(), &HistoryConfig::default())
            .is_some()
    }

    #[test]
    fn test_cadence_and_delta_snapshots() {
        let store = HistoryStore::new();
        assert!(record(&store, 0, 10.0));
        // Small change inside the hour: skipped.
        assert!(!record(&store, 10 * 60_000, 12.0));
        // Large change: immediate snapshot.
        assert!(record(&store, 20 * 60_000, 30.0));
        // Hour elapsed: snapshot regardless of delta.
        assert!(record(&store, 20 * 60_000 + MS_PER_HOUR, 30.0));
        assert_eq!(store.len(&AccountId::new("alice")), 3);
    }

    #[test]
    fn test_query_downsamples_and_is_restartable() {
        let store = HistoryStore::new();
        for h in 0..48 {
            record(&store, h * MS_PER_HOUR, h as f64);
        }
        let id = AccountId::new("alice");
        let now = TimeMs::new(47 * MS_PER_HOUR);
        let hourly = store.query(&id, now, 7 * MS_PER_DAY, Granularity::Hour);
        assert_eq!(hourly.len(), 48);
        let daily = store.query(&id, now, 7 * MS_PER_DAY, Granularity::Day);
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].score, 23.0);
        assert_eq!(store.query(&id, now, 7 * MS_PER_DAY, Granularity::Day), daily);
        assert!(daily.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_unknown_account_is_empty() {
        let store = HistoryStore::new();
        assert!(store
            .query(&AccountId::new("nobody"), TimeMs::new(0), MS_PER_DAY, Granularity::Hour)
            .is_empty());
    }

    #[test]
    fn test_classification_from_slope() {
        let store = HistoryStore::new();
        for d in 0..5 {
            record(&store, d * MS_PER_DAY, 10.0 + 5.0 * d as f64);
        }
        let id = AccountId::new("alice");
        let points = store.query(&id, TimeMs::new(4 * MS_PER_DAY), 30 * MS_PER_DAY, Granularity::Day);
        assert!((regression_slope(&points) - 5.0).abs() < 1e-9);
        assert_eq!(classify(&points, 0.5), TrendDirection::Increasing);
        assert_eq!(classify(&points[..1], 0.5), TrendDirection::Stable);
    }

    #[test]
    fn test_retention_prunes_old_points() {
        let store = HistoryStore::new();
        let config = HistoryConfig::default();
        store.maybe_record(&metrics(0, 1.0), &ContributingFactors::default(), &config);
        store.maybe_record(&metrics(91 * MS_PER_DAY, 1.0), &ContributingFactors::default(), &config);
        assert_eq!(store.len(&AccountId::new("alice")), 1);
    }
}
