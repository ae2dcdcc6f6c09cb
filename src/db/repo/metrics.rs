//! Derived state: current metrics, history points and trend buckets.

use crate::domain::{
    AccountId, ContributingFactors, InfluenceHistoryPoint, InfluenceMetrics, TimeMs,
    TopicCategory, TrendKey,
};
use crate::engine::TrendBucket;
use sqlx::Row;

use super::{Repository, StoreError};

impl Repository {
    /// Replace the stored metrics of one account.
    pub async fn upsert_metrics(&self, metrics: &InfluenceMetrics) -> Result<(), StoreError> {
        let body = serde_json::to_string(metrics)?;
        sqlx::query(
            r#"
            INSERT INTO current_metrics (
                account_id, persona_type, influence_score, follower_count, last_updated, body
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(account_id) DO UPDATE SET
                persona_type = excluded.persona_type,
                influence_score = excluded.influence_score,
                follower_count = excluded.follower_count,
                last_updated = excluded.last_updated,
                body = excluded.body
            "#,
        )
        .bind(metrics.account_id.as_str())
        .bind(metrics.persona_type.as_str())
        .bind(metrics.influence_score)
        .bind(metrics.follower_count as i64)
        .bind(metrics.last_updated.as_ms())
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn query_metrics(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<InfluenceMetrics>, StoreError> {
        let row = sqlx::query("SELECT body FROM current_metrics WHERE account_id = ?")
            .bind(account_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let body: String = row.get("body");
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    /// Append one history point. Existing points are never rewritten.
    pub async fn insert_history_point(&self, point: &InfluenceHistoryPoint) -> Result<(), StoreError> {
        let factors = serde_json::to_string(&point.contributing_factors)?;
        sqlx::query(
            r#"
            INSERT INTO influence_history (
                account_id, timestamp_ms, score, follower_count, engagement_rate, factors
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(account_id, timestamp_ms) DO NOTHING
            "#,
        )
        .bind(point.account_id.as_str())
        .bind(point.timestamp.as_ms())
        .bind(point.score)
        .bind(point.follower_count as i64)
        .bind(point.engagement_rate)
        .bind(factors)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// History of one account, ascending by timestamp.
    pub async fn query_history(
        &self,
        account_id: &AccountId,
    ) -> Result<Vec<InfluenceHistoryPoint>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp_ms, score, follower_count, engagement_rate, factors
            FROM influence_history
            WHERE account_id = ?
            ORDER BY timestamp_ms ASC
            "#,
        )
        .bind(account_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<InfluenceHistoryPoint, StoreError> {
                let factors: String = row.get("factors");
                let follower_count: i64 = row.get("follower_count");
                Ok(InfluenceHistoryPoint {
                    account_id: account_id.clone(),
                    timestamp: TimeMs::new(row.get("timestamp_ms")),
                    score: row.get("score"),
                    follower_count: follower_count.max(0) as u64,
                    engagement_rate: row.get("engagement_rate"),
                    contributing_factors: serde_json::from_str::<ContributingFactors>(&factors)?,
                })
            })
            .collect()
    }

    /// Write the running totals of one trend bucket.
    pub async fn upsert_trend_bucket(
        &self,
        key: &TrendKey,
        category: TopicCategory,
        bucket: &TrendBucket,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO trend_buckets (
                topic, region, language, bucket_start, category,
                volume, sentiment_sum, controversy_sum, bias_sum
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(topic, region, language, bucket_start) DO UPDATE SET
                category = excluded.category,
                volume = excluded.volume,
                sentiment_sum = excluded.sentiment_sum,
                controversy_sum = excluded.controversy_sum,
                bias_sum = excluded.bias_sum
            "#,
        )
        .bind(key.topic.as_str())
        .bind(key.region.as_str())
        .bind(key.language.as_str())
        .bind(bucket.start.as_ms())
        .bind(category.as_str())
        .bind(bucket.volume)
        .bind(bucket.sentiment_sum)
        .bind(bucket.controversy_sum)
        .bind(bucket.bias_sum)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Volume stored for one bucket, if any.
    pub async fn query_bucket_volume(
        &self,
        key: &TrendKey,
        bucket_start: TimeMs,
    ) -> Result<Option<f64>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT volume FROM trend_buckets
            WHERE topic = ? AND region = ? AND language = ? AND bucket_start = ?
            "#,
        )
        .bind(key.topic.as_str())
        .bind(key.region.as_str())
        .bind(key.language.as_str())
        .bind(bucket_start.as_ms())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("volume")))
    }
}
