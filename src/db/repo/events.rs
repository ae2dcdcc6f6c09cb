//! Event log and account cache operations for the repository.

use crate::domain::{AccountProfile, Event};
use sqlx::Row;
use tracing::warn;

use super::Repository;

impl Repository {
    /// Append an event to the log idempotently.
    ///
    /// Returns false when an event with the same (shard key, seq) already exists.
    ///
    /// # Errors
    /// Returns an error if the event has no shard key or the insert fails.
    pub async fn insert_event(&self, event: &Event) -> Result<bool, super::StoreError> {
        let (Some(event_key), Some(shard)) = (event.event_key(), event.shard_key()) else {
            return Err(super::StoreError::Corrupt(format!(
                "event {} has no shard key",
                event.seq
            )));
        };
        let body = serde_json::to_string(event)?;

        let result = sqlx::query(
            r#"
            INSERT INTO events (
                event_key, shard_key, seq, timestamp_ms, kind, actor_id, subject_id,
                body, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(event_key)
        .bind(shard.as_key())
        .bind(event.seq as i64)
        .bind(event.timestamp.as_ms())
        .bind(event.kind().as_str())
        .bind(event.actor_id.as_str())
        .bind(event.subject_id.as_str())
        .bind(body)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// All events in the order they were accepted. Undecodable rows are skipped.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_events(&self) -> Result<Vec<Event>, sqlx::Error> {
        let rows = sqlx::query("SELECT event_key, body FROM events ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let event_key: String = row.get("event_key");
            let body: String = row.get("body");
            match serde_json::from_str::<Event>(&body) {
                Ok(event) => events.push(event),
                Err(e) => warn!(event_key = %event_key, error = %e, "Skipping undecodable event"),
            }
        }
        Ok(events)
    }

    /// Whether the log holds an event with this idempotency key.
    pub async fn event_exists(&self, event_key: &str) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM events WHERE event_key = ? LIMIT 1")
            .bind(event_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Store one alignment version of an account.
    ///
    /// # Errors
    /// Returns an error if serialization or the upsert fails.
    pub async fn insert_account(&self, profile: &AccountProfile) -> Result<(), super::StoreError> {
        let body = serde_json::to_string(profile)?;
        sqlx::query(
            r#"
            INSERT INTO accounts (
                account_id, alignment_version, persona_type, effective_at, body, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(account_id, alignment_version) DO UPDATE SET
                persona_type = excluded.persona_type,
                effective_at = excluded.effective_at,
                body = excluded.body
            "#,
        )
        .bind(profile.id.as_str())
        .bind(i64::from(profile.alignment_version))
        .bind(profile.persona_type.as_str())
        .bind(profile.effective_at.as_ms())
        .bind(body)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Every stored alignment version, ascending by (account, version).
    pub async fn query_accounts(&self) -> Result<Vec<AccountProfile>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT account_id, body FROM accounts ORDER BY account_id ASC, alignment_version ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut profiles = Vec::with_capacity(rows.len());
        for row in rows {
            let account_id: String = row.get("account_id");
            let body: String = row.get("body");
            match serde_json::from_str::<AccountProfile>(&body) {
                Ok(profile) => profiles.push(profile),
                Err(e) => warn!(account_id = %account_id, error = %e, "Skipping undecodable account"),
            }
        }
        Ok(profiles)
    }
}
