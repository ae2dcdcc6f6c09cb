//! SQLite setup for the event log and the projection tables.

use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use tracing::{debug, info};

/// Shard workers append to the log concurrently with API reads.
const POOL_SIZE: u32 = 8;

/// Applied to every pooled connection after the journal mode.
const CONNECTION_PRAGMAS: &[&str] = &[
    "PRAGMA foreign_keys = ON",
    "PRAGMA busy_timeout = 5000",
    "PRAGMA synchronous = NORMAL",
];

/// Open (creating if needed) the engine database and bring its schema up to date.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(POOL_SIZE)
        .after_connect(|conn, _meta| Box::pin(async move { prepare_connection(conn).await }))
        .connect(&format!("sqlite:{}?mode=rwc", db_path))
        .await?;

    let statements = run_migrations(&pool).await?;
    info!(path = %db_path, statements, "Engine database ready");
    Ok(pool)
}

/// Apply `schema.sql` in one transaction. Every statement is `IF NOT EXISTS`,
/// so running it against an existing log is a no-op.
async fn run_migrations(pool: &SqlitePool) -> Result<usize, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut applied = 0;
    for statement in include_str!("schema.sql")
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        sqlx::query(statement).execute(&mut *tx).await?;
        applied += 1;
    }
    tx.commit().await?;
    debug!(applied, "Schema statements applied");
    Ok(applied)
}

async fn prepare_connection(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    let journal_mode: String = sqlx::query("PRAGMA journal_mode = WAL")
        .fetch_one(&mut *conn)
        .await?
        .get(0);
    for pragma in CONNECTION_PRAGMAS {
        sqlx::query(pragma).execute(&mut *conn).await?;
    }
    debug!(journal_mode = %journal_mode, "Connection prepared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ENGINE_TABLES: &[&str] = &[
        "events",
        "accounts",
        "current_metrics",
        "influence_history",
        "trend_buckets",
    ];

    async fn fresh_db() -> (SqlitePool, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("nested")
            .join("engine.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        assert!(Path::new(&db_path).exists());
        (pool, temp_dir)
    }

    #[tokio::test]
    async fn test_engine_tables_created() {
        let (pool, _dir) = fresh_db().await;
        for table in ENGINE_TABLES {
            let count: (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = ?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .expect("query failed");
            assert_eq!(count.0, 1, "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn test_rerunning_schema_keeps_logged_events() {
        let (pool, _dir) = fresh_db().await;
        sqlx::query(
            "INSERT INTO events (event_key, shard_key, seq, timestamp_ms, kind, actor_id, subject_id, body, created_at)
             VALUES ('k1', 'account:alice', 1, 0, 'followChanged', 'bob', 'alice', '{}', 0)",
        )
        .execute(&pool)
        .await
        .expect("insert failed");

        let applied = run_migrations(&pool).await.expect("second run failed");
        assert!(applied >= ENGINE_TABLES.len());

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events")
            .fetch_one(&pool)
            .await
            .expect("query failed");
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn test_event_log_rejects_reused_sequence() {
        let (pool, _dir) = fresh_db().await;
        let insert = |key: &'static str| {
            sqlx::query(
                "INSERT INTO events (event_key, shard_key, seq, timestamp_ms, kind, actor_id, subject_id, body, created_at)
                 VALUES (?, 'account:alice', 7, 0, 'followChanged', 'bob', 'alice', '{}', 0)",
            )
            .bind(key)
        };
        insert("a").execute(&pool).await.expect("first insert failed");
        assert!(insert("b").execute(&pool).await.is_err());
    }

    #[tokio::test]
    async fn test_connection_pragmas_applied() {
        let (pool, _dir) = fresh_db().await;

        let foreign_keys: (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("query failed");
        assert_eq!(foreign_keys.0, 1);

        let busy: (i64,) = sqlx::query_as("PRAGMA busy_timeout")
            .fetch_one(&pool)
            .await
            .expect("query failed");
        assert_eq!(busy.0, 5000);

        let journal: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .expect("query failed");
        assert!(
            matches!(journal.0.as_str(), "wal" | "delete"),
            "unexpected journal_mode: {}",
            journal.0
        );
    }
}
