//! Database schema migrations. Safe to run repeatedly.
//!
//! | Table | Contents |
//! |-------|----------|
//! | `crashes` | One row per enriched crash record |
//! | `crash_vectors` | Factor embedding as little-endian `f32` BLOB |
//! | `crashes_fts` | FTS5 index over contributing factors and borough |
//! | `ingest_runs` | Counters for each ingest run |

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply the schema to an open pool.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS crashes (
            id TEXT PRIMARY KEY,
            collision_id TEXT,
            crash_date TEXT NOT NULL,
            crash_time TEXT NOT NULL,
            borough TEXT NOT NULL,
            longitude REAL NOT NULL,
            latitude REAL NOT NULL,
            pedestrians_injured INTEGER NOT NULL,
            contributing_factors TEXT NOT NULL DEFAULT '[]',
            risk_score REAL NOT NULL,
            source_row INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS crash_vectors (
            crash_id TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (crash_id) REFERENCES crashes(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_runs (
            id TEXT PRIMARY KEY,
            source_path TEXT NOT NULL,
            label TEXT,
            started_at INTEGER NOT NULL,
            finished_at INTEGER NOT NULL,
            rows_read INTEGER NOT NULL,
            records_stored INTEGER NOT NULL,
            rows_rejected INTEGER NOT NULL,
            aborted INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so check first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='crashes_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE crashes_fts USING fts5(
                crash_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_crashes_borough ON crashes(borough)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_crashes_lat_lng ON crashes(latitude, longitude)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_crashes_date ON crashes(crash_date DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
