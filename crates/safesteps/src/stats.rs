//! Database statistics (`steps stats`).
//!
//! Record counts, embedding coverage, a per-borough breakdown, and the most
//! recent ingest runs, so row counts can be reconciled against stored
//! documents.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

#[derive(Debug, Clone, Serialize)]
pub struct BoroughStats {
    pub borough: String,
    pub crashes: i64,
    pub pedestrians_injured: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub id: String,
    pub source_path: String,
    pub label: Option<String>,
    pub finished_at: i64,
    pub rows_read: i64,
    pub records_stored: i64,
    pub rows_rejected: i64,
    pub aborted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub total_records: i64,
    /// Records whose embedding is non-empty.
    pub embedded_records: i64,
    pub by_borough: Vec<BoroughStats>,
    pub recent_runs: Vec<RunStats>,
}

/// Collect statistics from an open pool.
pub async fn collect_stats(pool: &SqlitePool) -> Result<Stats> {
    let total_records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM crashes")
        .fetch_one(pool)
        .await?;

    let embedded_records: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM crash_vectors WHERE dims > 0")
            .fetch_one(pool)
            .await?;

    let by_borough = sqlx::query(
        r#"
        SELECT borough, COUNT(*) AS crashes, COALESCE(SUM(pedestrians_injured), 0) AS injured
        FROM crashes
        GROUP BY borough
        ORDER BY crashes DESC, borough ASC
        "#,
    )
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| BoroughStats {
        borough: row.get("borough"),
        crashes: row.get("crashes"),
        pedestrians_injured: row.get("injured"),
    })
    .collect();

    let recent_runs = sqlx::query(
        r#"
        SELECT id, source_path, label, finished_at, rows_read, records_stored,
               rows_rejected, aborted
        FROM ingest_runs
        ORDER BY finished_at DESC
        LIMIT 5
        "#,
    )
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| RunStats {
        id: row.get("id"),
        source_path: row.get("source_path"),
        label: row.get("label"),
        finished_at: row.get("finished_at"),
        rows_read: row.get("rows_read"),
        records_stored: row.get("records_stored"),
        rows_rejected: row.get("rows_rejected"),
        aborted: row.get("aborted"),
    })
    .collect();

    Ok(Stats {
        total_records,
        embedded_records,
        by_borough,
        recent_runs,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool).await;
    pool.close().await;
    let stats = stats?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("SafeSteps Database Stats");
    println!("========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Records:     {}", stats.total_records);
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.embedded_records,
        stats.total_records,
        if stats.total_records > 0 {
            (stats.embedded_records * 100) / stats.total_records
        } else {
            0
        }
    );

    if !stats.by_borough.is_empty() {
        println!();
        println!("  By borough:");
        println!("  {:<20} {:>8} {:>10}", "BOROUGH", "CRASHES", "INJURED");
        println!("  {}", "-".repeat(40));
        for b in &stats.by_borough {
            let name = if b.borough.is_empty() {
                "(none)"
            } else {
                b.borough.as_str()
            };
            println!("  {:<20} {:>8} {:>10}", name, b.crashes, b.pedestrians_injured);
        }
    }

    if !stats.recent_runs.is_empty() {
        println!();
        println!("  Recent ingest runs:");
        println!(
            "  {:<17} {:>6} {:>7} {:>9}   {}",
            "FINISHED", "READ", "STORED", "REJECTED", "SOURCE"
        );
        println!("  {}", "-".repeat(70));
        for r in &stats.recent_runs {
            println!(
                "  {:<17} {:>6} {:>7} {:>9}   {}{}",
                format_ts(r.finished_at),
                r.rows_read,
                r.records_stored,
                r.rows_rejected,
                r.source_path,
                if r.aborted { " (aborted)" } else { "" }
            );
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
