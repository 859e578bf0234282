//! Export every stored crash document as newline-delimited JSON.
//!
//! Each line is one document in its serialized form (GeoJSON `location`,
//! `factors_embedding`, `risk_score`) plus its `id`.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use safesteps_core::store::StoredRecord;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Write `records` as NDJSON.
pub fn write_ndjson<W: Write>(mut out: W, records: &[StoredRecord]) -> Result<()> {
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Export to `output`, or stdout when `None`.
pub async fn run_export(config: &Config, output: Option<&Path>) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let records = store.list_records().await;
    pool.close().await;
    let records = records?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = File::create(path)
                .with_context(|| format!("Failed to create export file: {}", path.display()))?;
            write_ndjson(BufWriter::new(file), &records)?;
            eprintln!("Exported {} records to {}", records.len(), path.display());
        }
        None => {
            write_ndjson(io::stdout().lock(), &records)?;
        }
    }

    Ok(())
}
