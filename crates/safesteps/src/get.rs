//! Crash record retrieval by document ID (`steps get`).

use anyhow::{bail, Result};

use safesteps_core::store::{Store, StoredRecord};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub async fn get_record(config: &Config, id: &str) -> Result<StoredRecord> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let result = store.get_record(id).await;
    pool.close().await;

    match result? {
        Some(record) => Ok(record),
        None => bail!("crash record not found: {}", id),
    }
}

/// Print the stored document as JSON.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let record = get_record(config, id).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
