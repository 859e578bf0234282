//! Backfill factor embeddings for records already in the database.
//!
//! Records ingested with the `disabled` provider, or under a different
//! model, are re-enriched with the configured embedder and upserted.

use anyhow::{bail, Result};
use serde::Serialize;

use safesteps_core::embedding::TextEmbedder;
use safesteps_core::store::Store;
use safesteps_core::transform;

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::migrate;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmbedReport {
    /// Records selected for embedding.
    pub pending: u64,
    pub embedded: u64,
    pub failed: u64,
}

/// Embed up to `limit` records whose stored vector does not match
/// `embedder`. Failures are logged and counted; they do not stop the run.
///
/// `store` must be tagged with the embedder's model (see
/// [`SqliteStore::with_model`]) or the records stay pending.
pub async fn embed_pending(
    store: &SqliteStore,
    embedder: &dyn TextEmbedder,
    limit: Option<usize>,
) -> Result<EmbedReport> {
    if embedder.dims() == 0 {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let pending = store
        .records_needing_embedding(embedder.model_name(), embedder.dims(), limit)
        .await?;
    let mut report = EmbedReport {
        pending: pending.len() as u64,
        ..EmbedReport::default()
    };

    for stored in pending {
        let id = stored.id;
        let result = match transform::enrich(stored.record, embedder).await {
            Ok(record) => store.upsert_record(&record).await.map(|_| ()),
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(()) => report.embedded += 1,
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "embedding failed");
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

/// `steps embed`: backfill embeddings with the configured provider.
pub async fn run_embed(config: &Config, limit: Option<usize>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let embedder = create_embedder(&config.embedding)?;
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    let store = SqliteStore::new(pool.clone()).with_model(embedder.model_name());

    let report = embed_pending(&store, embedder.as_ref(), limit).await?;
    tracing::info!(
        pending = report.pending,
        embedded = report.embedded,
        failed = report.failed,
        "embed finished"
    );

    println!("embed pending");
    if report.pending == 0 {
        println!("  all records up to date");
    } else {
        println!("  total pending: {}", report.pending);
        println!("  embedded: {}", report.embedded);
        println!("  failed: {}", report.failed);
    }

    pool.close().await;
    Ok(())
}
