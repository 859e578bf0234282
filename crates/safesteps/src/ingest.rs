//! Ingestion driver: CSV → parse → enrich → store.
//!
//! Parsing is synchronous and happens on the driver task. Enrichment and
//! storage run on a [`JoinSet`] with at most `ingest.concurrency` records in
//! flight, bounded by a semaphore; records may be stored out of input order.
//!
//! A row whose document id repeats an earlier row of the same run is
//! rejected at the `duplicate` stage; the first occurrence wins.
//!
//! Every row that does not end up in the store is reported as a
//! [`Rejection`] with the stage that rejected it. Under
//! [`OnError::Abort`] the driver stops reading at the first rejection, waits
//! for in-flight records, and the run fails; records already stored remain.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use safesteps_core::embedding::TextEmbedder;
use safesteps_core::error::MalformedRecordError;
use safesteps_core::models::{NormalizedRecord, RawRow};
use safesteps_core::store::Store;
use safesteps_core::transform;

use crate::config::{Config, OnError};
use crate::db;
use crate::embedding::create_embedder;
use crate::migrate;
use crate::reader;
use crate::sqlite_store::SqliteStore;

/// Pipeline stage at which a row was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectStage {
    Read,
    Parse,
    Enrich,
    Store,
    /// Same document id as an earlier row of the same run.
    Duplicate,
}

impl fmt::Display for RejectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RejectStage::Read => "read",
            RejectStage::Parse => "parse",
            RejectStage::Enrich => "enrich",
            RejectStage::Store => "store",
            RejectStage::Duplicate => "duplicate",
        })
    }
}

/// A row that did not reach the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub row: u64,
    pub key: String,
    pub stage: RejectStage,
    pub reason: String,
}

impl From<MalformedRecordError> for Rejection {
    fn from(e: MalformedRecordError) -> Self {
        Self {
            row: e.row,
            key: e.key.clone(),
            stage: RejectStage::Parse,
            reason: format!("{}: {}", e.field, e.reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub concurrency: usize,
    pub on_error: OnError,
    /// Parse only; nothing is embedded or written.
    pub dry_run: bool,
    /// Maximum number of data rows to read.
    pub limit: Option<usize>,
    /// Write rejections here as CSV.
    pub rejects: Option<PathBuf>,
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.ingest.concurrency,
            on_error: config.ingest.on_error,
            dry_run: false,
            limit: None,
            rejects: None,
        }
    }
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            on_error: OnError::Skip,
            dry_run: false,
            limit: None,
            rejects: None,
        }
    }
}

/// Outcome of one ingest run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub rows_read: u64,
    /// Rows that parsed cleanly (the only progress counter in a dry run).
    pub records_valid: u64,
    pub records_stored: u64,
    pub rejections: Vec<Rejection>,
    pub aborted: bool,
    pub dry_run: bool,
}

impl IngestReport {
    pub fn rows_rejected(&self) -> u64 {
        self.rejections.len() as u64
    }

    fn reject(&mut self, rejection: Rejection, on_error: OnError) {
        tracing::warn!(
            row = rejection.row,
            key = %rejection.key,
            stage = %rejection.stage,
            reason = %rejection.reason,
            "row rejected"
        );
        self.rejections.push(rejection);
        if on_error == OnError::Abort {
            self.aborted = true;
        }
    }

    fn complete(&mut self, outcome: Result<String, Rejection>, on_error: OnError) {
        match outcome {
            Ok(id) => {
                tracing::debug!(%id, "record stored");
                self.records_stored += 1;
            }
            Err(rejection) => self.reject(rejection, on_error),
        }
    }
}

async fn enrich_and_store<S>(
    record: NormalizedRecord,
    embedder: &dyn TextEmbedder,
    store: &S,
) -> Result<String, Rejection>
where
    S: Store + ?Sized,
{
    let row = record.row;
    let key = record.key();

    let enriched = transform::enrich(record, embedder)
        .await
        .map_err(|e| Rejection {
            row,
            key: key.clone(),
            stage: RejectStage::Enrich,
            reason: e.to_string(),
        })?;

    store
        .upsert_record(&enriched)
        .await
        .map_err(|e| Rejection {
            row,
            key,
            stage: RejectStage::Store,
            reason: format!("{:#}", e),
        })
}

/// Run rows through parse → enrich → store.
///
/// Store- and embedder-agnostic; [`run_ingest`] wires it to the CSV reader
/// and SQLite.
pub async fn ingest_rows<I, S>(
    rows: I,
    embedder: Arc<dyn TextEmbedder>,
    store: Arc<S>,
    options: &IngestOptions,
) -> Result<IngestReport>
where
    I: IntoIterator<Item = Result<RawRow, Rejection>>,
    S: Store + ?Sized + 'static,
{
    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut join_set: JoinSet<Result<String, Rejection>> = JoinSet::new();
    let mut report = IngestReport {
        dry_run: options.dry_run,
        ..IngestReport::default()
    };
    // Document id -> first row that produced it.
    let mut seen: HashMap<String, u64> = HashMap::new();

    for item in rows.into_iter().take(options.limit.unwrap_or(usize::MAX)) {
        if report.aborted {
            break;
        }
        report.rows_read += 1;

        let raw = match item {
            Ok(raw) => raw,
            Err(rejection) => {
                report.reject(rejection, options.on_error);
                continue;
            }
        };

        let record = match transform::parse(&raw) {
            Ok(record) => record,
            Err(e) => {
                report.reject(e.into(), options.on_error);
                continue;
            }
        };

        match seen.entry(record.document_id()) {
            Entry::Occupied(first) => {
                let rejection = Rejection {
                    row: record.row,
                    key: record.key(),
                    stage: RejectStage::Duplicate,
                    reason: format!("duplicate of row {}", first.get()),
                };
                report.reject(rejection, options.on_error);
                continue;
            }
            Entry::Vacant(slot) => {
                slot.insert(record.row);
            }
        }
        report.records_valid += 1;

        if options.dry_run {
            continue;
        }

        let permit = semaphore.clone().acquire_owned().await?;
        let embedder = embedder.clone();
        let store = store.clone();
        join_set.spawn(async move {
            let _permit = permit;
            enrich_and_store(record, embedder.as_ref(), store.as_ref()).await
        });

        while let Some(done) = join_set.try_join_next() {
            report.complete(done?, options.on_error);
        }
    }

    while let Some(done) = join_set.join_next().await {
        report.complete(done?, options.on_error);
    }

    Ok(report)
}

/// Ingest a CSV file into the configured database.
///
/// Applies the schema if needed, records the run in `ingest_runs` (not in
/// dry runs), and writes `options.rejects` when set. Returns an error after
/// bookkeeping if the run was aborted.
pub async fn run_ingest(config: &Config, path: &Path, options: &IngestOptions) -> Result<IngestReport> {
    let rows = reader::rows(reader::open(path)?)?;
    let started_at = chrono::Utc::now().timestamp();

    tracing::info!(
        path = %path.display(),
        concurrency = options.concurrency,
        dry_run = options.dry_run,
        "starting ingest"
    );

    let report = if options.dry_run {
        let store = Arc::new(safesteps_core::store::memory::InMemoryStore::new());
        ingest_rows(rows, Arc::new(crate::embedding::DisabledEmbedder), store, options).await?
    } else {
        let embedder = create_embedder(&config.embedding)?;
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        let store = Arc::new(SqliteStore::new(pool.clone()).with_model(embedder.model_name()));

        let report = ingest_rows(rows, embedder, store, options).await?;
        record_run(
            &pool,
            path,
            config.ingest.batch_label.as_deref(),
            started_at,
            &report,
        )
        .await?;
        pool.close().await;
        report
    };

    if let Some(rejects_path) = &options.rejects {
        write_rejects(rejects_path, &report.rejections)?;
    }

    tracing::info!(
        rows_read = report.rows_read,
        records_stored = report.records_stored,
        rows_rejected = report.rows_rejected(),
        aborted = report.aborted,
        "ingest finished"
    );

    if report.aborted {
        if let Some(first) = report.rejections.first() {
            bail!(
                "ingest aborted at row {} ({}): {}: {}",
                first.row,
                first.key,
                first.stage,
                first.reason
            );
        }
        bail!("ingest aborted");
    }

    Ok(report)
}

async fn record_run(
    pool: &SqlitePool,
    path: &Path,
    label: Option<&str>,
    started_at: i64,
    report: &IngestReport,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO ingest_runs (id, source_path, label, started_at, finished_at,
                                 rows_read, records_stored, rows_rejected, aborted)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(path.display().to_string())
    .bind(label)
    .bind(started_at)
    .bind(chrono::Utc::now().timestamp())
    .bind(report.rows_read as i64)
    .bind(report.records_stored as i64)
    .bind(report.rows_rejected() as i64)
    .bind(report.aborted)
    .execute(pool)
    .await
    .context("Failed to record ingest run")?;
    Ok(())
}

/// Write rejections as CSV with a `row,key,stage,reason` header.
pub fn write_rejects(path: &Path, rejections: &[Rejection]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create rejects file: {}", path.display()))?;
    writer.write_record(["row", "key", "stage", "reason"])?;
    for rejection in rejections {
        writer.serialize(rejection)?;
    }
    writer.flush()?;
    Ok(())
}

/// Print a run summary to stdout.
pub fn print_report(report: &IngestReport) {
    if report.dry_run {
        println!(
            "Dry run: {} rows read, {} valid, {} rejected",
            report.rows_read,
            report.records_valid,
            report.rows_rejected()
        );
    } else {
        println!(
            "Ingest: {} rows read, {} stored, {} rejected",
            report.rows_read,
            report.records_stored,
            report.rows_rejected()
        );
    }
    for r in &report.rejections {
        println!("  row {} ({}) {}: {}", r.row, r.key, r.stage, r.reason);
    }
}
