//! SQLite-backed [`Store`] implementation.
//!
//! Maps each [`Store`] operation onto the `crashes`, `crash_vectors`, and
//! `crashes_fts` tables created by [`crate::migrate`].

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};

use safesteps_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use safesteps_core::geo::{distance_m, BoundingBox};
use safesteps_core::models::{Enrichment, GeoPoint, NormalizedRecord};
use safesteps_core::store::{
    searchable_text, RecordCandidate, RecordFilter, Store, StoredRecord,
};

const RECORD_COLUMNS: &str = "c.id, c.collision_id, c.crash_date, c.crash_time, c.borough, \
     c.longitude, c.latitude, c.pedestrians_injured, c.contributing_factors, \
     c.risk_score, c.source_row, cv.embedding";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    model: String,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            model: String::new(),
        }
    }

    /// Tag stored vectors with the embedding model that produced them.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Every stored record, ordered by ID.
    pub async fn list_records(&self) -> Result<Vec<StoredRecord>> {
        let sql = format!(
            "SELECT {} FROM crashes c LEFT JOIN crash_vectors cv ON cv.crash_id = c.id ORDER BY c.id",
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Records with no vector, or one from another model or of another length.
    pub async fn records_needing_embedding(
        &self,
        model: &str,
        dims: usize,
        limit: Option<usize>,
    ) -> Result<Vec<StoredRecord>> {
        let sql = format!(
            "SELECT {} FROM crashes c LEFT JOIN crash_vectors cv ON cv.crash_id = c.id \
             WHERE cv.crash_id IS NULL OR cv.dims != ? OR cv.model != ? \
             ORDER BY c.id LIMIT ?",
            RECORD_COLUMNS
        );
        let limit = i64::try_from(limit.unwrap_or(usize::MAX)).unwrap_or(i64::MAX);
        let rows = sqlx::query(&sql)
            .bind(dims as i64)
            .bind(model)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }
}

/// Turn free text into an FTS5 query: each word quoted, joined with OR.
///
/// Crash factors contain `/`, `(` and `-`, which are FTS5 syntax.
pub fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// `AND` conditions on `crashes c` for the borough and the bounding box
/// of the `near` part of `filter`. Bind with [`bind_filter`].
fn filter_sql(filter: &RecordFilter<'_>) -> String {
    let mut sql = String::new();
    if filter.borough().is_some() {
        sql.push_str(" AND c.borough = ? COLLATE NOCASE");
    }
    if filter.near.is_some() {
        sql.push_str(" AND c.latitude BETWEEN ? AND ? AND c.longitude BETWEEN ? AND ?");
    }
    sql
}

fn bind_filter<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    filter: &RecordFilter<'q>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    if let Some(borough) = filter.borough() {
        query = query.bind(borough);
    }
    if let Some(near) = filter.near {
        let bbox = near.bounding_box();
        query = query
            .bind(bbox.south)
            .bind(bbox.north)
            .bind(bbox.west)
            .bind(bbox.east);
    }
    query
}

/// The bounding box is coarse; the radius itself is checked here.
fn within_radius(filter: &RecordFilter<'_>, row: &SqliteRow) -> bool {
    match filter.near {
        Some(near) => near.matches(GeoPoint::new(row.get("longitude"), row.get("latitude"))),
        None => true,
    }
}

fn record_from_row(row: &SqliteRow) -> Result<StoredRecord> {
    let id: String = row.get("id");
    let crash_date: String = row.get("crash_date");
    let crash_date = NaiveDate::parse_from_str(&crash_date, "%Y-%m-%d")
        .with_context(|| format!("crash {} has an invalid stored date: {}", id, crash_date))?;
    let factors_json: String = row.get("contributing_factors");
    let contributing_factors: Vec<String> = serde_json::from_str(&factors_json)
        .with_context(|| format!("crash {} has invalid stored factors", id))?;
    let injured: i64 = row.get("pedestrians_injured");
    let source_row: i64 = row.get("source_row");
    let blob: Option<Vec<u8>> = row.get("embedding");

    Ok(StoredRecord {
        record: NormalizedRecord {
            collision_id: row.get("collision_id"),
            crash_date,
            crash_time: row.get("crash_time"),
            borough: row.get("borough"),
            location: GeoPoint::new(row.get("longitude"), row.get("latitude")),
            pedestrians_injured: u32::try_from(injured).unwrap_or(u32::MAX),
            contributing_factors,
            enrichment: Some(Enrichment {
                factors_embedding: blob.map(|b| blob_to_vec(&b)).unwrap_or_default(),
                risk_score: row.get("risk_score"),
            }),
            row: u64::try_from(source_row).unwrap_or(0),
        },
        id,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_record(&self, record: &NormalizedRecord) -> Result<String> {
        let Some(enrichment) = &record.enrichment else {
            bail!("record {} has not been enriched", record.key());
        };

        let id = record.document_id();
        let factors_json = serde_json::to_string(&record.contributing_factors)?;
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO crashes (id, collision_id, crash_date, crash_time, borough,
                                 longitude, latitude, pedestrians_injured,
                                 contributing_factors, risk_score, source_row, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                collision_id = excluded.collision_id,
                crash_date = excluded.crash_date,
                crash_time = excluded.crash_time,
                borough = excluded.borough,
                longitude = excluded.longitude,
                latitude = excluded.latitude,
                pedestrians_injured = excluded.pedestrians_injured,
                contributing_factors = excluded.contributing_factors,
                risk_score = excluded.risk_score,
                source_row = excluded.source_row,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&id)
        .bind(&record.collision_id)
        .bind(record.crash_date.format("%Y-%m-%d").to_string())
        .bind(&record.crash_time)
        .bind(&record.borough)
        .bind(record.location.longitude)
        .bind(record.location.latitude)
        .bind(record.pedestrians_injured as i64)
        .bind(&factors_json)
        .bind(enrichment.risk_score)
        .bind(record.row as i64)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM crashes_fts WHERE crash_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO crashes_fts (crash_id, text) VALUES (?, ?)")
            .bind(&id)
            .bind(searchable_text(record))
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO crash_vectors (crash_id, model, dims, embedding)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(crash_id) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                embedding = excluded.embedding
            "#,
        )
        .bind(&id)
        .bind(&self.model)
        .bind(enrichment.factors_embedding.len() as i64)
        .bind(vec_to_blob(&enrichment.factors_embedding))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    async fn get_record(&self, id: &str) -> Result<Option<StoredRecord>> {
        let sql = format!(
            "SELECT {} FROM crashes c LEFT JOIN crash_vectors cv ON cv.crash_id = c.id WHERE c.id = ?",
            RECORD_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn keyword_search(
        &self,
        query: &str,
        filter: &RecordFilter<'_>,
        limit: i64,
    ) -> Result<Vec<RecordCandidate>> {
        let Some(fts) = fts_query(query) else {
            return Ok(Vec::new());
        };

        // With a radius the cut happens after the distance check.
        let limit_sql = if filter.near.is_some() { "" } else { " LIMIT ?" };
        let sql = format!(
            "SELECT crashes_fts.crash_id, crashes_fts.rank, c.latitude, c.longitude \
             FROM crashes_fts JOIN crashes c ON c.id = crashes_fts.crash_id \
             WHERE crashes_fts MATCH ?{} \
             ORDER BY crashes_fts.rank{}",
            filter_sql(filter),
            limit_sql
        );
        let mut q = bind_filter(sqlx::query(&sql).bind(fts), filter);
        if filter.near.is_none() {
            q = q.bind(limit);
        }
        let rows = q.fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .filter(|row| within_radius(filter, row))
            .take(limit.max(0) as usize)
            .map(|row| {
                let rank: f64 = row.get("rank");
                RecordCandidate {
                    record_id: row.get("crash_id"),
                    raw_score: -rank,
                }
            })
            .collect())
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        filter: &RecordFilter<'_>,
        limit: i64,
    ) -> Result<Vec<RecordCandidate>> {
        let sql = format!(
            "SELECT cv.crash_id, cv.embedding, c.latitude, c.longitude \
             FROM crash_vectors cv JOIN crashes c ON c.id = cv.crash_id \
             WHERE cv.dims = ?{}",
            filter_sql(filter)
        );
        let rows = bind_filter(sqlx::query(&sql).bind(query_vec.len() as i64), filter)
            .fetch_all(&self.pool)
            .await?;

        let mut candidates: Vec<RecordCandidate> = rows
            .iter()
            .filter(|row| within_radius(filter, row))
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                RecordCandidate {
                    record_id: row.get("crash_id"),
                    raw_score: cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record_id.cmp(&b.record_id))
        });
        candidates.truncate(limit.max(0) as usize);

        Ok(candidates)
    }

    async fn records_within(&self, center: GeoPoint, radius_m: f64) -> Result<Vec<StoredRecord>> {
        let bbox = BoundingBox::around(center, radius_m);
        let sql = format!(
            "SELECT {} FROM crashes c LEFT JOIN crash_vectors cv ON cv.crash_id = c.id \
             WHERE c.latitude BETWEEN ? AND ? AND c.longitude BETWEEN ? AND ? \
             ORDER BY c.id",
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(bbox.south)
            .bind(bbox.north)
            .bind(bbox.west)
            .bind(bbox.east)
            .fetch_all(&self.pool)
            .await?;

        let mut found = Vec::new();
        for row in &rows {
            let stored = record_from_row(row)?;
            if distance_m(center, stored.record.location) <= radius_m {
                found.push(stored);
            }
        }
        Ok(found)
    }
}
