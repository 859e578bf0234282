//! Application-level search entry points.
//!
//! The ranking algorithm lives in `safesteps_core::search` and works through
//! the [`Store`] trait. This wrapper embeds the query, applies retrieval
//! config, and formats CLI output.
//!
//! | Mode | Engine | Requires Embeddings |
//! |------|--------|---------------------|
//! | `keyword` | SQLite FTS5 (BM25) | No |
//! | `semantic` | Cosine similarity over factor vectors | Yes |
//! | `hybrid` | Weighted merge (configurable α) | Yes |

use anyhow::{bail, Result};
use std::sync::Arc;
use thiserror::Error;

pub use safesteps_core::search::{NearFilter, SearchHit, SearchParams, SearchStrategy};
use safesteps_core::embedding::{truncate_chars, TextEmbedder};
use safesteps_core::models::GeoPoint;
use safesteps_core::store::Store;

use crate::config::{Config, RetrievalConfig};
use crate::db;
use crate::embedding::{create_embedder, DisabledEmbedder};
use crate::sqlite_store::SqliteStore;

/// Semantic or hybrid search was requested without an embedding provider.
#[derive(Debug, Error)]
#[error("mode '{mode}' requires embeddings; set [embedding] provider in config")]
pub struct EmbeddingsDisabled {
    pub mode: SearchStrategy,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub mode: SearchStrategy,
    pub borough: Option<String>,
    pub near: Option<NearFilter>,
    /// Overrides `retrieval.final_limit`.
    pub limit: Option<i64>,
}

/// Parse `LAT,LNG` into a point, checking coordinate ranges.
pub fn parse_near(s: &str) -> Result<GeoPoint, String> {
    let (lat, lng) = s
        .split_once(',')
        .ok_or_else(|| format!("expected LAT,LNG, got '{}'", s))?;
    let lat: f64 = lat
        .trim()
        .parse()
        .map_err(|_| format!("invalid latitude: '{}'", lat.trim()))?;
    let lng: f64 = lng
        .trim()
        .parse()
        .map_err(|_| format!("invalid longitude: '{}'", lng.trim()))?;
    check_coordinates(lat, lng)?;
    Ok(GeoPoint::new(lng, lat))
}

/// Latitude in `[-90, 90]` and longitude in `[-180, 180]`.
pub fn check_coordinates(lat: f64, lng: f64) -> Result<(), String> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(format!("latitude out of range: {}", lat));
    }
    if !(-180.0..=180.0).contains(&lng) {
        return Err(format!("longitude out of range: {}", lng));
    }
    Ok(())
}

/// Search `store`, embedding the query when the mode needs it.
///
/// Shared by `steps search` and `POST /api/search`.
pub async fn search_records<S>(
    store: &S,
    embedder: &dyn TextEmbedder,
    retrieval: &RetrievalConfig,
    query: &str,
    opts: &SearchOptions,
) -> Result<Vec<SearchHit>>
where
    S: Store + ?Sized,
{
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let query_vec = if opts.mode.needs_vector() {
        if embedder.dims() == 0 {
            return Err(EmbeddingsDisabled { mode: opts.mode }.into());
        }
        let input = match embedder.max_input_chars() {
            Some(max) => truncate_chars(query, max),
            None => query,
        };
        let vector = embedder.embed(input).await?;
        if vector.len() != embedder.dims() {
            bail!(
                "query embedding has {} dimensions, expected {}",
                vector.len(),
                embedder.dims()
            );
        }
        Some(vector)
    } else {
        None
    };

    let req = safesteps_core::search::SearchRequest {
        query,
        query_vec: query_vec.as_deref(),
        strategy: opts.mode,
        borough: opts.borough.as_deref(),
        near: opts.near,
        params: SearchParams {
            hybrid_alpha: retrieval.hybrid_alpha,
            candidate_k_keyword: retrieval.candidate_k_keyword,
            candidate_k_vector: retrieval.candidate_k_vector,
            final_limit: opts.limit.unwrap_or(retrieval.final_limit),
        },
    };

    safesteps_core::search::search(store, &req).await
}

/// CLI entry point for `steps search`.
pub async fn run_search(config: &Config, query: &str, opts: &SearchOptions, json: bool) -> Result<()> {
    let embedder: Arc<dyn TextEmbedder> = if opts.mode.needs_vector() {
        create_embedder(&config.embedding)?
    } else {
        Arc::new(DisabledEmbedder)
    };
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let hits = search_records(&store, embedder.as_ref(), &config.retrieval, query, opts).await;
    pool.close().await;
    let hits = hits?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let r = &hit.record.record;
        println!(
            "{}. [{:.2}] {} {} {}",
            i + 1,
            hit.score,
            r.crash_date,
            r.crash_time,
            if r.borough.is_empty() { "(no borough)" } else { r.borough.as_str() }
        );
        if opts.mode == SearchStrategy::Hybrid {
            println!(
                "    scoring: keyword={:.3}  semantic={:.3}",
                hit.keyword_score, hit.semantic_score
            );
        }
        println!("    factors: {}", r.contributing_factors.join(", "));
        println!(
            "    location: {:.5}, {:.5}",
            r.location.latitude, r.location.longitude
        );
        println!(
            "    pedestrians injured: {}  risk: {:.2}",
            r.pedestrians_injured,
            r.risk_score().unwrap_or_default()
        );
        println!("    id: {}", hit.record.id);
        println!();
    }

    Ok(())
}
