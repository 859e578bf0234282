//! Crash record search with keyword, semantic, and hybrid strategies.
//!
//! The search algorithm operates entirely through the [`Store`] trait. The
//! calling application embeds the query (when the strategy needs it),
//! constructs [`SearchParams`], and passes the store implementation.
//!
//! # Hybrid Scoring Algorithm
//!
//! 1. Fetch `candidate_k_keyword` keyword candidates.
//! 2. Fetch `candidate_k_vector` vector candidates (cosine similarity).
//!    Both fetches apply the borough / `near` filters inside the store,
//!    before the candidate cut.
//! 3. Normalize both sets to `[0, 1]` using min-max normalization.
//! 4. Merge: `score = (1 - α) × keyword + α × semantic`.
//! 5. Sort by score (desc), crash date (desc), id (asc).
//! 6. Truncate to `final_limit`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize, Serializer};

use crate::models::GeoPoint;
use crate::store::{RecordCandidate, RecordFilter, Store, StoredRecord};

pub use crate::geo::NearFilter;

/// Which candidate sets feed the merged score.
///
/// Defaults to keyword, the one strategy that needs no embedding provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    #[default]
    Keyword,
    Semantic,
    Hybrid,
}

impl SearchStrategy {
    pub fn needs_keyword(self) -> bool {
        matches!(self, Self::Keyword | Self::Hybrid)
    }

    pub fn needs_vector(self) -> bool {
        matches!(self, Self::Semantic | Self::Hybrid)
    }

    /// Semantic weight for this strategy.
    pub fn alpha(self, hybrid_alpha: f64) -> f64 {
        match self {
            Self::Keyword => 0.0,
            Self::Semantic => 1.0,
            Self::Hybrid => hybrid_alpha,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Semantic => "semantic",
            Self::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyword" => Ok(Self::Keyword),
            "semantic" => Ok(Self::Semantic),
            "hybrid" => Ok(Self::Hybrid),
            other => bail!(
                "Unknown search mode: {}. Use keyword, semantic, or hybrid.",
                other
            ),
        }
    }
}

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Weight for semantic vs keyword: `hybrid = (1-α)*keyword + α*semantic`.
    pub hybrid_alpha: f64,
    pub candidate_k_keyword: i64,
    pub candidate_k_vector: i64,
    /// Maximum results to return.
    pub final_limit: i64,
}

/// Bundles all inputs for a single search invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    /// Pre-computed query embedding (required for semantic/hybrid).
    pub query_vec: Option<&'a [f32]>,
    pub strategy: SearchStrategy,
    /// Case-insensitive borough match.
    pub borough: Option<&'a str>,
    pub near: Option<NearFilter>,
    pub params: SearchParams,
}

/// A ranked crash record.
///
/// Serializes flat, without `factors_embedding`.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// Merged relevance score in `[0.0, 1.0]`.
    pub score: f64,
    pub keyword_score: f64,
    pub semantic_score: f64,
    pub record: StoredRecord,
}

#[derive(Serialize)]
struct SearchHitView<'a> {
    score: f64,
    keyword_score: f64,
    semantic_score: f64,
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    collision_id: Option<&'a str>,
    crash_date: chrono::NaiveDate,
    crash_time: &'a str,
    borough: &'a str,
    location: GeoPoint,
    pedestrians_injured: u32,
    contributing_factors: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    risk_score: Option<f64>,
}

impl Serialize for SearchHit {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let record = &self.record.record;
        SearchHitView {
            score: self.score,
            keyword_score: self.keyword_score,
            semantic_score: self.semantic_score,
            id: &self.record.id,
            collision_id: record.collision_id.as_deref(),
            crash_date: record.crash_date,
            crash_time: &record.crash_time,
            borough: &record.borough,
            location: record.location,
            pedestrians_injured: record.pedestrians_injured,
            contributing_factors: &record.contributing_factors,
            risk_score: record.risk_score(),
        }
        .serialize(serializer)
    }
}

/// Run a search against a [`Store`] backend.
///
/// All frontends (CLI, HTTP) delegate to this function.
pub async fn search<S>(store: &S, req: &SearchRequest<'_>) -> Result<Vec<SearchHit>>
where
    S: Store + ?Sized,
{
    if req.query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let filter = RecordFilter {
        borough: req.borough,
        near: req.near,
    };

    let keyword_candidates = if req.strategy.needs_keyword() {
        store
            .keyword_search(req.query, &filter, req.params.candidate_k_keyword)
            .await?
    } else {
        Vec::new()
    };

    let vector_candidates = if req.strategy.needs_vector() {
        match req.query_vec {
            Some(qv) => {
                store
                    .vector_search(qv, &filter, req.params.candidate_k_vector)
                    .await?
            }
            None => bail!("query_vec is required for {} mode", req.strategy),
        }
    } else {
        Vec::new()
    };

    if keyword_candidates.is_empty() && vector_candidates.is_empty() {
        return Ok(Vec::new());
    }

    let kw_map: HashMap<&str, f64> = normalize_scores(&keyword_candidates)
        .into_iter()
        .map(|(c, s)| (c.record_id.as_str(), s))
        .collect();
    let vec_map: HashMap<&str, f64> = normalize_scores(&vector_candidates)
        .into_iter()
        .map(|(c, s)| (c.record_id.as_str(), s))
        .collect();

    let mut ids: Vec<&str> = kw_map.keys().chain(vec_map.keys()).copied().collect();
    ids.sort_unstable();
    ids.dedup();

    let alpha = req.strategy.alpha(req.params.hybrid_alpha);
    let mut hits: Vec<SearchHit> = Vec::with_capacity(ids.len());

    for id in ids {
        let Some(stored) = store.get_record(id).await? else {
            continue;
        };

        let k = kw_map.get(id).copied().unwrap_or(0.0);
        let v = vec_map.get(id).copied().unwrap_or(0.0);
        hits.push(SearchHit {
            score: (1.0 - alpha) * k + alpha * v,
            keyword_score: k,
            semantic_score: v,
            record: stored,
        });
    }

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.record.record.crash_date.cmp(&a.record.record.crash_date))
            .then(a.record.id.cmp(&b.record.id))
    });
    hits.truncate(req.params.final_limit.max(0) as usize);

    Ok(hits)
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal, they are normalized to `1.0`.
pub fn normalize_scores(candidates: &[RecordCandidate]) -> Vec<(&RecordCandidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Enrichment, NormalizedRecord};
    use crate::store::memory::InMemoryStore;
    use chrono::NaiveDate;

    fn make_candidate(id: &str, score: f64) -> RecordCandidate {
        RecordCandidate {
            record_id: id.to_string(),
            raw_score: score,
        }
    }

    fn params(limit: i64) -> SearchParams {
        SearchParams {
            hybrid_alpha: 0.6,
            candidate_k_keyword: 80,
            candidate_k_vector: 80,
            final_limit: limit,
        }
    }

    fn record(
        id: &str,
        date: (i32, u32, u32),
        borough: &str,
        factors: &[&str],
        emb: Vec<f32>,
        location: GeoPoint,
    ) -> NormalizedRecord {
        NormalizedRecord {
            collision_id: Some(id.to_string()),
            crash_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            crash_time: "9:15".to_string(),
            borough: borough.to_string(),
            location,
            pedestrians_injured: 1,
            contributing_factors: factors.iter().map(|s| s.to_string()).collect(),
            enrichment: Some(Enrichment {
                factors_embedding: emb,
                risk_score: 0.2,
            }),
            row: 1,
        }
    }

    async fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        let midtown = GeoPoint::new(-73.9855, 40.7580);
        let brooklyn = GeoPoint::new(-73.9760, 40.6838);
        for r in [
            record("1", (2023, 12, 1), "MANHATTAN", &["Unsafe Speed"], vec![1.0, 0.0], midtown),
            record(
                "2",
                (2024, 1, 5),
                "BROOKLYN",
                &["Unsafe Speed", "Driver Inattention/Distraction"],
                vec![0.8, 0.2],
                brooklyn,
            ),
            record("3", (2023, 6, 1), "BROOKLYN", &["Alcohol Involvement"], vec![0.0, 1.0], brooklyn),
        ] {
            store.upsert_record(&r).await.unwrap();
        }
        store
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("keyword".parse::<SearchStrategy>().unwrap(), SearchStrategy::Keyword);
        assert_eq!("Semantic".parse::<SearchStrategy>().unwrap(), SearchStrategy::Semantic);
        assert_eq!(" hybrid ".parse::<SearchStrategy>().unwrap(), SearchStrategy::Hybrid);
        assert!("fuzzy".parse::<SearchStrategy>().is_err());
    }

    #[test]
    fn test_strategy_alpha() {
        assert_eq!(SearchStrategy::Keyword.alpha(0.6), 0.0);
        assert_eq!(SearchStrategy::Semantic.alpha(0.6), 1.0);
        assert_eq!(SearchStrategy::Hybrid.alpha(0.6), 0.6);
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_normalize_range() {
        let candidates = vec![
            make_candidate("a", 10.0),
            make_candidate("b", 5.0),
            make_candidate("c", 0.0),
        ];
        let result = normalize_scores(&candidates);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
        assert!((result[1].1 - 0.5).abs() < 1e-9);
        assert!((result[2].1 - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_all_equal() {
        let candidates = vec![make_candidate("a", 3.0), make_candidate("b", 3.0)];
        for (_, score) in normalize_scores(&candidates) {
            assert!((score - 1.0).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_empty_query_returns_nothing() {
        let store = seeded_store().await;
        let req = SearchRequest {
            query: "   ",
            query_vec: None,
            strategy: SearchStrategy::Keyword,
            borough: None,
            near: None,
            params: params(10),
        };
        assert!(search(&store, &req).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_semantic_requires_query_vec() {
        let store = seeded_store().await;
        let req = SearchRequest {
            query: "speed",
            query_vec: None,
            strategy: SearchStrategy::Semantic,
            borough: None,
            near: None,
            params: params(10),
        };
        assert!(search(&store, &req).await.is_err());
    }

    #[tokio::test]
    async fn test_keyword_ties_break_by_newest_date() {
        let store = seeded_store().await;
        let req = SearchRequest {
            query: "speed",
            query_vec: None,
            strategy: SearchStrategy::Keyword,
            borough: None,
            near: None,
            params: params(10),
        };
        let hits = search(&store, &req).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.record.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]);
        assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.score)));
    }

    #[tokio::test]
    async fn test_semantic_orders_by_similarity() {
        let store = seeded_store().await;
        let qv = [0.0f32, 1.0];
        let req = SearchRequest {
            query: "drunk driving",
            query_vec: Some(&qv),
            strategy: SearchStrategy::Semantic,
            borough: None,
            near: None,
            params: params(2),
        };
        let hits = search(&store, &req).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.id, "3");
    }

    #[tokio::test]
    async fn test_borough_filter_case_insensitive() {
        let store = seeded_store().await;
        let qv = [1.0f32, 0.0];
        let req = SearchRequest {
            query: "speed",
            query_vec: Some(&qv),
            strategy: SearchStrategy::Hybrid,
            borough: Some("brooklyn"),
            near: None,
            params: params(10),
        };
        let hits = search(&store, &req).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.record.record.borough == "BROOKLYN"));
    }

    #[tokio::test]
    async fn test_near_filter() {
        let store = seeded_store().await;
        let req = SearchRequest {
            query: "speed",
            query_vec: None,
            strategy: SearchStrategy::Keyword,
            borough: None,
            near: Some(NearFilter {
                center: GeoPoint::new(-73.9850, 40.7585),
                radius_m: 500.0,
            }),
            params: params(10),
        };
        let hits = search(&store, &req).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, "1");
    }

    #[test]
    fn test_default_strategy_is_keyword() {
        assert_eq!(SearchStrategy::default(), SearchStrategy::Keyword);
        assert!(!SearchStrategy::default().needs_vector());
    }

    #[tokio::test]
    async fn test_filters_apply_before_candidate_cut() {
        let store = seeded_store().await;
        // Records 1 and 2 tie on "speed"; unfiltered, a cut of 1 keeps only 1.
        let mut p = params(10);
        p.candidate_k_keyword = 1;
        let req = SearchRequest {
            query: "speed",
            query_vec: None,
            strategy: SearchStrategy::Keyword,
            borough: Some("Brooklyn"),
            near: None,
            params: p,
        };
        let hits = search(&store, &req).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, "2");
    }

    #[tokio::test]
    async fn test_hit_serializes_without_embedding() {
        let store = seeded_store().await;
        let req = SearchRequest {
            query: "alcohol",
            query_vec: None,
            strategy: SearchStrategy::Keyword,
            borough: None,
            near: None,
            params: params(10),
        };
        let hits = search(&store, &req).await.unwrap();
        let value = serde_json::to_value(&hits[0]).unwrap();
        assert_eq!(value["id"], "3");
        assert_eq!(value["borough"], "BROOKLYN");
        assert_eq!(value["location"]["type"], "Point");
        assert_eq!(value["risk_score"], 0.2);
        assert!(value["score"].is_number());
        assert!(value.get("factors_embedding").is_none());
    }
}
