//! Storage abstraction for enriched crash records.
//!
//! The [`Store`] trait is the output sink of the ingest pipeline and the
//! backing index for search and area risk. Backends: the in-memory
//! [`memory::InMemoryStore`] here, and the SQLite store in the app crate.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::geo::NearFilter;
use crate::models::{GeoPoint, NormalizedRecord};

/// A candidate record returned from keyword or vector search.
#[derive(Debug, Clone)]
pub struct RecordCandidate {
    /// Document ID of the record.
    pub record_id: String,
    /// Raw score from the search backend (negated BM25 rank or cosine similarity).
    pub raw_score: f64,
}

/// A record as held by a store, with its document ID.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    pub id: String,
    #[serde(flatten)]
    pub record: NormalizedRecord,
}

/// Borough and location restrictions on search candidates.
///
/// Stores apply the filter before cutting candidates to `limit`, so a
/// narrow filter still fills the candidate set from matching records.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordFilter<'a> {
    /// Case-insensitive borough match.
    pub borough: Option<&'a str>,
    pub near: Option<NearFilter>,
}

impl<'a> RecordFilter<'a> {
    /// The borough to match, trimmed; `None` when unset or blank.
    pub fn borough(&self) -> Option<&'a str> {
        self.borough.map(str::trim).filter(|b| !b.is_empty())
    }

    pub fn matches(&self, record: &NormalizedRecord) -> bool {
        if let Some(borough) = self.borough() {
            if !record.borough.eq_ignore_ascii_case(borough) {
                return false;
            }
        }
        match &self.near {
            Some(near) => near.matches(record.location),
            None => true,
        }
    }
}

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_record`](Store::upsert_record) | Insert or replace an enriched record |
/// | [`get_record`](Store::get_record) | Fetch a record by document ID |
/// | [`keyword_search`](Store::keyword_search) | Full-text match over factors and borough |
/// | [`vector_search`](Store::vector_search) | Cosine similarity over factor embeddings |
/// | [`records_within`](Store::records_within) | Records within a radius of a point |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or replace an enriched record; returns its document ID.
    ///
    /// Records without enrichment are rejected with an error.
    async fn upsert_record(&self, record: &NormalizedRecord) -> Result<String>;

    async fn get_record(&self, id: &str) -> Result<Option<StoredRecord>>;

    /// Best `limit` keyword matches among records passing `filter`.
    async fn keyword_search(
        &self,
        query: &str,
        filter: &RecordFilter<'_>,
        limit: i64,
    ) -> Result<Vec<RecordCandidate>>;

    /// Best `limit` records by cosine similarity among those passing
    /// `filter` whose embedding has the query's length.
    async fn vector_search(
        &self,
        query_vec: &[f32],
        filter: &RecordFilter<'_>,
        limit: i64,
    ) -> Result<Vec<RecordCandidate>>;

    async fn records_within(&self, center: GeoPoint, radius_m: f64) -> Result<Vec<StoredRecord>>;
}

/// Text indexed for keyword search: contributing factors and borough.
pub fn searchable_text(record: &NormalizedRecord) -> String {
    let mut parts: Vec<&str> = record
        .contributing_factors
        .iter()
        .map(String::as_str)
        .collect();
    if !record.borough.is_empty() {
        parts.push(&record.borough);
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Enrichment;
    use chrono::NaiveDate;

    fn record(borough: &str, lng: f64, lat: f64) -> NormalizedRecord {
        NormalizedRecord {
            collision_id: None,
            crash_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            crash_time: String::new(),
            borough: borough.to_string(),
            location: GeoPoint::new(lng, lat),
            pedestrians_injured: 0,
            contributing_factors: Vec::new(),
            enrichment: Some(Enrichment {
                factors_embedding: Vec::new(),
                risk_score: 0.0,
            }),
            row: 1,
        }
    }

    #[test]
    fn test_filter_borough_and_near() {
        let r = record("QUEENS", -73.8, 40.7);
        assert!(RecordFilter::default().matches(&r));
        assert!(RecordFilter {
            borough: Some(" queens "),
            near: None
        }
        .matches(&r));
        assert!(!RecordFilter {
            borough: Some("BRONX"),
            near: None
        }
        .matches(&r));
        // Blank borough means no restriction.
        assert!(RecordFilter {
            borough: Some("  "),
            near: None
        }
        .matches(&r));

        let near = NearFilter {
            center: GeoPoint::new(-73.8, 40.7005),
            radius_m: 100.0,
        };
        assert!(RecordFilter {
            borough: None,
            near: Some(near)
        }
        .matches(&r));
        assert!(!RecordFilter {
            borough: None,
            near: Some(NearFilter {
                radius_m: 10.0,
                ..near
            })
        }
        .matches(&r));
    }
}
