//! In-memory [`Store`] implementation for tests and small datasets.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity; keyword search scores each record by the
//! number of query terms found in its factors and borough.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::geo::distance_m;
use crate::models::{GeoPoint, NormalizedRecord};

use super::{searchable_text, RecordCandidate, RecordFilter, Store, StoredRecord};

/// In-memory store keyed by document ID.
pub struct InMemoryStore {
    records: RwLock<HashMap<String, NormalizedRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

fn sort_and_truncate(candidates: &mut Vec<RecordCandidate>, limit: i64) {
    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.record_id.cmp(&b.record_id))
    });
    candidates.truncate(limit.max(0) as usize);
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_record(&self, record: &NormalizedRecord) -> Result<String> {
        if !record.is_enriched() {
            bail!("record {} has not been enriched", record.key());
        }
        let id = record.document_id();
        self.records
            .write()
            .map_err(poisoned)?
            .insert(id.clone(), record.clone());
        Ok(id)
    }

    async fn get_record(&self, id: &str) -> Result<Option<StoredRecord>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(id).map(|r| StoredRecord {
            id: id.to_string(),
            record: r.clone(),
        }))
    }

    async fn keyword_search(
        &self,
        query: &str,
        filter: &RecordFilter<'_>,
        limit: i64,
    ) -> Result<Vec<RecordCandidate>> {
        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.records.read().map_err(poisoned)?;
        let mut candidates: Vec<RecordCandidate> = records
            .iter()
            .filter(|(_, record)| filter.matches(record))
            .filter_map(|(id, record)| {
                let text = searchable_text(record).to_lowercase();
                let matches = terms.iter().filter(|t| text.contains(*t)).count();
                (matches > 0).then(|| RecordCandidate {
                    record_id: id.clone(),
                    raw_score: matches as f64,
                })
            })
            .collect();

        sort_and_truncate(&mut candidates, limit);
        Ok(candidates)
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        filter: &RecordFilter<'_>,
        limit: i64,
    ) -> Result<Vec<RecordCandidate>> {
        let records = self.records.read().map_err(poisoned)?;
        let mut candidates: Vec<RecordCandidate> = records
            .iter()
            .filter(|(_, record)| filter.matches(record))
            .filter_map(|(id, record)| {
                record
                    .factors_embedding()
                    .filter(|emb| !emb.is_empty() && emb.len() == query_vec.len())
                    .map(|emb| RecordCandidate {
                        record_id: id.clone(),
                        raw_score: cosine_similarity(query_vec, emb) as f64,
                    })
            })
            .collect();

        sort_and_truncate(&mut candidates, limit);
        Ok(candidates)
    }

    async fn records_within(&self, center: GeoPoint, radius_m: f64) -> Result<Vec<StoredRecord>> {
        let records = self.records.read().map_err(poisoned)?;
        let mut found: Vec<StoredRecord> = records
            .iter()
            .filter(|(_, r)| distance_m(center, r.location) <= radius_m)
            .map(|(id, r)| StoredRecord {
                id: id.clone(),
                record: r.clone(),
            })
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Enrichment;
    use chrono::NaiveDate;

    fn record(id: &str, factors: &[&str], emb: Vec<f32>, lng: f64, lat: f64) -> NormalizedRecord {
        NormalizedRecord {
            collision_id: Some(id.to_string()),
            crash_date: NaiveDate::from_ymd_opt(2023, 12, 1).unwrap(),
            crash_time: "12:00".to_string(),
            borough: "BROOKLYN".to_string(),
            location: GeoPoint::new(lng, lat),
            pedestrians_injured: 1,
            contributing_factors: factors.iter().map(|s| s.to_string()).collect(),
            enrichment: Some(Enrichment {
                factors_embedding: emb,
                risk_score: 0.2,
            }),
            row: 1,
        }
    }

    #[tokio::test]
    async fn test_upsert_requires_enrichment() {
        let store = InMemoryStore::new();
        let mut r = record("1", &["Unsafe Speed"], vec![1.0, 0.0], -73.97, 40.68);
        r.enrichment = None;
        assert!(store.upsert_record(&r).await.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_id() {
        let store = InMemoryStore::new();
        let r = record("1", &["Unsafe Speed"], vec![1.0, 0.0], -73.97, 40.68);
        store.upsert_record(&r).await.unwrap();
        store.upsert_record(&r).await.unwrap();
        assert_eq!(store.len(), 1);
        let got = store.get_record("1").await.unwrap().unwrap();
        assert_eq!(got.record.contributing_factors, vec!["Unsafe Speed"]);
    }

    #[tokio::test]
    async fn test_keyword_and_vector_search() {
        let store = InMemoryStore::new();
        store
            .upsert_record(&record("1", &["Unsafe Speed"], vec![1.0, 0.0], -73.97, 40.68))
            .await
            .unwrap();
        store
            .upsert_record(&record("2", &["Alcohol Involvement"], vec![0.0, 1.0], -73.97, 40.68))
            .await
            .unwrap();

        let all = RecordFilter::default();
        let kw = store.keyword_search("speed", &all, 10).await.unwrap();
        assert_eq!(kw.len(), 1);
        assert_eq!(kw[0].record_id, "1");

        let vs = store.vector_search(&[0.1, 0.9], &all, 1).await.unwrap();
        assert_eq!(vs.len(), 1);
        assert_eq!(vs[0].record_id, "2");

        // Embeddings of another length are never compared.
        let vs = store.vector_search(&[0.1, 0.9, 0.0], &all, 10).await.unwrap();
        assert!(vs.is_empty());
    }

    #[tokio::test]
    async fn test_filter_applies_before_limit() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            let mut r = record(
                &format!("bk{}", i),
                &["Unsafe Speed", "Unsafe Speed"],
                vec![1.0, 0.0],
                -73.97,
                40.68,
            );
            r.contributing_factors.push("Speed".to_string());
            store.upsert_record(&r).await.unwrap();
        }
        let mut queens = record("qn", &["Unsafe Speed"], vec![0.5, 0.5], -73.8, 40.7);
        queens.borough = "QUEENS".to_string();
        store.upsert_record(&queens).await.unwrap();

        let filter = RecordFilter {
            borough: Some("queens"),
            near: None,
        };
        let kw = store.keyword_search("unsafe speed", &filter, 2).await.unwrap();
        assert_eq!(kw.len(), 1);
        assert_eq!(kw[0].record_id, "qn");

        let vs = store.vector_search(&[1.0, 0.0], &filter, 2).await.unwrap();
        assert_eq!(vs.len(), 1);
        assert_eq!(vs[0].record_id, "qn");
    }

    #[tokio::test]
    async fn test_records_within_radius() {
        let store = InMemoryStore::new();
        store
            .upsert_record(&record("near", &[], vec![0.0, 0.0], -73.9855, 40.7580))
            .await
            .unwrap();
        store
            .upsert_record(&record("far", &[], vec![0.0, 0.0], -73.9760, 40.6838))
            .await
            .unwrap();

        let found = store
            .records_within(GeoPoint::new(-73.9850, 40.7585), 500.0)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "near");
    }
}
