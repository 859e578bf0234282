//! HTTP routes driven in-process with `oneshot` over an in-memory store.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::NaiveDate;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use safesteps::config::RetrievalConfig;
use safesteps::embedding::DisabledEmbedder;
use safesteps::safesteps_core::models::{Enrichment, GeoPoint, NormalizedRecord};
use safesteps::safesteps_core::store::memory::InMemoryStore;
use safesteps::safesteps_core::store::{RecordCandidate, RecordFilter, Store, StoredRecord};
use safesteps::server::{build_router, AppState};

fn record(id: &str, date: (i32, u32, u32), borough: &str, lat: f64, injured: u32, factor: &str) -> NormalizedRecord {
    NormalizedRecord {
        collision_id: Some(id.to_string()),
        crash_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
        crash_time: "9:15".to_string(),
        borough: borough.to_string(),
        location: GeoPoint::new(-73.976, lat),
        pedestrians_injured: injured,
        contributing_factors: vec![factor.to_string()],
        enrichment: Some(Enrichment {
            factors_embedding: Vec::new(),
            risk_score: f64::min(injured as f64 * 0.2, 1.0),
        }),
        row: 1,
    }
}

async fn app() -> Router {
    let store = InMemoryStore::new();
    for r in [
        record("4455765", (2023, 12, 1), "BROOKLYN", 40.6838, 2, "Driver Inattention/Distraction"),
        record("4455766", (2023, 12, 2), "BROOKLYN", 40.6840, 4, "Unsafe Speed"),
        record("4455767", (2024, 1, 5), "MANHATTAN", 40.7580, 0, "Driver Inattention/Distraction"),
    ] {
        store.upsert_record(&r).await.unwrap();
    }

    build_router(AppState {
        store: Arc::new(store),
        embedder: Arc::new(DisabledEmbedder),
        retrieval: Arc::new(RetrievalConfig::default()),
    })
}

/// A store whose every call fails, as when the database file is gone.
struct UnreachableStore;

#[async_trait]
impl Store for UnreachableStore {
    async fn upsert_record(&self, _record: &NormalizedRecord) -> anyhow::Result<String> {
        anyhow::bail!("database is locked")
    }

    async fn get_record(&self, _id: &str) -> anyhow::Result<Option<StoredRecord>> {
        anyhow::bail!("database is locked")
    }

    async fn keyword_search(
        &self,
        _query: &str,
        _filter: &RecordFilter<'_>,
        _limit: i64,
    ) -> anyhow::Result<Vec<RecordCandidate>> {
        anyhow::bail!("database is locked")
    }

    async fn vector_search(
        &self,
        _query_vec: &[f32],
        _filter: &RecordFilter<'_>,
        _limit: i64,
    ) -> anyhow::Result<Vec<RecordCandidate>> {
        anyhow::bail!("database is locked")
    }

    async fn records_within(
        &self,
        _center: GeoPoint,
        _radius_m: f64,
    ) -> anyhow::Result<Vec<StoredRecord>> {
        anyhow::bail!("database is locked")
    }
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.expect("handler should respond");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body must be collected")
        .to_bytes();
    let value: Value = serde_json::from_slice(bytes.as_ref())
        .unwrap_or_else(|err| panic!("invalid json: {err}"));
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request builder must not fail")
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request builder must not fail")
}

#[tokio::test]
async fn health_reports_store_and_embedding_state() {
    let (status, body) = send(app().await, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
    assert_eq!(body["database"], json!("ok"));
    assert_eq!(body["embedding"], json!("disabled"));
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn health_is_degraded_when_store_fails() {
    let app = build_router(AppState {
        store: Arc::new(UnreachableStore),
        embedder: Arc::new(DisabledEmbedder),
        retrieval: Arc::new(RetrievalConfig::default()),
    });
    let (status, body) = send(app, get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], json!("degraded"));
    assert_eq!(body["database"], json!("error"));
}

#[tokio::test]
async fn search_defaults_to_keyword_without_embeddings() {
    let (status, body) = send(app().await, post_json("/api/search", json!({ "query": "speed" }))).await;
    assert_eq!(status, StatusCode::OK);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["id"], json!("4455766"));
    assert_eq!(results[0]["semantic_score"], json!(0.0));
}

#[tokio::test]
async fn search_results_omit_embedding() {
    let (status, body) = send(app().await, post_json("/api/search", json!({ "query": "inattention" }))).await;
    assert_eq!(status, StatusCode::OK);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    for hit in results {
        assert!(hit.get("factors_embedding").is_none(), "hit={}", hit);
        assert!(hit["risk_score"].is_number());
    }
}

#[tokio::test]
async fn keyword_search_returns_results_with_borough_filter() {
    let request = post_json(
        "/api/search",
        json!({ "query": "inattention", "mode": "keyword", "borough": "brooklyn" }),
    );
    let (status, body) = send(app().await, request).await;
    assert_eq!(status, StatusCode::OK);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["id"], json!("4455765"));
    assert_eq!(results[0]["location"]["type"], json!("Point"));
    assert!(results[0]["score"].is_number());
}

#[tokio::test]
async fn search_near_filter_limits_by_distance() {
    let request = post_json(
        "/api/search",
        json!({
            "query": "inattention",
            "mode": "keyword",
            "near": { "lat": 40.758, "lng": -73.976, "radius_m": 200.0 }
        }),
    );
    let (status, body) = send(app().await, request).await;
    assert_eq!(status, StatusCode::OK);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["id"], json!("4455767"));
}

#[tokio::test]
async fn empty_query_is_bad_request() {
    let (status, body) = send(app().await, post_json("/api/search", json!({ "query": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("bad_request"));
}

#[tokio::test]
async fn unknown_mode_is_bad_request() {
    let request = post_json("/api/search", json!({ "query": "speed", "mode": "fuzzy" }));
    let (status, body) = send(app().await, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("bad_request"));
}

#[tokio::test]
async fn zero_limit_is_bad_request() {
    let request = post_json(
        "/api/search",
        json!({ "query": "speed", "mode": "keyword", "limit": 0 }),
    );
    let (status, _) = send(app().await, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn hybrid_search_without_embeddings_is_rejected() {
    let request = post_json("/api/search", json!({ "query": "speed", "mode": "hybrid" }));
    let (status, body) = send(app().await, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("embeddings_disabled"));
}

#[tokio::test]
async fn risk_summarizes_crashes_in_radius() {
    let (status, body) = send(app().await, get("/api/risk/40.6839/-73.976?radius_m=100")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["crash_count"], json!(2));
    assert_eq!(body["pedestrians_injured"], json!(6));
    let score = body["risk_score"].as_f64().unwrap();
    assert!((score - 0.6).abs() < 1e-9, "risk_score was {}", score);
}

#[tokio::test]
async fn risk_with_no_crashes_is_zero() {
    let (status, body) = send(app().await, get("/api/risk/40.0/-74.5")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["crash_count"], json!(0));
    assert_eq!(body["risk_score"], json!(0.0));
}

#[tokio::test]
async fn risk_rejects_bad_coordinates() {
    let (status, body) = send(app().await, get("/api/risk/abc/-73.9")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("bad_request"));

    let (status, _) = send(app().await, get("/api/risk/95.0/-73.9")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(app().await, get("/api/risk/40.7/-73.9?radius_m=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_crash_returns_serialized_document() {
    let (status, body) = send(app().await, get("/api/crashes/4455766")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], json!("4455766"));
    assert_eq!(body["crash_date"], json!("2023-12-02"));
    assert_eq!(body["pedestrians_injured"], json!(4));
    assert_eq!(body["location"]["coordinates"], json!([-73.976, 40.684]));
}

#[tokio::test]
async fn get_missing_crash_is_not_found() {
    let (status, body) = send(app().await, get("/api/crashes/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], json!("not_found"));
}
