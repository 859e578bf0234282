//! HTTP API server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Status, version, database and embedding state |
//! | `POST` | `/api/search` | Keyword / semantic / hybrid crash search |
//! | `GET`  | `/api/risk/{lat}/{lng}` | Area risk around a point (`?radius_m=`) |
//! | `GET`  | `/api/crashes/{id}` | One stored crash document |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `embeddings_disabled` (400),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use safesteps_core::embedding::TextEmbedder;
use safesteps_core::models::GeoPoint;
use safesteps_core::risk::AreaRisk;
use safesteps_core::store::{Store, StoredRecord};

use crate::config::{Config, RetrievalConfig};
use crate::db;
use crate::embedding::create_embedder;
use crate::migrate;
use crate::risk::area_risk_at;
use crate::search::{
    check_coordinates, search_records, EmbeddingsDisabled, NearFilter, SearchHit, SearchOptions,
    SearchStrategy,
};
use crate::sqlite_store::SqliteStore;

/// Shared state passed to every handler via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub embedder: Arc<dyn TextEmbedder>,
    pub retrieval: Arc<RetrievalConfig>,
}

/// Build the API router. Tests drive it directly with an in-memory store.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/search", post(handle_search))
        .route("/api/risk/{lat}/{lng}", get(handle_risk))
        .route("/api/crashes/{id}", get(handle_get_crash))
        .layer(cors)
        .with_state(state)
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    let embedder = create_embedder(&config.embedding)?;

    let state = AppState {
        store: Arc::new(SqliteStore::new(pool).with_model(embedder.model_name())),
        embedder,
        retrieval: Arc::new(config.retrieval.clone()),
    };

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "server listening");
    println!("SafeSteps API listening on http://{}", config.server.bind);

    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// Error type that converts into a JSON HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(disabled) = err.downcast_ref::<EmbeddingsDisabled>() {
            return Self {
                status: StatusCode::BAD_REQUEST,
                code: "embeddings_disabled",
                message: disabled.to_string(),
            };
        }
        tracing::error!(error = %format!("{:#}", err), "request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: format!("{:#}", err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    database: &'static str,
    embedding: String,
}

/// 200 `ok` when the store answers, 503 `degraded` when it does not.
async fn handle_health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    // Cheapest round trip through the store.
    let (status, health, database) = match state.store.get_record("").await {
        Ok(_) => (StatusCode::OK, "ok", "ok"),
        Err(e) => {
            tracing::warn!(error = %e, "health check: store unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, "degraded", "error")
        }
    };
    let embedding = if state.embedder.dims() == 0 {
        "disabled".to_string()
    } else {
        state.embedder.model_name().to_string()
    };

    (
        status,
        Json(HealthResponse {
            status: health,
            version: env!("CARGO_PKG_VERSION"),
            database,
            embedding,
        }),
    )
}

// ============ POST /api/search ============

#[derive(Debug, Deserialize)]
pub struct NearParams {
    pub lat: f64,
    pub lng: f64,
    pub radius_m: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct SearchBody {
    pub query: String,
    pub mode: Option<String>,
    pub borough: Option<String>,
    pub near: Option<NearParams>,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

fn positive_radius(radius_m: f64) -> Result<f64, AppError> {
    if radius_m.is_finite() && radius_m > 0.0 {
        Ok(radius_m)
    } else {
        Err(AppError::bad_request(format!(
            "radius_m must be > 0, got {}",
            radius_m
        )))
    }
}

async fn handle_search(
    State(state): State<AppState>,
    Json(body): Json<SearchBody>,
) -> Result<Json<SearchResponse>, AppError> {
    if body.query.trim().is_empty() {
        return Err(AppError::bad_request("query must not be empty"));
    }

    let mode = match body.mode.as_deref() {
        Some(m) => m
            .parse::<SearchStrategy>()
            .map_err(|e| AppError::bad_request(e.to_string()))?,
        None => SearchStrategy::default(),
    };

    if let Some(limit) = body.limit {
        if limit < 1 {
            return Err(AppError::bad_request("limit must be >= 1"));
        }
    }

    let near = match &body.near {
        Some(n) => {
            check_coordinates(n.lat, n.lng).map_err(AppError::bad_request)?;
            Some(NearFilter {
                center: GeoPoint::new(n.lng, n.lat),
                radius_m: positive_radius(n.radius_m.unwrap_or(state.retrieval.near_radius_m))?,
            })
        }
        None => None,
    };

    let opts = SearchOptions {
        mode,
        borough: body.borough.filter(|b| !b.trim().is_empty()),
        near,
        limit: body.limit,
    };

    let results = search_records(
        state.store.as_ref(),
        state.embedder.as_ref(),
        &state.retrieval,
        &body.query,
        &opts,
    )
    .await?;

    Ok(Json(SearchResponse { results }))
}

// ============ GET /api/risk/{lat}/{lng} ============

#[derive(Debug, Deserialize)]
pub struct RiskQuery {
    pub radius_m: Option<f64>,
}

async fn handle_risk(
    State(state): State<AppState>,
    Path((lat, lng)): Path<(String, String)>,
    Query(params): Query<RiskQuery>,
) -> Result<Json<AreaRisk>, AppError> {
    let lat: f64 = lat
        .parse()
        .map_err(|_| AppError::bad_request(format!("invalid latitude: {}", lat)))?;
    let lng: f64 = lng
        .parse()
        .map_err(|_| AppError::bad_request(format!("invalid longitude: {}", lng)))?;
    check_coordinates(lat, lng).map_err(AppError::bad_request)?;
    let radius_m = positive_radius(params.radius_m.unwrap_or(state.retrieval.near_radius_m))?;

    let risk = area_risk_at(state.store.as_ref(), GeoPoint::new(lng, lat), radius_m).await?;
    Ok(Json(risk))
}

// ============ GET /api/crashes/{id} ============

async fn handle_get_crash(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StoredRecord>, AppError> {
    match state.store.get_record(&id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(AppError::not_found(format!("crash record not found: {}", id))),
    }
}
