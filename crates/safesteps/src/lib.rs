//! # SafeSteps
//!
//! **Pedestrian-safety crash records: ingest, enrich, search, and score areas.**
//!
//! SafeSteps reads a tabular export of motor-vehicle crash reports, turns
//! each row into a normalized crash document with a GeoJSON location, embeds
//! its contributing factors, computes a pedestrian risk score, and stores
//! the result in SQLite for keyword, semantic, and geographic queries.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌───────────┐
//! │  CSV rows   │──▶│ Parse → Enrich    │──▶│  SQLite    │
//! │  (reader)   │   │ embed + risk      │   │ FTS5+Vec   │
//! └─────────────┘   └──────────────────┘   └─────┬─────┘
//!                                                │
//!                          ┌─────────────────────┤
//!                          ▼                     ▼
//!                     ┌──────────┐         ┌──────────┐
//!                     │   CLI    │         │   HTTP   │
//!                     │ (steps)  │         │  (axum)  │
//!                     └──────────┘         └──────────┘
//! ```
//!
//! The pure pieces (models, transformer, risk formula, store trait, search
//! algorithm) live in [`safesteps_core`]; this crate supplies SQLite, the
//! embedding providers, the ingestion driver, and the two front ends.
//!
//! ## Quick Start
//!
//! ```bash
//! steps init
//! steps ingest ./data/crashes.csv --rejects ./data/rejects.csv
//! steps search "driver inattention" --borough brooklyn
//! steps risk 40.6838 -73.976 --radius 400
//! steps serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Idempotent schema migrations |
//! | [`reader`] | CSV input as numbered raw rows |
//! | [`ingest`] | Ingestion driver: read → parse → enrich → store, with rejections |
//! | [`embedding`] | Embedding providers: disabled, OpenAI, Ollama, local |
//! | [`embed_cmd`] | Backfill embeddings for stored records |
//! | [`sqlite_store`] | SQLite implementation of the store trait |
//! | [`search`] | Keyword, semantic, and hybrid crash search |
//! | [`risk`] | Area risk around a point |
//! | [`get`] | Crash document retrieval by ID |
//! | [`export`] | NDJSON export of stored documents |
//! | [`stats`] | Record, embedding, and ingest-run statistics |
//! | [`server`] | HTTP API (Axum) with CORS |

pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod export;
pub mod get;
pub mod ingest;
pub mod migrate;
pub mod reader;
pub mod risk;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod stats;

pub use safesteps_core;
pub use safesteps_core::store;
