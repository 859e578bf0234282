//! # SafeSteps Core
//!
//! Pure logic for SafeSteps: crash record models, the record transformer,
//! risk scoring, geo helpers, the store abstraction, the search algorithm,
//! and the embedding trait.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or logging. The
//! application crate supplies storage, embedding providers, and drivers.

pub mod embedding;
pub mod error;
pub mod geo;
pub mod models;
pub mod risk;
pub mod search;
pub mod store;
pub mod transform;
