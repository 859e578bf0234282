//! Error kinds raised by the record transformer.

use thiserror::Error;

/// A row that cannot be turned into a [`NormalizedRecord`](crate::models::NormalizedRecord).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed record {key} (row {row}): {field}: {reason}")]
pub struct MalformedRecordError {
    /// 1-based data row number.
    pub row: u64,
    /// Identifying key of the row (collision ID or `row <n>`).
    pub key: String,
    /// Column that failed to parse.
    pub field: String,
    pub reason: String,
}

/// Enrichment failed; the record is not emitted.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("embedding failed for record {key}: {source}")]
    Embedder {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("embedding for record {key} has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        key: String,
        expected: usize,
        actual: usize,
    },
}

impl EnrichmentError {
    pub fn key(&self) -> &str {
        match self {
            EnrichmentError::Embedder { key, .. } => key,
            EnrichmentError::DimensionMismatch { key, .. } => key,
        }
    }
}
