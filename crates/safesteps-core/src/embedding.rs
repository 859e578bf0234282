//! Embedder capability and vector utilities.
//!
//! [`TextEmbedder`] is the seam between the record transformer and whatever
//! produces embedding vectors (a hosted API, a local model, or a test stub).
//! Concrete HTTP and local providers live in the `safesteps` app crate.

use anyhow::Result;
use async_trait::async_trait;

/// Turns text into a fixed-length vector.
///
/// Implementations must be `Send + Sync`: a single embedder is shared by
/// every concurrent enrichment in an ingest run.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Maximum number of characters passed to [`embed`](Self::embed).
    ///
    /// Longer inputs are truncated by the caller. `None` means unlimited.
    fn max_input_chars(&self) -> Option<usize> {
        None
    }

    /// Embed a single text. Called at most once per record.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Truncate `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use safesteps_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, and
/// zero vectors (records with no contributing factors).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
