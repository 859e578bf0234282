//! Row transformer: [`parse`] a raw CSV row, then [`enrich`] it.
//!
//! `parse` is pure and synchronous. `enrich` awaits the injected
//! [`TextEmbedder`] at most once and attaches the embedding and the risk
//! score together, so a record is either fully enriched or not emitted.
//!
//! # Example
//!
//! ```rust
//! use safesteps_core::models::RawRow;
//! use safesteps_core::transform::parse;
//!
//! let row = RawRow::from_pairs(1, &[
//!     ("CRASH DATE", "03/04/2021"),
//!     ("LATITUDE", "40.7"),
//!     ("LONGITUDE", "-73.9"),
//!     ("NUMBER OF PEDESTRIANS INJURED", "2"),
//!     ("CONTRIBUTING FACTOR VEHICLE 1", "Driver Inattention"),
//!     ("CONTRIBUTING FACTOR VEHICLE 2", "Unspecified"),
//! ]);
//! let record = parse(&row).unwrap();
//! assert_eq!(record.contributing_factors, vec!["Driver Inattention"]);
//! assert!(record.enrichment.is_none());
//! ```

use chrono::NaiveDate;

use crate::embedding::{truncate_chars, TextEmbedder};
use crate::error::{EnrichmentError, MalformedRecordError};
use crate::models::{
    factor_column, Enrichment, GeoPoint, NormalizedRecord, RawRow, COL_BOROUGH, COL_COLLISION_ID,
    COL_CRASH_DATE, COL_CRASH_TIME, COL_LATITUDE, COL_LONGITUDE, COL_PEDESTRIANS_INJURED,
    FACTOR_COLUMN_COUNT, UNSPECIFIED_FACTOR,
};
use crate::risk::risk_score;

/// Format of the `CRASH DATE` column.
pub const CRASH_DATE_FORMAT: &str = "%m/%d/%Y";

/// Convert one raw row into a [`NormalizedRecord`] with no enrichment.
///
/// # Errors
///
/// Returns [`MalformedRecordError`] when the date, latitude, longitude, or
/// pedestrian count column is missing or unparsable, or the count is
/// negative.
pub fn parse(row: &RawRow) -> Result<NormalizedRecord, MalformedRecordError> {
    let date_raw = required(row, COL_CRASH_DATE)?;
    let crash_date = NaiveDate::parse_from_str(date_raw, CRASH_DATE_FORMAT).map_err(|e| {
        malformed(
            row,
            COL_CRASH_DATE,
            format!("'{}' is not a MM/DD/YYYY date: {}", date_raw, e),
        )
    })?;

    let longitude = parse_coordinate(required(row, COL_LONGITUDE)?)
        .map_err(|reason| malformed(row, COL_LONGITUDE, reason))?;
    let latitude = parse_coordinate(required(row, COL_LATITUDE)?)
        .map_err(|reason| malformed(row, COL_LATITUDE, reason))?;

    let pedestrians_injured = parse_count(required(row, COL_PEDESTRIANS_INJURED)?)
        .map_err(|reason| malformed(row, COL_PEDESTRIANS_INJURED, reason))?;

    let contributing_factors = (1..=FACTOR_COLUMN_COUNT)
        .filter_map(|n| row.get(&factor_column(n)))
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != UNSPECIFIED_FACTOR)
        .map(str::to_string)
        .collect();

    let collision_id = row
        .get(COL_COLLISION_ID)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    Ok(NormalizedRecord {
        collision_id,
        crash_date,
        crash_time: row.get(COL_CRASH_TIME).unwrap_or_default().to_string(),
        borough: row.get(COL_BOROUGH).unwrap_or_default().to_string(),
        location: GeoPoint::new(longitude, latitude),
        pedestrians_injured,
        contributing_factors,
        enrichment: None,
        row: row.row,
    })
}

fn malformed(row: &RawRow, field: &str, reason: String) -> MalformedRecordError {
    MalformedRecordError {
        row: row.row,
        key: row.key(),
        field: field.to_string(),
        reason,
    }
}

/// Trimmed value of a column that must be present.
fn required<'a>(row: &'a RawRow, field: &str) -> Result<&'a str, MalformedRecordError> {
    row.get(field)
        .map(str::trim)
        .ok_or_else(|| malformed(row, field, "column missing".to_string()))
}

fn parse_coordinate(raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .parse()
        .map_err(|_| format!("'{}' is not a number", raw))?;
    if !value.is_finite() {
        return Err(format!("'{}' is not a finite number", raw));
    }
    Ok(value)
}

fn parse_count(raw: &str) -> Result<u32, String> {
    let value: i64 = raw
        .parse()
        .map_err(|_| format!("'{}' is not an integer", raw))?;
    if value < 0 {
        return Err(format!("count must be non-negative, got {}", value));
    }
    u32::try_from(value).map_err(|_| format!("count {} is out of range", value))
}

/// Attach the factors embedding and risk score to a parsed record.
///
/// When the record has no contributing factors, `embedder` is not called
/// and the embedding is a zero vector of `embedder.dims()` length.
///
/// # Errors
///
/// Returns [`EnrichmentError`] if the embedder fails or returns a vector
/// of the wrong length. The record is consumed either way.
pub async fn enrich(
    mut record: NormalizedRecord,
    embedder: &dyn TextEmbedder,
) -> Result<NormalizedRecord, EnrichmentError> {
    let text = record.factors_text();
    let expected = embedder.dims();

    let factors_embedding = if text.is_empty() {
        vec![0.0; expected]
    } else {
        let input = match embedder.max_input_chars() {
            Some(max) => truncate_chars(&text, max),
            None => text.as_str(),
        };
        let vector = embedder
            .embed(input)
            .await
            .map_err(|source| EnrichmentError::Embedder {
                key: record.key(),
                source,
            })?;
        if vector.len() != expected {
            return Err(EnrichmentError::DimensionMismatch {
                key: record.key(),
                expected,
                actual: vector.len(),
            });
        }
        vector
    };

    record.enrichment = Some(Enrichment {
        factors_embedding,
        risk_score: risk_score(record.pedestrians_injured),
    });
    Ok(record)
}
