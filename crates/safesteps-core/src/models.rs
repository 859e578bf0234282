//! Core data models for crash records.
//!
//! A [`RawRow`] is one line of the source CSV, keyed by column name. The
//! transformer turns it into a [`NormalizedRecord`], which is later
//! enriched with an embedding and a risk score and handed to a
//! [`Store`](crate::store::Store).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Column holding the crash date (`MM/DD/YYYY`).
pub const COL_CRASH_DATE: &str = "CRASH DATE";
/// Column holding the crash time, passed through as-is.
pub const COL_CRASH_TIME: &str = "CRASH TIME";
/// Column holding the borough name.
pub const COL_BOROUGH: &str = "BOROUGH";
/// Column holding the latitude.
pub const COL_LATITUDE: &str = "LATITUDE";
/// Column holding the longitude.
pub const COL_LONGITUDE: &str = "LONGITUDE";
/// Column holding the pedestrian injury count.
pub const COL_PEDESTRIANS_INJURED: &str = "NUMBER OF PEDESTRIANS INJURED";
/// Optional column used as the record's identity.
pub const COL_COLLISION_ID: &str = "COLLISION_ID";

/// Number of `CONTRIBUTING FACTOR VEHICLE n` columns read per row.
pub const FACTOR_COLUMN_COUNT: usize = 5;

/// Placeholder value the source uses for "no factor recorded".
pub const UNSPECIFIED_FACTOR: &str = "Unspecified";

/// Name of the `n`th (1-based) contributing-factor column.
pub fn factor_column(n: usize) -> String {
    format!("CONTRIBUTING FACTOR VEHICLE {}", n)
}

/// One line of tabular input, keyed by exact column name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based data row number (the header line is not counted).
    pub row: u64,
    columns: Vec<(String, String)>,
}

impl RawRow {
    pub fn new(row: u64, columns: Vec<(String, String)>) -> Self {
        Self { row, columns }
    }

    /// Build a row from borrowed `(column, value)` pairs.
    pub fn from_pairs(row: u64, pairs: &[(&str, &str)]) -> Self {
        Self::new(
            row,
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    /// Value of the named column, if present.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    /// Identifying key used when reporting a rejected row.
    ///
    /// The `COLLISION_ID` column when present and non-empty, otherwise
    /// `row <n>`.
    pub fn key(&self) -> String {
        match self.get(COL_COLLISION_ID).map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("row {}", self.row),
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A WGS84 point. Serialized as a GeoJSON `Point`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "GeoJsonPoint", try_from = "GeoJsonPoint")]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPoint {
    pub const fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct GeoJsonPoint {
    #[serde(rename = "type")]
    kind: String,
    coordinates: [f64; 2],
}

impl From<GeoPoint> for GeoJsonPoint {
    fn from(p: GeoPoint) -> Self {
        Self {
            kind: "Point".to_string(),
            coordinates: [p.longitude, p.latitude],
        }
    }
}

impl TryFrom<GeoJsonPoint> for GeoPoint {
    type Error = String;

    fn try_from(g: GeoJsonPoint) -> Result<Self, Self::Error> {
        if g.kind != "Point" {
            return Err(format!("expected GeoJSON type 'Point', got '{}'", g.kind));
        }
        Ok(GeoPoint::new(g.coordinates[0], g.coordinates[1]))
    }
}

/// Derived fields attached by [`enrich`](crate::transform::enrich).
///
/// Both fields are set together or not at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub factors_embedding: Vec<f32>,
    pub risk_score: f64,
}

/// Canonical in-memory representation of one crash event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collision_id: Option<String>,
    pub crash_date: NaiveDate,
    pub crash_time: String,
    pub borough: String,
    pub location: GeoPoint,
    pub pedestrians_injured: u32,
    pub contributing_factors: Vec<String>,
    #[serde(flatten)]
    pub enrichment: Option<Enrichment>,
    /// Source row number; not part of the stored document.
    #[serde(skip)]
    pub row: u64,
}

impl NormalizedRecord {
    /// Contributing factors joined with single spaces (the embedding input).
    pub fn factors_text(&self) -> String {
        self.contributing_factors.join(" ")
    }

    pub fn is_enriched(&self) -> bool {
        self.enrichment.is_some()
    }

    pub fn risk_score(&self) -> Option<f64> {
        self.enrichment.as_ref().map(|e| e.risk_score)
    }

    pub fn factors_embedding(&self) -> Option<&[f32]> {
        self.enrichment
            .as_ref()
            .map(|e| e.factors_embedding.as_slice())
    }

    /// Identifying key for error reporting.
    pub fn key(&self) -> String {
        match &self.collision_id {
            Some(id) => id.clone(),
            None => format!("row {}", self.row),
        }
    }

    /// Stable document ID.
    ///
    /// The collision ID when the source provides one; otherwise a SHA-256
    /// over the parsed fields, so re-ingesting the same row upserts.
    pub fn document_id(&self) -> String {
        if let Some(id) = &self.collision_id {
            return id.clone();
        }

        let mut hasher = Sha256::new();
        hasher.update(self.crash_date.to_string().as_bytes());
        hasher.update([0]);
        hasher.update(self.crash_time.as_bytes());
        hasher.update([0]);
        hasher.update(self.borough.as_bytes());
        hasher.update([0]);
        hasher.update(self.location.longitude.to_le_bytes());
        hasher.update(self.location.latitude.to_le_bytes());
        hasher.update(self.pedestrians_injured.to_le_bytes());
        for factor in &self.contributing_factors {
            hasher.update([0]);
            hasher.update(factor.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}
