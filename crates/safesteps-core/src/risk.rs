//! Risk scoring.
//!
//! The per-record score is a linear clamp on the pedestrian injury count.
//! It is a placeholder derivation, not a learned prediction, and its exact
//! formula is part of the stored document contract.

use serde::Serialize;

use crate::models::GeoPoint;
use crate::store::StoredRecord;

/// Weight applied per injured pedestrian.
pub const RISK_PER_PEDESTRIAN: f64 = 0.2;

/// `min(pedestrians_injured * 0.2, 1.0)`.
pub fn risk_score(pedestrians_injured: u32) -> f64 {
    (pedestrians_injured as f64 * RISK_PER_PEDESTRIAN).min(1.0)
}

/// Risk summary for the crashes around a point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaRisk {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f64,
    /// Mean of the per-record risk scores; `0.0` when no crashes are nearby.
    pub risk_score: f64,
    pub crash_count: usize,
    pub pedestrians_injured: u64,
}

/// Summarize `records`, which the caller has already limited to `radius_m`
/// around `center`.
pub fn area_risk(center: GeoPoint, radius_m: f64, records: &[StoredRecord]) -> AreaRisk {
    let crash_count = records.len();
    let pedestrians_injured = records
        .iter()
        .map(|r| r.record.pedestrians_injured as u64)
        .sum();

    let risk = if crash_count == 0 {
        0.0
    } else {
        let total: f64 = records
            .iter()
            .map(|r| {
                r.record
                    .risk_score()
                    .unwrap_or_else(|| risk_score(r.record.pedestrians_injured))
            })
            .sum();
        (total / crash_count as f64).clamp(0.0, 1.0)
    };

    AreaRisk {
        latitude: center.latitude,
        longitude: center.longitude,
        radius_m,
        risk_score: risk,
        crash_count,
        pedestrians_injured,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Enrichment, NormalizedRecord};
    use chrono::NaiveDate;

    fn stored(id: &str, injured: u32) -> StoredRecord {
        StoredRecord {
            id: id.to_string(),
            record: NormalizedRecord {
                collision_id: Some(id.to_string()),
                crash_date: NaiveDate::from_ymd_opt(2023, 12, 1).unwrap(),
                crash_time: "08:30".to_string(),
                borough: "MANHATTAN".to_string(),
                location: GeoPoint::new(-73.9855, 40.758),
                pedestrians_injured: injured,
                contributing_factors: Vec::new(),
                enrichment: Some(Enrichment {
                    factors_embedding: vec![0.0; 2],
                    risk_score: risk_score(injured),
                }),
                row: 1,
            },
        }
    }

    #[test]
    fn test_risk_score_formula() {
        assert_eq!(risk_score(0), 0.0);
        assert_eq!(risk_score(2), 2.0 * 0.2);
        assert_eq!(risk_score(3), 3.0 * 0.2);
        assert!((risk_score(3) - 0.6).abs() < 1e-12);
        assert_eq!(risk_score(5), 1.0);
        assert_eq!(risk_score(10), 1.0);
        assert_eq!(risk_score(100), 1.0);
        assert_eq!(risk_score(u32::MAX), 1.0);
    }

    #[test]
    fn test_risk_score_in_unit_interval() {
        for n in 0..50 {
            let r = risk_score(n);
            assert!((0.0..=1.0).contains(&r), "n={} r={}", n, r);
        }
    }

    #[test]
    fn test_area_risk_empty() {
        let center = GeoPoint::new(-73.9, 40.7);
        let risk = area_risk(center, 500.0, &[]);
        assert_eq!(risk.crash_count, 0);
        assert_eq!(risk.risk_score, 0.0);
        assert_eq!(risk.pedestrians_injured, 0);
    }

    #[test]
    fn test_area_risk_mean() {
        let center = GeoPoint::new(-73.9855, 40.758);
        let records = vec![stored("a", 1), stored("b", 3), stored("c", 10)];
        let risk = area_risk(center, 250.0, &records);
        assert_eq!(risk.crash_count, 3);
        assert_eq!(risk.pedestrians_injured, 14);
        let expected = (0.2 + 3.0 * 0.2 + 1.0) / 3.0;
        assert!((risk.risk_score - expected).abs() < 1e-12);
        assert_eq!(risk.radius_m, 250.0);
    }
}
