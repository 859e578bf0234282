//! Great-circle distance and bounding boxes for the `near` filter.

use crate::models::GeoPoint;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Haversine distance between two points, in meters.
pub fn distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lng = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Axis-aligned box that contains every point within `radius_m` of `center`.
///
/// Used as a cheap SQL prefilter; callers still check [`distance_m`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn around(center: GeoPoint, radius_m: f64) -> Self {
        let d_lat = (radius_m / EARTH_RADIUS_M).to_degrees();
        let cos_lat = center.latitude.to_radians().cos().abs().max(1e-6);
        let d_lng = (radius_m / (EARTH_RADIUS_M * cos_lat)).to_degrees().min(180.0);
        Self {
            west: center.longitude - d_lng,
            south: center.latitude - d_lat,
            east: center.longitude + d_lng,
            north: center.latitude + d_lat,
        }
    }

    pub fn contains(&self, p: GeoPoint) -> bool {
        p.longitude >= self.west
            && p.longitude <= self.east
            && p.latitude >= self.south
            && p.latitude <= self.north
    }
}

/// Restrict results to crashes within `radius_m` of `center`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearFilter {
    pub center: GeoPoint,
    pub radius_m: f64,
}

impl NearFilter {
    pub fn matches(&self, point: GeoPoint) -> bool {
        distance_m(self.center, point) <= self.radius_m
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::around(self.center, self.radius_m)
    }
}
