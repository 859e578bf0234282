//! Area risk around a point (`steps risk`, `GET /api/risk`).

use anyhow::{anyhow, Result};

use safesteps_core::models::GeoPoint;
use safesteps_core::risk::{area_risk, AreaRisk};
use safesteps_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::search::check_coordinates;
use crate::sqlite_store::SqliteStore;

/// Summarize the crashes within `radius_m` of `center`.
pub async fn area_risk_at<S>(store: &S, center: GeoPoint, radius_m: f64) -> Result<AreaRisk>
where
    S: Store + ?Sized,
{
    if !(radius_m.is_finite() && radius_m > 0.0) {
        return Err(anyhow!("radius must be > 0, got {}", radius_m));
    }
    let records = store.records_within(center, radius_m).await?;
    Ok(area_risk(center, radius_m, &records))
}

pub async fn run_risk(config: &Config, lat: f64, lng: f64, radius_m: Option<f64>) -> Result<()> {
    check_coordinates(lat, lng).map_err(|e| anyhow!(e))?;
    let radius_m = radius_m.unwrap_or(config.retrieval.near_radius_m);

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let risk = area_risk_at(&store, GeoPoint::new(lng, lat), radius_m).await;
    pool.close().await;
    let risk = risk?;

    println!(
        "Risk within {:.0} m of {:.5}, {:.5}: {:.2}",
        risk.radius_m, risk.latitude, risk.longitude, risk.risk_score
    );
    println!("  crashes:              {}", risk.crash_count);
    println!("  pedestrians injured:  {}", risk.pedestrians_injured);
    Ok(())
}
