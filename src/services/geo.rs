use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GeoPoint {
    #[schema(example = 52.5200)]
    pub lat: f64,
    #[schema(example = 13.4050)]
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Latitude in [-90, 90], longitude in [-180, 180], both finite.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Great-circle distance in kilometers.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let radius_km = 6371.0_f64;
    let (lat1_rad, lon1_rad) = (a.lat.to_radians(), a.lng.to_radians());
    let (lat2_rad, lon2_rad) = (b.lat.to_radians(), b.lng.to_radians());
    let dlat = lat2_rad - lat1_rad;
    let dlon = lon2_rad - lon1_rad;
    let h = (dlat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();
    radius_km * c
}

pub fn haversine_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    haversine_km(a, b) * 1000.0
}
