//! Local tangent plane frame used by the fusion engine
//!
//! All sources report positions in an East-North-Up frame (meters) centred on
//! a geodetic origin. The conversion uses a flat-earth approximation, which is
//! accurate to centimetres over the few kilometres a tracking session covers.

use crate::core::{GeoPosition, Vec3, EARTH_RADIUS_M};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalFrame {
    origin: GeoPosition,
    cos_origin_lat: f64,
}

impl LocalFrame {
    pub fn new(origin: GeoPosition) -> Self {
        Self {
            origin,
            cos_origin_lat: origin.latitude.to_radians().cos(),
        }
    }

    pub fn origin(&self) -> GeoPosition {
        self.origin
    }

    /// Geodetic to local East-North-Up (meters)
    pub fn to_local(&self, geo: &GeoPosition) -> Vec3 {
        let lat_diff = (geo.latitude - self.origin.latitude).to_radians();
        let lon_diff = (geo.longitude - self.origin.longitude).to_radians();

        Vec3::new(
            EARTH_RADIUS_M * lon_diff * self.cos_origin_lat,
            EARTH_RADIUS_M * lat_diff,
            geo.altitude - self.origin.altitude,
        )
    }

    /// Local East-North-Up (meters) to geodetic
    pub fn to_geodetic(&self, local: &Vec3) -> GeoPosition {
        let lat_diff = local.y / EARTH_RADIUS_M;
        let lon_diff = if self.cos_origin_lat.abs() > 1e-12 {
            local.x / (EARTH_RADIUS_M * self.cos_origin_lat)
        } else {
            0.0
        };

        GeoPosition {
            latitude: self.origin.latitude + lat_diff.to_degrees(),
            longitude: self.origin.longitude + lon_diff.to_degrees(),
            altitude: self.origin.altitude + local.z,
        }
    }
}

/// Great-circle distance between two fixes, ignoring altitude (meters)
pub fn haversine_distance_m(a: &GeoPosition, b: &GeoPosition) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}
