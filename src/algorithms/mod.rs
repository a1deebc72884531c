//! Geometry: local frame conversion and range trilateration

pub mod coordinates;
pub mod trilateration;

pub use coordinates::{haversine_distance_m, LocalFrame};
pub use trilateration::{rssi_to_distance, RangeMeasurement, TrilaterationResult, TrilaterationSolver};
