//! Source adapters, per-tick fusion and sample dispatch

pub mod coordinator;
pub mod gnss;
pub mod pipeline;
pub mod ranging;
pub mod source;

pub use coordinator::{blend, Blend, FusionCoordinator, FusionEvent};
pub use gnss::GnssSource;
pub use pipeline::TrackingPipeline;
pub use ranging::RangingSource;
pub use source::{is_fresh, PositionSource};
