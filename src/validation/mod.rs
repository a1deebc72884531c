//! Input validation and the fusion error taxonomy

pub mod data;
pub mod error;

pub use data::{validate_fix, validate_sample, JumpFilter, JumpVerdict};
pub use error::{FusionError, FusionResult};
