//! Core types and constants for the position fusion engine

pub mod types;
pub mod constants;

pub use types::*;
pub use constants::*;
