//! Utility modules for configuration, logging and monitoring

pub mod config;
pub mod logging;
pub mod monitor;

pub use config::{ConfigError, FusionConfig};
pub use logging::{init_logging, init_logging_with_filter, LogLevel};
pub use monitor::FusionStats;
