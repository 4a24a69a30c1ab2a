pub mod config;
pub mod distribution;
pub mod error;
pub mod telemetry;
