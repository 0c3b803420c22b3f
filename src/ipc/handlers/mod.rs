pub mod analytics;
pub mod config;
pub mod core;
pub mod datasets;
