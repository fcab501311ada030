//! Infrastructure layer: queue store adapters, job processing, configuration.

pub mod config;
pub mod jobs;
