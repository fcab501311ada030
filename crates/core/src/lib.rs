//! `satyamatrix-core`: domain building blocks for the queue worker.
//!
//! This crate contains **pure domain** primitives (no store or process concerns).

pub mod error;
pub mod id;
pub mod status;

pub use error::{DomainError, DomainResult};
pub use id::{JobId, LaneOrder, QueueName};
pub use status::JobStatus;
