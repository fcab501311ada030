//! Queue consumer for RQ-compatible job stores.
//!
//! ## Design
//!
//! - Lanes are scanned in a fixed priority order; one job per cycle
//! - Job payloads are decoded by an ordered chain of fallback strategies
//! - Every processed job ends `finished` or `failed`; there is no retry
//! - Store failures are cycle-level and recovered by backing off
//!
//! ## Components
//!
//! - `QueueStore`: lane pop and record read/write (in-memory or Redis)
//! - `PayloadDecoder`: job record -> `JobInvocation`
//! - `HandlerRegistry`: invocation -> handler
//! - `StatusLifecycle`: status/result/timestamp writes
//! - `Worker`: the polling loop tying the above together

pub mod clock;
pub mod decoder;
pub mod lifecycle;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod registry;
pub mod store;
pub mod types;
pub mod worker;

pub use clock::{Clock, FixedClock, SystemClock};
pub use decoder::{DecodeAttempt, DecodeFailure, PayloadDecoder};
pub use lifecycle::{ResultEncoding, StatusLifecycle};
#[cfg(feature = "redis")]
pub use redis_store::RedisQueueStore;
pub use registry::{HandlerError, HandlerRegistry, JobHandler, UnknownHandler};
pub use store::{InMemoryQueueStore, KeyLayout, QueueStore, StoreCallCounts, StoreError};
pub use types::{fields, DecodeStrategyKind, JobInvocation, JobOutcome, JobOutput, JobRecord};
pub use worker::{Backoff, CycleOutcome, JobError, Worker, WorkerConfig, WorkerHandle, WorkerStats};
