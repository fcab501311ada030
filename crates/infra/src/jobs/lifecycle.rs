//! Status lifecycle: the job-record fields the worker owns.
//!
//! Each transition is one multi-field upsert. There is no rollback: if a write
//! fails the caller gets the `StoreError` and must treat the recorded status as
//! uncertain.

use std::str::FromStr;

use serde_pickle::SerOptions;

use satyamatrix_core::{JobId, JobStatus};

use super::clock::{epoch_seconds, Clock, SystemClock};
use super::store::{QueueStore, StoreError};
use super::types::{fields, JobOutput};

/// How the `result` field is serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultEncoding {
    /// Python pickle, readable by RQ-based API layers.
    #[default]
    Pickle,
    Json,
}

impl ResultEncoding {
    pub fn encode(&self, output: &JobOutput) -> Result<Vec<u8>, StoreError> {
        match self {
            ResultEncoding::Pickle => serde_pickle::to_vec(output, SerOptions::new())
                .map_err(|e| StoreError::Serialization(format!("pickle result: {e}"))),
            ResultEncoding::Json => serde_json::to_vec(output)
                .map_err(|e| StoreError::Serialization(format!("json result: {e}"))),
        }
    }
}

impl FromStr for ResultEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pickle" => Ok(ResultEncoding::Pickle),
            "json" => Ok(ResultEncoding::Json),
            other => Err(format!("unknown result encoding '{other}' (expected pickle or json)")),
        }
    }
}

/// Whether an output is worth recording (Python truthiness).
pub fn is_meaningful(output: &JobOutput) -> bool {
    match output {
        JobOutput::Null => false,
        JobOutput::Bool(b) => *b,
        JobOutput::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        JobOutput::String(s) => !s.is_empty(),
        JobOutput::Array(items) => !items.is_empty(),
        JobOutput::Object(map) => !map.is_empty(),
    }
}

/// Writes lifecycle transitions for job records.
#[derive(Debug, Clone)]
pub struct StatusLifecycle<S, C = SystemClock> {
    store: S,
    clock: C,
    encoding: ResultEncoding,
}

impl<S: QueueStore> StatusLifecycle<S> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: QueueStore, C: Clock> StatusLifecycle<S, C> {
    pub fn with_clock(store: S, clock: C) -> Self {
        Self {
            store,
            clock,
            encoding: ResultEncoding::default(),
        }
    }

    pub fn with_encoding(mut self, encoding: ResultEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// `status=started`, `started_at=<now>`.
    pub fn mark_started(&self, job_id: &JobId) -> Result<(), StoreError> {
        let now = epoch_seconds(self.clock.now());
        self.store.write_fields(
            job_id,
            &[
                (fields::STATUS, status_bytes(JobStatus::Started)),
                (fields::STARTED_AT, now.into_bytes()),
            ],
        )
    }

    /// `status=finished`, `result` (only when meaningful), `ended_at=<now>`.
    pub fn mark_finished(&self, job_id: &JobId, output: &JobOutput) -> Result<(), StoreError> {
        let mut updates = vec![(fields::STATUS, status_bytes(JobStatus::Finished))];
        if is_meaningful(output) {
            updates.push((fields::RESULT, self.encoding.encode(output)?));
        }
        updates.push((fields::ENDED_AT, epoch_seconds(self.clock.now()).into_bytes()));
        self.store.write_fields(job_id, &updates)
    }

    /// `status=failed`, `ended_at=<now>`, `exc_info=<reason>`. Never writes `result`.
    pub fn mark_failed(&self, job_id: &JobId, reason: &str) -> Result<(), StoreError> {
        self.store.write_fields(
            job_id,
            &[
                (fields::STATUS, status_bytes(JobStatus::Failed)),
                (fields::ENDED_AT, epoch_seconds(self.clock.now()).into_bytes()),
                (fields::EXC_INFO, reason.as_bytes().to_vec()),
            ],
        )
    }
}

fn status_bytes(status: JobStatus) -> Vec<u8> {
    status.as_str().as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;
    use crate::jobs::clock::FixedClock;
    use crate::jobs::store::InMemoryQueueStore;
    use crate::jobs::types::JobRecord;

    fn setup() -> (Arc<InMemoryQueueStore>, StatusLifecycle<Arc<InMemoryQueueStore>, FixedClock>, JobId) {
        let store = InMemoryQueueStore::arc();
        let clock = FixedClock(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        let job = JobId::new("j1").unwrap();
        store.insert_record(JobRecord::new(job.clone()).with_field(fields::DESCRIPTION, "f('x')"));
        (store.clone(), StatusLifecycle::with_clock(store, clock), job)
    }

    #[test]
    fn started_then_finished() {
        let (store, lifecycle, job) = setup();

        lifecycle.mark_started(&job).unwrap();
        assert_eq!(store.record(&job).status(), JobStatus::Started);
        assert_eq!(store.record(&job).text(fields::STARTED_AT), Some("1700000000.000000"));

        lifecycle.mark_finished(&job, &json!({"verdict": "ok"})).unwrap();
        let record = store.record(&job);
        assert_eq!(record.status(), JobStatus::Finished);
        assert_eq!(record.text(fields::ENDED_AT), Some("1700000000.000000"));

        let stored: serde_json::Value =
            serde_pickle::from_slice(record.field(fields::RESULT).unwrap(), serde_pickle::DeOptions::new())
                .unwrap();
        assert_eq!(stored, json!({"verdict": "ok"}));
    }

    #[test]
    fn empty_result_is_not_written() {
        let (store, lifecycle, job) = setup();
        lifecycle.mark_finished(&job, &JobOutput::Null).unwrap();
        lifecycle.mark_finished(&job, &json!("")).unwrap();
        assert_eq!(store.record(&job).field(fields::RESULT), None);
        assert_eq!(store.record(&job).status(), JobStatus::Finished);
    }

    #[test]
    fn mark_finished_is_idempotent() {
        let (store, lifecycle, job) = setup();
        let output = json!(["a", 1]);

        lifecycle.mark_finished(&job, &output).unwrap();
        let once = store.record(&job);
        lifecycle.mark_finished(&job, &output).unwrap();
        assert_eq!(store.record(&job), once);
    }

    #[test]
    fn failed_records_reason_without_result() {
        let (store, lifecycle, job) = setup();
        lifecycle.mark_started(&job).unwrap();
        lifecycle.mark_failed(&job, "handler error: boom").unwrap();

        let record = store.record(&job);
        assert_eq!(record.status(), JobStatus::Failed);
        assert_eq!(record.text(fields::EXC_INFO), Some("handler error: boom"));
        assert!(record.field(fields::ENDED_AT).is_some());
        assert_eq!(record.field(fields::RESULT), None);
    }

    #[test]
    fn json_encoding_writes_json() {
        let (store, lifecycle, job) = setup();
        let lifecycle = lifecycle.with_encoding(ResultEncoding::Json);
        lifecycle.mark_finished(&job, &json!({"n": 3})).unwrap();
        assert_eq!(store.record(&job).text(fields::RESULT), Some(r#"{"n":3}"#));
    }

    #[test]
    fn store_failure_propagates() {
        let (store, lifecycle, job) = setup();
        store.set_unavailable(true);
        assert!(matches!(lifecycle.mark_started(&job), Err(StoreError::Connection(_))));
    }

    #[test]
    fn truthiness_matches_python() {
        assert!(!is_meaningful(&json!(0)));
        assert!(!is_meaningful(&json!(false)));
        assert!(!is_meaningful(&json!({})));
        assert!(is_meaningful(&json!(0.5)));
        assert!(is_meaningful(&json!("x")));
        assert_eq!("JSON".parse::<ResultEncoding>(), Ok(ResultEncoding::Json));
        assert!("yaml".parse::<ResultEncoding>().is_err());
    }
}
