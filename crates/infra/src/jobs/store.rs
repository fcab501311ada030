//! Queue store port and in-memory implementation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use satyamatrix_core::{JobId, QueueName};

use super::types::JobRecord;

/// Thin typed wrapper over the list/hash primitives of the backing store.
///
/// Implementations carry no business logic. Every operation is independently
/// atomic at the store level; nothing spans two calls.
pub trait QueueStore: Send + Sync {
    /// Pop one identifier from the head of `queue`, without blocking.
    ///
    /// Must be a single atomic store operation so two workers never pop the
    /// same identifier.
    fn dequeue(&self, queue: &QueueName) -> Result<Option<JobId>, StoreError>;

    /// Read every field of a job record. A missing record yields an empty
    /// `JobRecord`, not an error.
    fn fetch_record(&self, job_id: &JobId) -> Result<JobRecord, StoreError>;

    /// Upsert several fields of a job record.
    fn write_fields(&self, job_id: &JobId, fields: &[(&str, Vec<u8>)]) -> Result<(), StoreError>;

    /// Upsert a single field of a job record.
    fn write_field(&self, job_id: &JobId, field: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.write_fields(job_id, &[(field, value)])
    }
}

/// Queue store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),
    #[error("store command error: {0}")]
    Command(String),
    #[error("store serialization error: {0}")]
    Serialization(String),
}

/// Key naming for lanes and job hashes.
///
/// Defaults to the RQ layout: `rq:queue:{lane}` and `rq:job:{id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    prefix: String,
}

impl KeyLayout {
    pub const DEFAULT_PREFIX: &'static str = "rq:";

    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn queue_key(&self, queue: &QueueName) -> String {
        format!("{}queue:{}", self.prefix, queue)
    }

    pub fn job_key(&self, job_id: &JobId) -> String {
        format!("{}job:{}", self.prefix, job_id)
    }
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PREFIX)
    }
}

/// Per-operation call counts (test visibility into store traffic).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreCallCounts {
    pub dequeues: u64,
    pub fetches: u64,
    pub writes: u64,
}

impl StoreCallCounts {
    /// Calls that could have changed stored state other than popping a lane.
    pub fn mutations(&self) -> u64 {
        self.writes
    }
}

/// In-memory queue store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    lanes: RwLock<HashMap<QueueName, VecDeque<JobId>>>,
    records: RwLock<HashMap<JobId, BTreeMap<String, Vec<u8>>>>,
    dequeues: AtomicU64,
    fetches: AtomicU64,
    writes: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Append an identifier to the tail of a lane (producer side).
    pub fn push(&self, queue: &QueueName, job_id: JobId) {
        self.lanes
            .write()
            .unwrap()
            .entry(queue.clone())
            .or_default()
            .push_back(job_id);
    }

    /// Store a whole record, replacing any previous one (producer side).
    pub fn insert_record(&self, record: JobRecord) {
        self.records.write().unwrap().insert(record.id, record.fields);
    }

    /// Convenience: insert a record and enqueue its id.
    pub fn enqueue(&self, queue: &QueueName, record: JobRecord) {
        let id = record.id.clone();
        self.insert_record(record);
        self.push(queue, id);
    }

    /// Snapshot of a record, bypassing call counters.
    pub fn record(&self, job_id: &JobId) -> JobRecord {
        let fields = self
            .records
            .read()
            .unwrap()
            .get(job_id)
            .cloned()
            .unwrap_or_default();
        JobRecord {
            id: job_id.clone(),
            fields,
        }
    }

    pub fn lane_len(&self, queue: &QueueName) -> usize {
        self.lanes
            .read()
            .unwrap()
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    pub fn calls(&self) -> StoreCallCounts {
        StoreCallCounts {
            dequeues: self.dequeues.load(Ordering::SeqCst),
            fetches: self.fetches.load(Ordering::SeqCst),
            writes: self.writes.load(Ordering::SeqCst),
        }
    }

    /// Simulate losing the store: every operation fails until re-enabled.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("store unavailable".to_string()));
        }
        Ok(())
    }
}

impl QueueStore for InMemoryQueueStore {
    fn dequeue(&self, queue: &QueueName) -> Result<Option<JobId>, StoreError> {
        self.dequeues.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let mut lanes = self.lanes.write().unwrap();
        Ok(lanes.get_mut(queue).and_then(VecDeque::pop_front))
    }

    fn fetch_record(&self, job_id: &JobId) -> Result<JobRecord, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.record(job_id))
    }

    fn write_fields(&self, job_id: &JobId, fields: &[(&str, Vec<u8>)]) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let mut records = self.records.write().unwrap();
        let record = records.entry(job_id.clone()).or_default();
        for (name, value) in fields {
            record.insert((*name).to_string(), value.clone());
        }
        Ok(())
    }
}

impl<S: QueueStore + ?Sized> QueueStore for Arc<S> {
    fn dequeue(&self, queue: &QueueName) -> Result<Option<JobId>, StoreError> {
        (**self).dequeue(queue)
    }

    fn fetch_record(&self, job_id: &JobId) -> Result<JobRecord, StoreError> {
        (**self).fetch_record(job_id)
    }

    fn write_fields(&self, job_id: &JobId, fields: &[(&str, Vec<u8>)]) -> Result<(), StoreError> {
        (**self).write_fields(job_id, fields)
    }
}
