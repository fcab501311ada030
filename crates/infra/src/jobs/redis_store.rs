//! Redis-backed queue store (RQ-compatible key layout).
//!
//! - **Lanes**: Redis lists, popped with `LPOP` (atomic across workers)
//! - **Records**: Redis hashes, read with `HGETALL`, written with `HSET`
//!
//! One connection is opened lazily and reused for the life of the process.
//! When a command fails at the connection level the cached connection is
//! dropped, so the next call (normally the next worker cycle) reconnects.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use redis::Commands;
use tracing::{debug, warn};

use satyamatrix_core::{JobId, QueueName};

use super::store::{KeyLayout, QueueStore, StoreError};
use super::types::JobRecord;

/// Queue store backed by a single Redis connection.
pub struct RedisQueueStore {
    client: redis::Client,
    layout: KeyLayout,
    connect_timeout: Option<Duration>,
    io_timeout: Option<Duration>,
    conn: Mutex<Option<redis::Connection>>,
}

impl std::fmt::Debug for RedisQueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueueStore")
            .field("layout", &self.layout)
            .field("connect_timeout", &self.connect_timeout)
            .field("io_timeout", &self.io_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisQueueStore {
    /// Create a store for `redis_url` (e.g. `redis://localhost:6379`).
    ///
    /// Only parses the URL; the connection is opened on first use.
    pub fn new(redis_url: impl AsRef<str>, layout: KeyLayout) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            layout,
            connect_timeout: None,
            io_timeout: None,
            conn: Mutex::new(None),
        })
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Read/write timeout applied to the connection once opened.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    /// Round-trip a `PING` (startup connectivity check).
    pub fn ping(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| redis::cmd("PING").query::<String>(conn).map(|_| ()))
    }

    fn open(&self) -> Result<redis::Connection, StoreError> {
        let conn = match self.connect_timeout {
            Some(timeout) => self.client.get_connection_with_timeout(timeout),
            None => self.client.get_connection(),
        }
        .map_err(|e| StoreError::Connection(e.to_string()))?;

        if let Some(timeout) = self.io_timeout {
            conn.set_read_timeout(Some(timeout))
                .and_then(|_| conn.set_write_timeout(Some(timeout)))
                .map_err(|e| StoreError::Connection(e.to_string()))?;
        }

        debug!(prefix = %self.layout.prefix(), "opened redis connection");
        Ok(conn)
    }

    /// Run `f` on the shared connection, reconnecting if none is cached.
    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> Result<T, StoreError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| StoreError::Connection("connection mutex poisoned".to_string()))?;

        if guard.is_none() {
            *guard = Some(self.open()?);
        }

        let conn = guard
            .as_mut()
            .ok_or_else(|| StoreError::Connection("no connection".to_string()))?;

        match f(conn) {
            Ok(value) => Ok(value),
            Err(e) if is_connection_level(&e) => {
                warn!(error = %e, "redis connection lost; will reconnect");
                *guard = None;
                Err(StoreError::Connection(e.to_string()))
            }
            Err(e) => Err(StoreError::Command(e.to_string())),
        }
    }
}

fn is_connection_level(e: &redis::RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

impl QueueStore for RedisQueueStore {
    fn dequeue(&self, queue: &QueueName) -> Result<Option<JobId>, StoreError> {
        let key = self.layout.queue_key(queue);
        let raw: Option<Vec<u8>> = self.with_conn(|conn| conn.lpop(&key, None))?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let text = String::from_utf8(raw)
            .map_err(|e| StoreError::Serialization(format!("job id in {key} is not UTF-8: {e}")))?;
        JobId::new(text)
            .map(Some)
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn fetch_record(&self, job_id: &JobId) -> Result<JobRecord, StoreError> {
        let key = self.layout.job_key(job_id);
        let raw: HashMap<String, Vec<u8>> = self.with_conn(|conn| conn.hgetall(&key))?;

        Ok(JobRecord {
            id: job_id.clone(),
            fields: raw.into_iter().collect::<BTreeMap<_, _>>(),
        })
    }

    fn write_fields(&self, job_id: &JobId, fields: &[(&str, Vec<u8>)]) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        let key = self.layout.job_key(job_id);
        self.with_conn(|conn| conn.hset_multiple::<_, _, _, ()>(&key, fields))
    }
}
