//! Worker loop: lane scan, decode, dispatch, record.
//!
//! A worker is single-threaded and sequential. Each cycle pops at most one job
//! (highest-priority non-empty lane wins), runs it to completion, and records
//! the outcome before the next cycle starts. The stop signal is honored between
//! cycles, never mid-handler.
//!
//! Delivery is at-most-once: the pop and the `started` write are separate store
//! calls, so a crash between them loses the job.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use satyamatrix_core::{JobId, LaneOrder, QueueName};

use super::clock::{Clock, SystemClock};
use super::decoder::{DecodeFailure, PayloadDecoder};
use super::lifecycle::{ResultEncoding, StatusLifecycle};
use super::registry::{HandlerError, HandlerRegistry, JobHandler, UnknownHandler};
use super::store::{QueueStore, StoreError};
use super::types::{JobOutcome, JobOutput, JobRecord};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name for logging and the worker thread.
    pub name: String,
    /// Lanes in scan priority order.
    pub lanes: LaneOrder,
    /// Sleep after a cycle that found every lane empty.
    pub idle_interval: Duration,
    /// Sleep after a cycle that failed at the store level.
    pub recovery_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "queue-worker".to_string(),
            lanes: LaneOrder::default(),
            idle_interval: Duration::from_secs(2),
            recovery_interval: Duration::from_secs(5),
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_lanes(mut self, lanes: LaneOrder) -> Self {
        self.lanes = lanes;
        self
    }

    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    pub fn with_recovery_interval(mut self, interval: Duration) -> Self {
        self.recovery_interval = interval;
        self
    }
}

/// What one cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Every lane was empty.
    Idle,
    /// A job was popped and ran to a terminal outcome.
    Processed {
        lane: QueueName,
        job_id: JobId,
        outcome: JobOutcome,
    },
    /// An identifier was popped but its record was empty. Nothing was written.
    Missing { lane: QueueName, job_id: JobId },
}

/// Job-scoped failure: the job is marked failed and the loop carries on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeFailure),
    #[error(transparent)]
    UnknownHandler(#[from] UnknownHandler),
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// Delay before the next cycle, derived from the previous cycle's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub idle: Duration,
    pub recovery: Duration,
}

impl Backoff {
    pub fn new(idle: Duration, recovery: Duration) -> Self {
        Self { idle, recovery }
    }

    /// Zero after work, `idle` after an empty scan, `recovery` after a store error.
    pub fn delay_after(&self, cycle: &Result<CycleOutcome, StoreError>) -> Duration {
        match cycle {
            Ok(CycleOutcome::Processed { .. }) | Ok(CycleOutcome::Missing { .. }) => Duration::ZERO,
            Ok(CycleOutcome::Idle) => self.idle,
            Err(_) => self.recovery,
        }
    }
}

impl From<&WorkerConfig> for Backoff {
    fn from(config: &WorkerConfig) -> Self {
        Self::new(config.idle_interval, config.recovery_interval)
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerStats {
    pub cycles: u64,
    pub idle_cycles: u64,
    pub jobs_finished: u64,
    pub jobs_failed: u64,
    pub records_missing: u64,
    pub cycle_errors: u64,
    pub uptime_secs: u64,
}

impl WorkerStats {
    fn record(&mut self, cycle: &Result<CycleOutcome, StoreError>) {
        self.cycles += 1;
        match cycle {
            Ok(CycleOutcome::Idle) => self.idle_cycles += 1,
            Ok(CycleOutcome::Missing { .. }) => self.records_missing += 1,
            Ok(CycleOutcome::Processed { outcome, .. }) => match outcome {
                JobOutcome::Finished { .. } => self.jobs_finished += 1,
                JobOutcome::Failed { .. } => self.jobs_failed += 1,
            },
            Err(_) => self.cycle_errors += 1,
        }
    }
}

/// Handle to control a running worker.
///
/// Dropping the handle without calling [`WorkerHandle::shutdown`] also stops
/// the worker after its current cycle, but does not wait for it.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Request a graceful stop, wait for the current cycle to finish and
    /// return the final statistics.
    pub fn shutdown(mut self) -> WorkerStats {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("worker thread panicked");
            }
        }
        self.stats()
    }

    pub fn stats(&self) -> WorkerStats {
        match self.stats.lock() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Queue consumer.
///
/// Polls lanes in priority order, decodes each popped job, runs it through the
/// handler registry and records the outcome on the job record.
pub struct Worker<S: QueueStore, C: Clock = SystemClock> {
    config: WorkerConfig,
    lifecycle: StatusLifecycle<S, C>,
    decoder: PayloadDecoder,
    registry: HandlerRegistry,
}

impl<S: QueueStore> Worker<S> {
    pub fn new(store: S, registry: HandlerRegistry, config: WorkerConfig) -> Self {
        Self::with_lifecycle(StatusLifecycle::new(store), registry, config)
    }
}

impl<S: QueueStore, C: Clock> Worker<S, C> {
    pub fn with_lifecycle(
        lifecycle: StatusLifecycle<S, C>,
        registry: HandlerRegistry,
        config: WorkerConfig,
    ) -> Self {
        Self {
            config,
            lifecycle,
            decoder: PayloadDecoder::new(),
            registry,
        }
    }

    pub fn with_decoder(mut self, decoder: PayloadDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_result_encoding(mut self, encoding: ResultEncoding) -> Self {
        self.lifecycle = self.lifecycle.with_encoding(encoding);
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        self.lifecycle.store()
    }

    /// Run one cycle: pop at most one job and drive it to a terminal status.
    ///
    /// Only `dequeue` and `fetch_record` failures escape; everything that goes
    /// wrong with the job itself ends up as `status=failed` on its record.
    pub fn run_cycle(&self) -> Result<CycleOutcome, StoreError> {
        let Some((lane, job_id)) = self.next_job()? else {
            return Ok(CycleOutcome::Idle);
        };

        let record = self.store().fetch_record(&job_id).inspect_err(|e| {
            error!(
                worker = %self.config.name,
                lane = %lane,
                job_id = %job_id,
                error = %e,
                "failed to read record of dequeued job; job dropped"
            );
        })?;
        if record.is_empty() {
            warn!(
                worker = %self.config.name,
                lane = %lane,
                job_id = %job_id,
                "dequeued job has no record; skipping"
            );
            return Ok(CycleOutcome::Missing { lane, job_id });
        }

        let previous = record.status();
        if previous.is_terminal() {
            warn!(
                worker = %self.config.name,
                job_id = %job_id,
                status = %previous,
                "dequeued job is already {previous}; running it again"
            );
        }
        info!(worker = %self.config.name, lane = %lane, job_id = %job_id, "processing job");

        if let Err(e) = self.lifecycle.mark_started(&job_id) {
            error!(
                worker = %self.config.name,
                job_id = %job_id,
                error = %e,
                "failed to mark job started; status update uncertain"
            );
        }

        let outcome = match self.execute(&record) {
            Ok(output) => {
                if let Err(e) = self.lifecycle.mark_finished(&job_id, &output) {
                    error!(
                        worker = %self.config.name,
                        job_id = %job_id,
                        error = %e,
                        "failed to mark job finished; status update uncertain"
                    );
                }
                JobOutcome::Finished { output }
            }
            Err(err) => {
                let reason = err.to_string();
                warn!(worker = %self.config.name, job_id = %job_id, error = %reason, "job failed");
                if let Err(e) = self.lifecycle.mark_failed(&job_id, &reason) {
                    error!(
                        worker = %self.config.name,
                        job_id = %job_id,
                        error = %e,
                        "failed to mark job failed; status update uncertain"
                    );
                }
                JobOutcome::Failed { reason }
            }
        };
        info!(
            worker = %self.config.name,
            job_id = %job_id,
            status = %outcome.status(),
            "job completed"
        );

        Ok(CycleOutcome::Processed {
            lane,
            job_id,
            outcome,
        })
    }

    /// Decode a record and run its handler. Writes nothing.
    pub fn execute(&self, record: &JobRecord) -> Result<JobOutput, JobError> {
        let invocation = self.decoder.decode(record)?;
        debug!(
            job_id = %record.id,
            strategy = %invocation.strategy,
            handler = ?invocation.handler,
            "decoded job"
        );

        let handler = self.registry.resolve(invocation.handler.as_deref())?;
        Ok(invoke(handler.as_ref(), &invocation.argument)?)
    }

    fn next_job(&self) -> Result<Option<(QueueName, JobId)>, StoreError> {
        for lane in self.config.lanes.iter() {
            if let Some(job_id) = self.store().dequeue(lane)? {
                return Ok(Some((lane.clone(), job_id)));
            }
        }
        Ok(None)
    }
}

impl<S, C> Worker<S, C>
where
    S: QueueStore + 'static,
    C: Clock + 'static,
{
    /// Run the worker loop on a dedicated thread.
    pub fn spawn(self) -> std::io::Result<WorkerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let stats_clone = stats.clone();

        let join = thread::Builder::new()
            .name(self.config.name.clone())
            .spawn(move || worker_loop(self, shutdown_rx, stats_clone))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

fn worker_loop<S: QueueStore, C: Clock>(
    worker: Worker<S, C>,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<WorkerStats>>,
) {
    let name = worker.config.name.clone();
    let backoff = Backoff::from(&worker.config);
    info!(worker = %name, lanes = %worker.config.lanes, "worker started");
    let start_time = Instant::now();

    loop {
        match shutdown_rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        let cycle = worker.run_cycle();
        if let Err(e) = &cycle {
            error!(
                worker = %name,
                error = %e,
                retry_in_ms = backoff.recovery.as_millis() as u64,
                "queue cycle failed"
            );
        }

        if let Ok(mut s) = stats.lock() {
            s.record(&cycle);
            s.uptime_secs = start_time.elapsed().as_secs();
        }

        let delay = backoff.delay_after(&cycle);
        if delay.is_zero() {
            continue;
        }
        match shutdown_rx.recv_timeout(delay) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    info!(worker = %name, "worker stopped");
}

fn invoke(handler: &dyn JobHandler, argument: &str) -> Result<JobOutput, HandlerError> {
    match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(argument))) {
        Ok(result) => result,
        Err(payload) => Err(HandlerError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
