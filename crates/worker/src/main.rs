use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use satyamatrix_infra::config::WorkerSettings;
use satyamatrix_infra::jobs::{RedisQueueStore, Worker};
use satyamatrix_worker::handlers::{self, SubmissionCommand};
use satyamatrix_worker::shutdown::ShutdownSignal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    satyamatrix_observability::init();

    let settings = WorkerSettings::from_env().context("loading worker settings")?;
    let command = SubmissionCommand::from_env().context("loading submission handler")?;

    let store = Arc::new(
        RedisQueueStore::new(&settings.redis_url, settings.key_layout())
            .context("configuring redis store")?
            .with_connect_timeout(Duration::from_secs(5))
            .with_io_timeout(Duration::from_secs(30)),
    );

    // The worker retries on its own; an unreachable store at startup is only worth a warning.
    let probe = Arc::clone(&store);
    match tokio::task::spawn_blocking(move || probe.ping()).await? {
        Ok(()) => tracing::info!(redis_url = %settings.redis_url, "connected to redis"),
        Err(e) => tracing::warn!(redis_url = %settings.redis_url, error = %e, "redis not reachable yet"),
    }

    tracing::info!(
        worker = %settings.worker_name,
        lanes = %settings.lanes,
        handler = %command.program(),
        "starting worker"
    );

    let worker = Worker::new(store, handlers::registry(command), settings.worker_config())
        .with_result_encoding(settings.result_encoding);
    let mut shutdown = ShutdownSignal::install().context("installing signal handlers")?;
    let handle = worker.spawn().context("spawning worker thread")?;

    let signal = shutdown.recv().await.context("waiting for shutdown signal")?;
    tracing::info!(
        worker = %settings.worker_name,
        signal,
        "shutdown requested; finishing current job"
    );

    let stats = tokio::task::spawn_blocking(move || handle.shutdown()).await?;

    tracing::info!(
        worker = %settings.worker_name,
        cycles = stats.cycles,
        jobs_finished = stats.jobs_finished,
        jobs_failed = stats.jobs_failed,
        records_missing = stats.records_missing,
        cycle_errors = stats.cycle_errors,
        uptime_secs = stats.uptime_secs,
        "worker exited"
    );
    Ok(())
}
