//! minimr: a single-process MapReduce engine.
//!
//! A [`Coordinator`] leases map and reduce tasks to a pool of worker loops;
//! workers stage their output through a [`StagingStore`] that publishes
//! files with atomic renames, so a crashed or stalled worker never corrupts
//! observable state. Tasks execute at least once, outputs become visible
//! exactly once.
//!
//! This crate is the job driver: it wires a coordinator, a staging store and
//! a worker pool together over a set of input files and runs the job to
//! completion.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::select;
use tokio::task::JoinSet;
use tracing::{info, warn};

pub use common::{
    ihash, KeyValue, MapFn, MapOutput, ReduceFn, StagingStore, Storage, StorageError, Task,
    TaskKind, TaskStatus, ValidationError, Workload,
};
pub use minimr_coordinator::{Coordinator, CoordinatorConfig};
pub use minimr_worker::{Worker, WorkerConfig};

/// Everything needed to run one job.
pub struct JobConfig {
    /// Input file names, resolved relative to `root`. One map task each.
    pub inputs: Vec<String>,

    /// Reducer fan-out.
    pub n_reduce: usize,

    /// Size of the worker pool.
    pub n_workers: usize,

    /// Output root directory; also where inputs are read from.
    pub root: PathBuf,

    /// The application's map and reduce functions.
    pub workload: Workload,

    /// Lease-timeout tuning for the coordinator.
    pub coordinator: CoordinatorConfig,

    /// Wall-clock bound on the whole job.
    pub job_timeout: Duration,
}

impl JobConfig {
    /// A config with default timing: 4 workers and a 5 minute job bound.
    pub fn new(
        inputs: Vec<String>,
        n_reduce: usize,
        root: impl Into<PathBuf>,
        workload: Workload,
    ) -> Self {
        Self {
            inputs,
            n_reduce,
            n_workers: 4,
            root: root.into(),
            workload,
            coordinator: CoordinatorConfig::default(),
            job_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    /// The coordinator never reached the done state within the job bound.
    #[error("job did not complete within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Run a job to completion on the local filesystem.
pub async fn run_job(config: JobConfig) -> Result<(), JobError> {
    let coordinator =
        Coordinator::with_config(config.inputs, config.n_reduce, config.coordinator)?;
    let storage: Arc<dyn Storage> = Arc::new(StagingStore::new(config.root));
    run_job_with(
        coordinator,
        storage,
        config.workload,
        config.n_workers,
        config.job_timeout,
    )
    .await
}

/// Run a job against a caller-supplied coordinator and storage.
///
/// Split out from [`run_job`] so callers can interpose on the storage seam
/// or pre-build the coordinator.
pub async fn run_job_with(
    coordinator: Arc<Coordinator>,
    storage: Arc<dyn Storage>,
    workload: Workload,
    n_workers: usize,
    job_timeout: Duration,
) -> Result<(), JobError> {
    info!(n_workers, "starting job");

    let mut workers = JoinSet::new();
    for _ in 0..n_workers {
        let worker = Worker::from_config(WorkerConfig {
            coordinator: Arc::clone(&coordinator),
            workload,
            storage: Arc::clone(&storage),
        });
        workers.spawn(worker.run());
    }

    let result = select! {
        _ = wait_done(&coordinator) => Ok(()),
        _ = tokio::time::sleep(job_timeout) => Err(JobError::Timeout(job_timeout)),
    };

    // Shutting down drains every worker blocked in get_task into the
    // FINISH path, whether the job finished or timed out.
    coordinator.shutdown().await;

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("worker exited on malformed input: {e}"),
            Err(e) => warn!("worker aborted: {e}"),
        }
    }

    if result.is_ok() {
        info!("job completed");
    }
    result
}

async fn wait_done(coordinator: &Coordinator) {
    let mut ticks = tokio::time::interval(Duration::from_millis(50));
    while !coordinator.is_done() {
        ticks.tick().await;
    }
}
