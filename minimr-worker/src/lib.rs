//! The worker loop: pull a task from the coordinator, execute it, report the
//! result, repeat until a `FINISH` sentinel arrives.
//!
//! Workers are interchangeable; a job's parallelism is simply how many of
//! these loops run against the same coordinator and staging store.

mod map;
mod reduce;

use std::sync::Arc;

use tracing::{debug, error, info};

use common::validate::validate_task;
use common::{Storage, TaskKind, ValidationError, Workload};
use minimr_coordinator::Coordinator;

/// Everything a worker needs to run. All components are required; the
/// coordinator and storage are shared across the pool.
pub struct WorkerConfig {
    pub coordinator: Arc<Coordinator>,
    pub workload: Workload,
    pub storage: Arc<dyn Storage>,
}

pub struct Worker {
    coordinator: Arc<Coordinator>,
    workload: Workload,
    storage: Arc<dyn Storage>,
}

impl Worker {
    pub fn from_config(config: WorkerConfig) -> Self {
        Self {
            coordinator: config.coordinator,
            workload: config.workload,
            storage: config.storage,
        }
    }

    /// Fetch and execute tasks until the coordinator signals termination.
    ///
    /// A malformed task record is fatal and takes this worker down. An
    /// execution failure only abandons the current task: the error is
    /// logged, the lease expires, and the coordinator hands the task to
    /// someone else.
    pub async fn run(self) -> Result<(), ValidationError> {
        info!("worker started");
        loop {
            let task = self.coordinator.get_task().await;
            debug!(id = task.id, kind = ?task.kind, "received task");

            validate_task(&task)?;

            match task.kind {
                TaskKind::Finish => {
                    info!("received FINISH task, worker shutting down");
                    return Ok(());
                }
                TaskKind::Map => {
                    if let Err(e) = map::perform_map(
                        &task,
                        self.workload.map_fn,
                        self.storage.as_ref(),
                        &self.coordinator,
                    )
                    .await
                    {
                        error!(id = task.id, "map task failed: {e:#}");
                    }
                }
                TaskKind::Reduce => {
                    if let Err(e) = reduce::perform_reduce(
                        &task,
                        self.workload.reduce_fn,
                        self.storage.as_ref(),
                        &self.coordinator,
                    )
                    .await
                    {
                        error!(id = task.id, "reduce task failed: {e:#}");
                    }
                }
            }
        }
    }
}
