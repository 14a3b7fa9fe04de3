//! Lease-based task coordination for a single-process MapReduce job.
//!
//! The coordinator owns every task record for the job. Workers pull tasks
//! with [`Coordinator::get_task`], execute them, and hand them back through
//! [`Coordinator::report_task`]. A lease that outlives the configured timeout
//! is reclaimed by a background sweeper and the task requeued, which gives
//! the job at-least-once execution; duplicate completions are discarded at
//! the report boundary, so completion counters advance exactly once per
//! task. Once the last map task is reported the coordinator materializes the
//! reduce tasks, and once those finish it hands every caller a `FINISH`
//! sentinel.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use common::validate::validate_job;
use common::{Task, TaskKind, TaskStatus, ValidationError};

/// Timing knobs for lease reclamation.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// Delay before the first sweep.
    pub initial_check_delay: Duration,

    /// Cadence between sweeps.
    pub check_interval: Duration,

    /// Maximum age of a lease before it is reclaimed.
    pub task_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            initial_check_delay: Duration::from_secs(10),
            check_interval: Duration::from_secs(10),
            task_timeout: Duration::from_secs(10),
        }
    }
}

/// A task currently out with a worker.
struct Lease {
    task: Arc<Task>,
    started: Instant,
}

pub struct Coordinator {
    n_map: usize,
    n_reduce: usize,

    /// All map task records, in input order. Their registered outputs are
    /// the raw material for reduce materialization.
    map_tasks: Vec<Arc<Task>>,

    /// Tasks awaiting a lease, FIFO.
    idle: Mutex<VecDeque<Arc<Task>>>,

    /// In-flight leases. Keyed by kind as well as id: a straggling map
    /// task's late report must never collide with the reduce task that
    /// reuses its numeric id.
    leased: Mutex<HashMap<(TaskKind, i32), Lease>>,

    map_done: AtomicUsize,
    reduce_done: AtomicUsize,

    /// One-shot latch around reduce materialization.
    reduces_built: AtomicBool,

    /// Counted availability signal: one permit per task sitting in `idle`.
    /// Closed on shutdown to drain blocked callers.
    task_available: Semaphore,

    sweeper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    /// Build a coordinator with default timing and seed it with one map task
    /// per input file. Must be called from within a tokio runtime, which the
    /// sweeper is spawned onto.
    pub fn new(inputs: Vec<String>, n_reduce: usize) -> Result<Arc<Self>, ValidationError> {
        Self::with_config(inputs, n_reduce, CoordinatorConfig::default())
    }

    pub fn with_config(
        inputs: Vec<String>,
        n_reduce: usize,
        config: CoordinatorConfig,
    ) -> Result<Arc<Self>, ValidationError> {
        validate_job(&inputs, n_reduce)?;

        let map_tasks: Vec<Arc<Task>> = inputs
            .into_iter()
            .enumerate()
            .map(|(id, input)| Arc::new(Task::map(id as i32, input, n_reduce)))
            .collect();
        let n_map = map_tasks.len();

        let coordinator = Arc::new(Self {
            n_map,
            n_reduce,
            idle: Mutex::new(map_tasks.iter().cloned().collect()),
            map_tasks,
            leased: Mutex::new(HashMap::new()),
            map_done: AtomicUsize::new(0),
            reduce_done: AtomicUsize::new(0),
            reduces_built: AtomicBool::new(false),
            task_available: Semaphore::new(n_map),
            sweeper: std::sync::Mutex::new(None),
        });

        let handle = tokio::spawn(sweep_loop(Arc::downgrade(&coordinator), config));
        *coordinator.sweeper.lock().unwrap() = Some(handle);

        info!(n_map, n_reduce, "coordinator seeded");
        Ok(coordinator)
    }

    /// Next task for a worker.
    ///
    /// Blocks while the idle queue is empty but tasks may still arrive.
    /// Returns a `FINISH` sentinel once the job is done or the coordinator
    /// has shut down. Never blocks while holding a lock the report path or
    /// the sweeper needs.
    pub async fn get_task(&self) -> Arc<Task> {
        loop {
            if self.is_done() {
                return Arc::new(Task::finish(self.n_reduce));
            }

            match self.task_available.acquire().await {
                Ok(permit) => permit.forget(),
                // Closed by shutdown.
                Err(_) => return Arc::new(Task::finish(self.n_reduce)),
            }

            let popped = self.idle.lock().await.pop_front();
            let Some(task) = popped else {
                // Spurious wake, e.g. a queue cleared underneath us;
                // done-ness is re-checked at the top.
                continue;
            };

            task.set_status(TaskStatus::InProgress);
            self.leased.lock().await.insert(
                task.lease_key(),
                Lease {
                    task: Arc::clone(&task),
                    started: Instant::now(),
                },
            );
            debug!(id = task.id, kind = ?task.kind, "leased task");
            return task;
        }
    }

    /// Accept a completion.
    ///
    /// A report whose lease is no longer present — the sweeper reclaimed it
    /// and another worker finished first — is discarded, so each task
    /// advances its completion counter at most once.
    pub async fn report_task(&self, task: &Task) {
        if self.leased.lock().await.remove(&task.lease_key()).is_none() {
            debug!(id = task.id, kind = ?task.kind, "discarding report for superseded lease");
            return;
        }

        task.set_status(TaskStatus::Completed);

        match task.kind {
            TaskKind::Map => {
                if self.map_done.fetch_add(1, Ordering::SeqCst) + 1 == self.n_map {
                    info!("all map tasks completed");
                    self.build_reduce_tasks().await;
                }
            }
            TaskKind::Reduce => {
                if self.reduce_done.fetch_add(1, Ordering::SeqCst) + 1 == self.n_reduce {
                    info!("all reduce tasks completed");
                }
            }
            TaskKind::Finish => {}
        }
    }

    pub fn is_done(&self) -> bool {
        self.map_done.load(Ordering::SeqCst) >= self.n_map
            && self.reduce_done.load(Ordering::SeqCst) >= self.n_reduce
    }

    /// Tear down: clear the queues, force the counters to their targets,
    /// wake every blocked `get_task` caller into the `FINISH` path and stop
    /// the sweeper.
    pub async fn shutdown(&self) {
        self.idle.lock().await.clear();
        self.leased.lock().await.clear();

        self.map_done.store(self.n_map, Ordering::SeqCst);
        self.reduce_done.store(self.n_reduce, Ordering::SeqCst);

        self.task_available.close();

        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            handle.abort();
        }

        info!("coordinator shut down");
    }

    /// Materialize the reduce tasks from the registered map outputs: bucket
    /// `b` consumes the `b`-th shard of every map task, in map order. Runs
    /// at most once per job; concurrent triggers lose the latch and return.
    async fn build_reduce_tasks(&self) {
        if self
            .reduces_built
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        {
            let mut idle = self.idle.lock().await;
            for bucket in 0..self.n_reduce {
                let inputs: Vec<String> = self
                    .map_tasks
                    .iter()
                    .map(|task| task.outputs()[bucket].clone())
                    .collect();
                idle.push_back(Arc::new(Task::reduce(bucket, inputs, self.n_reduce)));
            }
        }

        self.task_available.add_permits(self.n_reduce);
        info!(n_reduce = self.n_reduce, "reduce tasks enqueued");
    }

    /// Reclaim leases older than `timeout`: remove-if-present from the lease
    /// table, reset to idle, requeue. The removal is what serializes this
    /// against a racing report — whichever side takes the lease out of the
    /// table wins, and the loser's view of the task is discarded.
    async fn sweep_expired(&self, timeout: Duration) {
        let now = Instant::now();

        let expired: Vec<Arc<Task>> = {
            let mut leased = self.leased.lock().await;
            let keys: Vec<(TaskKind, i32)> = leased
                .iter()
                .filter(|(_, lease)| {
                    lease.task.status() == TaskStatus::InProgress
                        && now.duration_since(lease.started) > timeout
                })
                .map(|(key, _)| *key)
                .collect();
            keys.into_iter()
                .filter_map(|key| leased.remove(&key))
                .map(|lease| lease.task)
                .collect()
        };

        for task in expired {
            task.set_status(TaskStatus::Idle);
            info!(id = task.id, kind = ?task.kind, "lease expired, task returned to idle queue");
            self.idle.lock().await.push_back(task);
            self.task_available.add_permits(1);
        }
    }
}

async fn sweep_loop(coordinator: Weak<Coordinator>, config: CoordinatorConfig) {
    // tokio intervals reject a zero period.
    let period = config.check_interval.max(Duration::from_millis(1));
    let start = tokio::time::Instant::now() + config.initial_check_delay;
    let mut ticks = tokio::time::interval_at(start, period);

    loop {
        ticks.tick().await;
        let Some(coordinator) = coordinator.upgrade() else {
            return;
        };
        coordinator.sweep_expired(config.task_timeout).await;
    }
}
