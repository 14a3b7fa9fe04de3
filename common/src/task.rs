//! The task domain model: the unit of work exchanged between the coordinator
//! and workers.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

/// File name prefix shared by all final reduce outputs. The staging store
/// promotes any reduce-owned file carrying this prefix to the output root.
pub const REDUCE_OUTPUT_PREFIX: &str = "mr-out-";

/// Name of the shard a map task writes for one reduce bucket.
pub fn shard_name(map_id: i32, bucket: usize) -> String {
    format!("mr-{map_id}-{bucket}")
}

/// Name of the final output file for one reduce bucket.
pub fn reduce_output_name(bucket: i32) -> String {
    format!("{REDUCE_OUTPUT_PREFIX}{bucket}")
}

/// What a task does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Transform one input file into one shard per reduce bucket.
    Map,

    /// Fold the matching shard of every map output into one final file.
    Reduce,

    /// Carries no payload; unblocks a worker so it can exit.
    Finish,
}

impl TaskKind {
    /// Directory name component for this kind's scratch directories.
    pub fn dir_name(self) -> &'static str {
        match self {
            TaskKind::Map => "map",
            TaskKind::Reduce => "reduce",
            TaskKind::Finish => "finish",
        }
    }
}

/// Lease state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Waiting in the idle queue.
    Idle,

    /// Leased to a worker.
    InProgress,

    /// Accepted by the coordinator. Terminal.
    Completed,
}

impl TaskStatus {
    fn encode(self) -> u8 {
        match self {
            TaskStatus::Idle => 0,
            TaskStatus::InProgress => 1,
            TaskStatus::Completed => 2,
        }
    }

    fn decode(value: u8) -> Self {
        match value {
            0 => TaskStatus::Idle,
            1 => TaskStatus::InProgress,
            _ => TaskStatus::Completed,
        }
    }
}

/// A unit of work.
///
/// Identity (`id`, `kind`, `inputs`, `n_reduce`, `bucket`) is fixed at
/// construction. The two fields that cross threads are concurrency-safe on
/// their own: `status` is an atomic the coordinator flips under its lease
/// discipline, and `outputs` is a write-once cell the executing worker fills
/// before reporting. A retried task re-registering the same deterministic
/// file names leaves observable state unchanged, so the first registration
/// wins and later ones are ignored.
///
/// Map tasks are numbered by input-file index, reduce tasks by bucket index.
/// The `FINISH` sentinel uses id −1 and bucket −1.
#[derive(Debug)]
pub struct Task {
    pub id: i32,
    pub kind: TaskKind,
    pub inputs: Vec<String>,
    /// Reducer fan-out, propagated so map tasks know how to partition.
    pub n_reduce: usize,
    /// Reduce tasks only; −1 otherwise.
    pub bucket: i32,
    status: AtomicU8,
    outputs: OnceLock<Vec<String>>,
}

impl Task {
    /// A map task over one input file.
    pub fn map(id: i32, input: String, n_reduce: usize) -> Self {
        Self::new(id, TaskKind::Map, vec![input], n_reduce, -1)
    }

    /// A reduce task over the bucket's shard from every map task.
    pub fn reduce(bucket: usize, inputs: Vec<String>, n_reduce: usize) -> Self {
        Self::new(bucket as i32, TaskKind::Reduce, inputs, n_reduce, bucket as i32)
    }

    /// The sentinel handed out once the job is done.
    pub fn finish(n_reduce: usize) -> Self {
        Self::new(-1, TaskKind::Finish, vec![String::new()], n_reduce, -1)
    }

    fn new(id: i32, kind: TaskKind, inputs: Vec<String>, n_reduce: usize, bucket: i32) -> Self {
        Self {
            id,
            kind,
            inputs,
            n_reduce,
            bucket,
            status: AtomicU8::new(TaskStatus::Idle.encode()),
            outputs: OnceLock::new(),
        }
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus::decode(self.status.load(Ordering::SeqCst))
    }

    pub fn set_status(&self, status: TaskStatus) {
        self.status.store(status.encode(), Ordering::SeqCst);
    }

    /// Record the files this task produced. First writer wins; repeated
    /// registrations from a retried instance are ignored.
    pub fn register_outputs(&self, files: Vec<String>) {
        let _ = self.outputs.set(files);
    }

    /// The registered output file names, or empty if none were registered.
    pub fn outputs(&self) -> &[String] {
        self.outputs.get().map(Vec::as_slice).unwrap_or_default()
    }

    /// Key identifying this task in the coordinator's lease table. Keyed by
    /// kind as well as id, since map task `i` and reduce task `i` share a
    /// numeric id.
    pub fn lease_key(&self) -> (TaskKind, i32) {
        (self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_sentinel_shape() {
        let task = Task::finish(3);
        assert_eq!(task.id, -1);
        assert_eq!(task.kind, TaskKind::Finish);
        assert_eq!(task.inputs, vec![String::new()]);
        assert_eq!(task.bucket, -1);
        assert_eq!(task.status(), TaskStatus::Idle);
    }

    #[test]
    fn outputs_are_write_once() {
        let task = Task::map(0, "file1.txt".into(), 2);
        assert!(task.outputs().is_empty());

        task.register_outputs(vec!["mr-0-0".into(), "mr-0-1".into()]);
        task.register_outputs(vec!["other".into()]);

        assert_eq!(task.outputs(), ["mr-0-0".to_string(), "mr-0-1".to_string()]);
    }

    #[test]
    fn naming_helpers() {
        assert_eq!(shard_name(4, 2), "mr-4-2");
        assert_eq!(reduce_output_name(1), "mr-out-1");
        assert!(reduce_output_name(0).starts_with(REDUCE_OUTPUT_PREFIX));
    }
}
