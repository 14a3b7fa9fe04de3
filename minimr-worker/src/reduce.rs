//! The reduce path: every map task's shard for one bucket in, one final
//! output file out.

use std::collections::BTreeMap;

use anyhow::Result;
use bytes::Bytes;
use tracing::info;

use common::task::reduce_output_name;
use common::{KeyValue, ReduceFn, Storage, Task, TaskKind};
use minimr_coordinator::Coordinator;

/// Execute a reduce task end to end: group, fold, publish, report, then
/// erase the consumed shards.
///
/// Grouping goes through an ordered map so keys come out in lexicographic
/// byte order and a bucket's output has a deterministic layout. An empty
/// group set still publishes its (empty) output file.
pub(crate) async fn perform_reduce(
    task: &Task,
    reduce_fn: ReduceFn,
    storage: &dyn Storage,
    coordinator: &Coordinator,
) -> Result<()> {
    info!(id = task.id, bucket = task.bucket, "starting reduce task");

    let mut grouped: BTreeMap<Bytes, Vec<Bytes>> = BTreeMap::new();
    for name in &task.inputs {
        for entry in storage.read_entries(name, task.id, task.kind).await? {
            grouped.entry(entry.key).or_default().push(entry.value);
        }
    }

    let mut results = Vec::with_capacity(grouped.len());
    for (key, values) in grouped {
        let reduced = (reduce_fn)(key.clone(), Box::new(values.into_iter()))?;
        results.push(KeyValue::new(key, reduced));
    }

    let name = reduce_output_name(task.bucket);
    storage.write(&results, &name, task.id, task.kind).await?;
    task.register_outputs(vec![name]);

    coordinator.report_task(task).await;

    // Erase the consumed intermediates only after the completion is counted;
    // a failure past this point leaves the lease already settled.
    storage
        .clear_files(&task.inputs, task.id, TaskKind::Reduce)
        .await?;
    info!(id = task.id, bucket = task.bucket, "completed reduce task");
    Ok(())
}
