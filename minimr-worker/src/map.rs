//! The map path: one input file in, one partition shard per reduce bucket out.

use anyhow::{bail, Result};
use bytes::Bytes;
use tracing::info;

use common::task::shard_name;
use common::{ihash, KeyValue, MapFn, Storage, Task};
use minimr_coordinator::Coordinator;

/// Execute a map task end to end and report it.
///
/// The mapper sees `(file name, content)` as a key-value pair. Every bucket
/// publishes a shard, empty ones included, so the reduce side can read the
/// full cross-section uniformly.
pub(crate) async fn perform_map(
    task: &Task,
    map_fn: MapFn,
    storage: &dyn Storage,
    coordinator: &Coordinator,
) -> Result<()> {
    let Some(input) = task.inputs.first() else {
        bail!("map task {} has no input file", task.id);
    };
    info!(id = task.id, input, "starting map task");

    let content = storage.read_file(input, task.id, task.kind).await?;
    let entries = (map_fn)(KeyValue::new(Bytes::from(input.clone()), content))?;

    let mut buckets: Vec<Vec<KeyValue>> = vec![Vec::new(); task.n_reduce];
    for entry in entries {
        let entry = entry?;
        let bucket = ihash(&entry.key) as usize % task.n_reduce;
        buckets[bucket].push(entry);
    }

    let mut outputs = Vec::with_capacity(task.n_reduce);
    for (bucket, entries) in buckets.iter().enumerate() {
        let name = shard_name(task.id, bucket);
        storage.write(entries, &name, task.id, task.kind).await?;
        outputs.push(name);
    }

    task.register_outputs(outputs);
    coordinator.report_task(task).await;
    info!(id = task.id, "completed map task");
    Ok(())
}
