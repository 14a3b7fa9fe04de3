//! Filesystem staging for task outputs.
//!
//! Every task owns a scratch directory `<root>/<kind>-<id>`. Writes land in a
//! uuid-suffixed temporary inside that directory and are atomically renamed
//! into place, so a reader never observes a partially written shard and a
//! crashed worker leaves nothing visible behind. Final reduce outputs are
//! promoted from the scratch directory to the root. A per-task mutex covers
//! each operation end to end, which keeps a retried task from racing a stale
//! instance that still holds the same task identity.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::codec;
use crate::error::StorageError;
use crate::task::{TaskKind, REDUCE_OUTPUT_PREFIX};
use crate::KeyValue;

/// Storage seam between workers and the filesystem.
///
/// Kept behind a trait so a job can interpose on the store, e.g. to inject
/// faults when exercising lease recovery.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Publish `entries` under `name`, owned by task `(kind, task_id)`.
    async fn write(
        &self,
        entries: &[KeyValue],
        name: &str,
        task_id: i32,
        kind: TaskKind,
    ) -> Result<(), StorageError>;

    /// Read back the entries published under `name`.
    async fn read_entries(
        &self,
        name: &str,
        task_id: i32,
        kind: TaskKind,
    ) -> Result<Vec<KeyValue>, StorageError>;

    /// Read a raw file resolved directly under the output root. Used for
    /// map inputs, which are not tracked by the file index.
    async fn read_file(
        &self,
        name: &str,
        task_id: i32,
        kind: TaskKind,
    ) -> Result<Bytes, StorageError>;

    /// Drop the named files: forget them in the index, delete them from disk
    /// and remove any scratch directory this empties. Names already cleared
    /// by an earlier instance of the task are skipped.
    async fn clear_files(
        &self,
        names: &[String],
        task_id: i32,
        kind: TaskKind,
    ) -> Result<(), StorageError>;
}

/// The local-filesystem staging store.
///
/// The file index maps a logical name (unique across the job) to the path it
/// was last published at. The root must not span filesystems, otherwise the
/// rename-based publish loses its atomicity.
pub struct StagingStore {
    root: PathBuf,
    file_index: Mutex<HashMap<String, PathBuf>>,
    task_locks: Mutex<HashMap<(TaskKind, i32), Arc<Mutex<()>>>>,
}

impl StagingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            file_index: Mutex::new(HashMap::new()),
            task_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The mutex serializing operations for one task identity.
    async fn task_lock(&self, kind: TaskKind, task_id: i32) -> Arc<Mutex<()>> {
        let mut locks = self.task_locks.lock().await;
        Arc::clone(locks.entry((kind, task_id)).or_default())
    }

    fn task_dir(&self, kind: TaskKind, task_id: i32) -> PathBuf {
        self.root.join(format!("{}-{}", kind.dir_name(), task_id))
    }
}

#[async_trait]
impl Storage for StagingStore {
    async fn write(
        &self,
        entries: &[KeyValue],
        name: &str,
        task_id: i32,
        kind: TaskKind,
    ) -> Result<(), StorageError> {
        let lock = self.task_lock(kind, task_id).await;
        let _guard = lock.lock().await;

        let task_dir = self.task_dir(kind, task_id);
        fs::create_dir_all(&task_dir).await?;

        // A write abandoned by a crashed instance leaves a stale temporary
        // behind; sweep it before staging our own.
        sweep_stale_tmp(&task_dir, name).await?;

        let tmp_path = task_dir.join(format!("{name}.{}.tmp", Uuid::new_v4()));
        fs::write(&tmp_path, codec::encode(entries)).await?;

        let final_path = task_dir.join(name);
        fs::rename(&tmp_path, &final_path).await?;
        debug!(name, task_id, ?kind, "published file");

        let mut index = self.file_index.lock().await;
        index.insert(name.to_string(), final_path.clone());

        if kind == TaskKind::Reduce && name.starts_with(REDUCE_OUTPUT_PREFIX) {
            let root_path = self.root.join(name);
            fs::rename(&final_path, &root_path).await?;
            index.insert(name.to_string(), root_path);
            drop(index);
            remove_dir_if_empty(&task_dir).await?;
        }

        Ok(())
    }

    async fn read_entries(
        &self,
        name: &str,
        task_id: i32,
        kind: TaskKind,
    ) -> Result<Vec<KeyValue>, StorageError> {
        let lock = self.task_lock(kind, task_id).await;
        let _guard = lock.lock().await;

        let path = self
            .file_index
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;

        let data = fs::read(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StorageError::NotFound(name.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;

        Ok(codec::decode(&data))
    }

    async fn read_file(
        &self,
        name: &str,
        task_id: i32,
        kind: TaskKind,
    ) -> Result<Bytes, StorageError> {
        let lock = self.task_lock(kind, task_id).await;
        let _guard = lock.lock().await;

        let data = fs::read(self.root.join(name)).await?;
        Ok(Bytes::from(data))
    }

    async fn clear_files(
        &self,
        names: &[String],
        task_id: i32,
        kind: TaskKind,
    ) -> Result<(), StorageError> {
        let lock = self.task_lock(kind, task_id).await;
        let _guard = lock.lock().await;

        for name in names {
            let removed = self.file_index.lock().await.remove(name);
            let Some(path) = removed else { continue };

            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            debug!(name, task_id, ?kind, "cleared file");

            if let Some(parent) = path.parent() {
                remove_dir_if_empty(parent).await?;
            }
        }

        Ok(())
    }
}

/// Delete leftover `<name>.<uuid>.tmp` files in `dir`.
async fn sweep_stale_tmp(dir: &Path, name: &str) -> Result<(), StorageError> {
    let prefix = format!("{name}.");
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if file_name.starts_with(&prefix) && file_name.ends_with(".tmp") {
            match fs::remove_file(entry.path()).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}

/// Remove `dir` if it exists and holds no entries. Concurrent clears of
/// sibling files may both see the directory empty; losing that race is fine,
/// so removal failures are not surfaced.
async fn remove_dir_if_empty(dir: &Path) -> Result<(), StorageError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if entries.next_entry().await?.is_none() {
        let _ = fs::remove_dir(dir).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn kv(key: &str, value: &str) -> KeyValue {
        KeyValue::new(
            Bytes::copy_from_slice(key.as_bytes()),
            Bytes::copy_from_slice(value.as_bytes()),
        )
    }

    #[tokio::test]
    async fn write_then_read_round_trips_in_order() {
        let dir = TempDir::new().unwrap();
        let store = StagingStore::new(dir.path());

        let entries = vec![kv("banana", "1"), kv("apple", "1"), kv("banana", "1")];
        store.write(&entries, "mr-0-0", 0, TaskKind::Map).await.unwrap();

        let read = store.read_entries("mr-0-0", 0, TaskKind::Map).await.unwrap();
        assert_eq!(read, entries);
    }

    #[tokio::test]
    async fn overwrite_replaces_previous_content() {
        let dir = TempDir::new().unwrap();
        let store = StagingStore::new(dir.path());

        store.write(&[kv("a", "1")], "mr-0-0", 0, TaskKind::Map).await.unwrap();
        let replacement = vec![kv("b", "2"), kv("c", "3")];
        store.write(&replacement, "mr-0-0", 0, TaskKind::Map).await.unwrap();

        let read = store.read_entries("mr-0-0", 0, TaskKind::Map).await.unwrap();
        assert_eq!(read, replacement);
    }

    #[tokio::test]
    async fn unknown_name_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = StagingStore::new(dir.path());

        let err = store.read_entries("mr-9-9", 9, TaskKind::Map).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn map_writes_stay_in_task_directory() {
        let dir = TempDir::new().unwrap();
        let store = StagingStore::new(dir.path());

        store.write(&[kv("a", "1")], "mr-2-0", 2, TaskKind::Map).await.unwrap();

        assert!(dir.path().join("map-2").join("mr-2-0").is_file());
        assert!(!dir.path().join("mr-2-0").exists());
    }

    #[tokio::test]
    async fn reduce_output_is_promoted_to_root() {
        let dir = TempDir::new().unwrap();
        let store = StagingStore::new(dir.path());

        store.write(&[kv("a", "1")], "mr-out-1", 1, TaskKind::Reduce).await.unwrap();

        assert!(dir.path().join("mr-out-1").is_file());
        // Promotion empties the scratch directory, which is then removed.
        assert!(!dir.path().join("reduce-1").exists());

        let read = store.read_entries("mr-out-1", 1, TaskKind::Reduce).await.unwrap();
        assert_eq!(read, vec![kv("a", "1")]);
    }

    #[tokio::test]
    async fn non_final_reduce_files_are_not_promoted() {
        let dir = TempDir::new().unwrap();
        let store = StagingStore::new(dir.path());

        store.write(&[kv("a", "1")], "scratch", 1, TaskKind::Reduce).await.unwrap();

        assert!(dir.path().join("reduce-1").join("scratch").is_file());
        assert!(!dir.path().join("scratch").exists());
    }

    #[tokio::test]
    async fn stale_temporaries_are_swept_before_writing() {
        let dir = TempDir::new().unwrap();
        let store = StagingStore::new(dir.path());

        let task_dir = dir.path().join("map-0");
        std::fs::create_dir_all(&task_dir).unwrap();
        let stale = task_dir.join("mr-0-0.deadbeef.tmp");
        std::fs::write(&stale, b"partial").unwrap();
        // A temporary for a longer name must survive the sweep.
        let unrelated = task_dir.join("mr-0-10.cafe.tmp");
        std::fs::write(&unrelated, b"partial").unwrap();

        store.write(&[kv("a", "1")], "mr-0-0", 0, TaskKind::Map).await.unwrap();

        assert!(!stale.exists());
        assert!(unrelated.exists());
        assert!(task_dir.join("mr-0-0").is_file());
    }

    #[tokio::test]
    async fn clear_files_removes_files_and_empty_directories() {
        let dir = TempDir::new().unwrap();
        let store = StagingStore::new(dir.path());

        store.write(&[kv("a", "1")], "mr-0-0", 0, TaskKind::Map).await.unwrap();
        store.write(&[kv("b", "1")], "mr-0-1", 0, TaskKind::Map).await.unwrap();

        let names = vec!["mr-0-0".to_string(), "mr-0-1".to_string()];
        store.clear_files(&names, 0, TaskKind::Reduce).await.unwrap();

        assert!(!dir.path().join("map-0").exists());
        let err = store.read_entries("mr-0-0", 0, TaskKind::Map).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn clearing_twice_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = StagingStore::new(dir.path());

        store.write(&[kv("a", "1")], "mr-0-0", 0, TaskKind::Map).await.unwrap();

        let names = vec!["mr-0-0".to_string()];
        store.clear_files(&names, 0, TaskKind::Reduce).await.unwrap();
        store.clear_files(&names, 0, TaskKind::Reduce).await.unwrap();
    }

    #[tokio::test]
    async fn read_file_resolves_raw_inputs_under_root() {
        let dir = TempDir::new().unwrap();
        let store = StagingStore::new(dir.path());

        std::fs::write(dir.path().join("file1.txt"), b"apple banana").unwrap();

        let content = store.read_file("file1.txt", 0, TaskKind::Map).await.unwrap();
        assert_eq!(content, Bytes::from_static(b"apple banana"));
    }

    #[tokio::test]
    async fn empty_entry_list_publishes_an_empty_file() {
        let dir = TempDir::new().unwrap();
        let store = StagingStore::new(dir.path());

        store.write(&[], "mr-0-2", 0, TaskKind::Map).await.unwrap();

        let read = store.read_entries("mr-0-2", 0, TaskKind::Map).await.unwrap();
        assert!(read.is_empty());
    }
}
