//! Shared building blocks for the minimr engine: key-value records, the
//! application function signatures, intermediate-key hashing, the task domain
//! model and the staging store that workers publish their output through.
//! Everything here runs inside a single process; data lives on the local
//! filesystem rather than on a distributed store.

use std::fmt;
use std::fmt::Formatter;
use std::hash::Hasher;

use bytes::Bytes;

pub mod codec;
pub mod error;
pub mod staging;
pub mod task;
pub mod validate;

pub use error::{StorageError, ValidationError};
pub use staging::{StagingStore, Storage};
pub use task::{Task, TaskKind, TaskStatus};

/////////////////////////////////////////////////////////////////////////////
// MapReduce application types
/////////////////////////////////////////////////////////////////////////////

/// The output of an application map function.
///
/// There are 2 layers of [`anyhow::Result`]s here. The outer layer
/// accounts for errors that arise while creating the iterator.
/// The inner layer accounts for errors that occur during iteration.
///
/// This accomodates both batch (all keys emitted at once) and lazy
/// (keys only emitted when the iterator is consumed) map operations.
pub type MapOutput = anyhow::Result<Box<dyn Iterator<Item = anyhow::Result<KeyValue>>>>;

/// A map function takes the input file name and its content as a key-value
/// pair and returns an iterator that yields intermediate key-value pairs.
pub type MapFn = fn(kv: KeyValue) -> MapOutput;

/// A reduce function takes in a key and an iterator over the values collected
/// for that key. It returns an [`anyhow::Result`] containing a single output
/// value.
pub type ReduceFn =
    fn(key: Bytes, values: Box<dyn Iterator<Item = Bytes> + '_>) -> anyhow::Result<Bytes>;

/// A map reduce application.
#[derive(Copy, Clone)]
pub struct Workload {
    pub map_fn: MapFn,
    pub reduce_fn: ReduceFn,
}

/////////////////////////////////////////////////////////////////////////////
// Key-value pairs
/////////////////////////////////////////////////////////////////////////////

/// A single key-value pair.
///
/// Keys and values are opaque byte sequences; the line-oriented intermediate
/// encoding requires that neither contains a tab or a newline.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct KeyValue {
    /// The key.
    pub key: Bytes,

    /// The value.
    pub value: Bytes,
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}",
            String::from_utf8_lossy(&self.key),
            String::from_utf8_lossy(&self.value)
        )
    }
}

impl KeyValue {
    /// Construct a new key-value pair from the given key and value.
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }

    /// Get the key of this key-value pair.
    ///
    /// This method is cheap, since [`Bytes`] are cheaply cloneable.
    #[inline]
    pub fn key(&self) -> Bytes {
        self.key.clone()
    }

    /// Consumes the key-value pair and returns the value.
    #[inline]
    pub fn into_value(self) -> Bytes {
        self.value
    }
}

/// Hashes an intermediate key. The reduce bucket for a key is
/// `ihash(key) % n_reduce`; the result is masked to a non-negative
/// machine integer so the modulo never sees a sign.
pub fn ihash(key: &[u8]) -> u32 {
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(key);
    (hasher.finish() & 0x7fff_ffff) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ihash_is_non_negative_and_stable() {
        let first = ihash(b"apple");
        let second = ihash(b"apple");
        assert_eq!(first, second);
        assert!(first <= 0x7fff_ffff);
    }

    #[test]
    fn ihash_spreads_keys() {
        // Not a distribution test, just a guard against a constant hash.
        let buckets: std::collections::HashSet<u32> =
            [b"apple".as_ref(), b"banana", b"orange", b"grape", b"kiwi"]
                .iter()
                .map(|k| ihash(k) % 8)
                .collect();
        assert!(buckets.len() > 1);
    }
}
