//! The classic word-count MapReduce application: emit `(word, "1")` for
//! every lowercased word, sum the counts per word.

use anyhow::Result;
use bytes::Bytes;

use common::{KeyValue, MapOutput, Workload};

pub fn map(kv: KeyValue) -> MapOutput {
    let text = String::from_utf8(kv.value.to_vec())?;

    let words: Vec<Result<KeyValue>> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| {
            Ok(KeyValue::new(
                Bytes::from(word.to_lowercase()),
                Bytes::from_static(b"1"),
            ))
        })
        .collect();

    Ok(Box::new(words.into_iter()))
}

pub fn reduce(_key: Bytes, values: Box<dyn Iterator<Item = Bytes> + '_>) -> Result<Bytes> {
    let mut sum = 0u64;
    for value in values {
        sum += std::str::from_utf8(&value)?.parse::<u64>()?;
    }

    Ok(Bytes::from(sum.to_string()))
}

/// The word-count workload, ready to hand to a worker pool.
pub fn workload() -> Workload {
    Workload {
        map_fn: map,
        reduce_fn: reduce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_lowercases_and_splits_on_non_alphanumerics() {
        let kv = KeyValue::new(
            Bytes::from_static(b"file1.txt"),
            Bytes::from_static(b"Apple banana, apple!"),
        );
        let words: Vec<String> = map(kv)
            .unwrap()
            .map(|entry| String::from_utf8(entry.unwrap().key.to_vec()).unwrap())
            .collect();
        assert_eq!(words, vec!["apple", "banana", "apple"]);
    }

    #[test]
    fn reduce_sums_decimal_counts() {
        let values: Vec<Bytes> = vec![
            Bytes::from_static(b"1"),
            Bytes::from_static(b"2"),
            Bytes::from_static(b"1"),
        ];
        let sum = reduce(Bytes::from_static(b"apple"), Box::new(values.into_iter())).unwrap();
        assert_eq!(sum, Bytes::from_static(b"4"));
    }

    #[test]
    fn empty_content_maps_to_nothing() {
        let kv = KeyValue::new(Bytes::from_static(b"empty.txt"), Bytes::new());
        assert_eq!(map(kv).unwrap().count(), 0);
    }
}
