//! Line-oriented encoding for intermediate records.
//!
//! Each entry becomes `<key>\t<value>\n`. Keys and values pass through as
//! raw bytes; lines without a tab separator are skipped on decode.

use bytes::Bytes;

use crate::KeyValue;

/// Encode entries into the tab-separated line format.
pub fn encode(entries: &[KeyValue]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(entries.iter().map(|e| e.key.len() + e.value.len() + 2).sum());
    for entry in entries {
        buf.extend_from_slice(&entry.key);
        buf.push(b'\t');
        buf.extend_from_slice(&entry.value);
        buf.push(b'\n');
    }
    buf
}

/// Decode the tab-separated line format back into entries.
pub fn decode(data: &[u8]) -> Vec<KeyValue> {
    data.split(|&b| b == b'\n')
        .filter_map(|line| {
            let tab = line.iter().position(|&b| b == b'\t')?;
            Some(KeyValue::new(
                Bytes::copy_from_slice(&line[..tab]),
                Bytes::copy_from_slice(&line[tab + 1..]),
            ))
        })
        .collect()
}
