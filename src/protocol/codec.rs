//! Codec for cache entries
//!
//! The distributed tier stores each event as one JSON string per list
//! element. Decoding is lossy on purpose: a corrupt entry is logged and
//! skipped so one bad element cannot poison a whole room's history.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::Result;

/// Encode a value to its cache representation
pub fn encode<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decode a single cache entry
pub fn decode<T: DeserializeOwned>(entry: &str) -> Result<T> {
    Ok(serde_json::from_str(entry)?)
}

/// Decode a list of cache entries, skipping any that fail to parse
pub fn decode_lossy<T, I, S>(entries: I) -> Vec<T>
where
    T: DeserializeOwned,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    entries
        .into_iter()
        .filter_map(|entry| match decode(entry.as_ref()) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, "Skipping undecodable cache entry");
                None
            }
        })
        .collect()
}
