//! status.rs
//!
//! Parsing of the status block returned by the apcupsd NIS.

use log::debug;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Separator for key-value pairs
const SEP: char = ':';

/// Ordered key/value view of a UPS status block.
///
/// Keys keep the position of their first insertion; inserting an existing key
/// replaces its value in place.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusMap {
    entries: Vec<(String, String)>,
}

impl StatusMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, overwriting any earlier value for the same key.
    pub fn insert(&mut self, key: String, value: String) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Serialize for StatusMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Parse a raw status blob into a [`StatusMap`].
///
/// Each line is split on its first `:`, both halves are trimmed and the key is
/// lowercased. A line without a separator becomes a key with an empty value.
/// The first line whose key is empty ends the block; nothing after it is read.
pub fn parse(raw_status: &str) -> StatusMap {
    let mut map = StatusMap::new();
    let mut lines = raw_status.split('\n');

    while let Some(line) = lines.next() {
        let (key, value) = line.split_once(SEP).unwrap_or((line, ""));
        let key = key.trim().to_ascii_lowercase();

        if key.is_empty() {
            let skipped = lines.filter(|rest| !rest.trim().is_empty()).count();
            if skipped > 0 {
                debug!("Status block ended at an empty key, {} trailing line(s) ignored", skipped);
            }
            break;
        }

        map.insert(key, value.trim().to_string());
    }

    map
}
