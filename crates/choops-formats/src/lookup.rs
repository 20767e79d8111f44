//! Hash to name lookup
//!
//! Archive entries and container type tags are stored as 32-bit hashes of
//! their names. The reverse mapping comes from a precomputed table that is
//! loaded once and handed to the parsers explicitly.

use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

/// Reverse lookup from a name hash to the original string
pub trait NameLookup {
    /// Name for `hash`, if known
    fn lookup(&self, hash: u32) -> Option<&str>;
}

/// Lookup that never resolves anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLookup;

impl NameLookup for NoLookup {
    fn lookup(&self, _hash: u32) -> Option<&str> {
        None
    }
}

#[derive(Debug, Deserialize)]
struct LookupRecord {
    hash: u32,
    #[serde(rename = "str")]
    name: String,
}

/// In-memory hash lookup table
///
/// The on-disk form is a JSON array of `{"hash": <u32>, "str": <name>}`
/// records.
#[derive(Debug, Clone, Default)]
pub struct HashLookupTable {
    names: HashMap<u32, String>,
}

impl HashLookupTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON reader
    pub fn from_reader<R: Read>(reader: R) -> serde_json::Result<Self> {
        let records: Vec<LookupRecord> = serde_json::from_reader(reader)?;
        Ok(Self {
            names: records
                .into_iter()
                .map(|record| (record.hash, record.name))
                .collect(),
        })
    }

    /// Load from JSON bytes
    pub fn from_slice(data: &[u8]) -> serde_json::Result<Self> {
        Self::from_reader(data)
    }

    /// Load from a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file)).map_err(std::io::Error::other)
    }

    /// Add or replace a mapping
    pub fn insert(&mut self, hash: u32, name: impl Into<String>) {
        self.names.insert(hash, name.into());
    }

    /// Number of known names
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl NameLookup for HashLookupTable {
    fn lookup(&self, hash: u32) -> Option<&str> {
        self.names.get(&hash).map(String::as_str)
    }
}

impl<T: NameLookup + ?Sized> NameLookup for &T {
    fn lookup(&self, hash: u32) -> Option<&str> {
        (**self).lookup(hash)
    }
}

impl<T: NameLookup + ?Sized> NameLookup for std::sync::Arc<T> {
    fn lookup(&self, hash: u32) -> Option<&str> {
        (**self).lookup(hash)
    }
}
