//! In-memory map store.
//!
//! The replicated store is an external collaborator in production; this
//! in-process implementation backs the runner binary, the integration
//! tests, and any embedder that does not bring its own storage.

use livequery_core::{Record, RecordCatalog, RecordSource};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// One named map of records.
#[derive(Debug, Default)]
pub struct MemoryMap {
    records: RwLock<BTreeMap<String, Record>>,
}

impl MemoryMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record, returning the previous value.
    pub fn set(&self, key: &str, record: Record) -> Option<Record> {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), record)
    }

    /// Remove a record, returning the previous value.
    pub fn remove(&self, key: &str) -> Option<Record> {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// True when the map holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot all entries, in key order.
    pub fn entries(&self) -> Vec<(String, Record)> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl RecordSource for MemoryMap {
    fn keys(&self) -> Vec<String> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    fn get_record(&self, key: &str) -> Option<Record> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }
}

/// A set of named in-memory maps.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    maps: RwLock<BTreeMap<String, Arc<MemoryMap>>>,
}

impl MemoryCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the named map.
    pub fn map(&self, name: &str) -> Arc<MemoryMap> {
        let mut maps = self.maps.write().unwrap_or_else(|e| e.into_inner());
        maps.entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryMap::new()))
            .clone()
    }
}

impl RecordCatalog for MemoryCatalog {
    fn open(&self, map: &str) -> Option<Arc<dyn RecordSource>> {
        self.maps
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(map)
            .map(|m| m.clone() as Arc<dyn RecordSource>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livequery_core::Value;

    #[test]
    fn test_set_get_remove() {
        let map = MemoryMap::new();
        let mut record = Record::new();
        record.insert("a".to_string(), Value::Int(1));

        assert!(map.set("k", record.clone()).is_none());
        assert_eq!(map.get_record("k"), Some(record.clone()));
        assert_eq!(map.set("k", Record::new()), Some(record));
        assert!(map.remove("k").is_some());
        assert!(map.remove("k").is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn test_keys_sorted() {
        let map = MemoryMap::new();
        for k in ["b", "a", "c"] {
            map.set(k, Record::new());
        }
        assert_eq!(map.keys(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_catalog_creates_on_demand() {
        let catalog = MemoryCatalog::new();
        assert!(catalog.open("maps").is_none());
        let map = catalog.map("maps");
        map.set("k", Record::new());
        let reopened = catalog.open("maps").unwrap();
        assert_eq!(reopened.keys(), vec!["k"]);
    }
}
