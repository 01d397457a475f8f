//! Capability interface for reading map data.
//!
//! The replicated store is an external collaborator. The engine only needs
//! two operations from a map: enumerate its keys and fetch a record, so
//! that is the whole contract.

use crate::value::Record;

/// Read access to the records of one named map.
pub trait RecordSource: Send + Sync {
    /// All keys currently present in the map.
    fn keys(&self) -> Vec<String>;

    /// Fetch the record stored under `key`, if any.
    fn get_record(&self, key: &str) -> Option<Record>;
}

/// Resolve a map name to its [`RecordSource`].
pub trait RecordCatalog: Send + Sync {
    /// Open the named map, if it exists.
    fn open(&self, map: &str) -> Option<std::sync::Arc<dyn RecordSource>>;
}
