//! Device Data Store
//!
//! The read path the query service runs against:
//!
//! - **sql**: Compiles a [`FilterSpec`] into a parameterized SELECT
//! - **sqlite**: SQLite-backed document store
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! FilterSpec → compile → SELECT ... json_extract(doc, ?) ... → Records
//! ```

pub mod error;
pub mod sql;
pub mod sqlite;

use async_trait::async_trait;

use crate::query::FilterSpec;

pub use error::{StorageError, StorageResult};
pub use sqlite::SqliteStore;

/// A stored device data record: an ordered JSON object
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Read access to device data records
#[async_trait]
pub trait DeviceDataStore: Send + Sync {
    /// All records matching `spec`, ordered by its sort field with ties in
    /// storage order. An empty vector when nothing matches.
    async fn find(&self, spec: &FilterSpec) -> StorageResult<Vec<Record>>;

    /// Check that the store is reachable
    async fn ping(&self) -> StorageResult<()>;
}

/// The sample dataset used by tests and benchmarks
#[cfg(test)]
pub(crate) fn fixture_documents() -> Vec<serde_json::Value> {
    serde_json::from_str(include_str!("testdata/device_data.json"))
        .expect("fixture dataset is valid JSON")
}

/// An in-memory store seeded with the sample dataset
#[cfg(test)]
pub(crate) fn fixture_store() -> SqliteStore {
    let store = SqliteStore::open("sqlite::memory:").expect("open memory store");
    store
        .insert_documents(&fixture_documents())
        .expect("seed fixture dataset");
    store
}
