//! Record storage
//!
//! Every entity lives under its own key so that writers touching different
//! records never contend, and writers touching the same record are serialized
//! by compare-and-swap instead of whole-collection overwrites.

pub mod memory;
#[cfg(feature = "redis-store")]
pub mod redis_store;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryRecordStore;
#[cfg(feature = "redis-store")]
pub use redis_store::RedisRecordStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store connection error: {0}")]
    Connection(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record {collection}/{id} is contended: gave up after {attempts} attempts")]
    Contention {
        collection: String,
        id: String,
        attempts: u32,
    },

    #[error("Store internal error: {0}")]
    Internal(String),
}

/// Result of a compare-and-swap against a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    /// The stored value matched `expected` and was replaced
    Swapped,
    /// The stored value changed since it was read
    Stale,
    /// No record exists under the key
    Missing,
}

/// Shared key-value storage of serialized records, grouped by collection
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch the raw serialized record
    async fn get(&self, collection: &str, id: &str) -> Result<Option<String>, StoreError>;

    /// Fetch every record in a collection, in no particular order
    async fn list(&self, collection: &str) -> Result<Vec<String>, StoreError>;

    /// Store a record only if nothing exists under its id.
    /// Returns `false` when the id is already taken.
    async fn insert(&self, collection: &str, id: &str, value: String) -> Result<bool, StoreError>;

    /// Replace a record only if it still equals `expected`
    async fn compare_and_swap(
        &self,
        collection: &str,
        id: &str,
        expected: &str,
        value: String,
    ) -> Result<SwapOutcome, StoreError>;
}
