use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

use super::{RecordStore, StoreError, SwapOutcome};

/// In-process record store for tests and single-process runs
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    collections: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<String>, StoreError> {
        let collections = self
            .collections
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(collections
            .get(collection)
            .and_then(|records| records.get(id))
            .cloned())
    }

    async fn list(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        let collections = self
            .collections
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(collections
            .get(collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(&self, collection: &str, id: &str, value: String) -> Result<bool, StoreError> {
        let mut collections = self
            .collections
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let records = collections.entry(collection.to_string()).or_default();
        if records.contains_key(id) {
            return Ok(false);
        }
        records.insert(id.to_string(), value);
        debug!(collection, id, "Inserted record");
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        collection: &str,
        id: &str,
        expected: &str,
        value: String,
    ) -> Result<SwapOutcome, StoreError> {
        let mut collections = self
            .collections
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let Some(current) = collections
            .get_mut(collection)
            .and_then(|records| records.get_mut(id))
        else {
            return Ok(SwapOutcome::Missing);
        };
        if current.as_str() != expected {
            return Ok(SwapOutcome::Stale);
        }
        *current = value;
        debug!(collection, id, "Swapped record");
        Ok(SwapOutcome::Swapped)
    }
}
