use std::sync::Arc;
use tracing::debug;

use super::errors::WorkflowError;
use super::types::Workflow;
use crate::store::{RecordStore, StoreError, SwapOutcome};

pub const WORKFLOWS_COLLECTION: &str = "workflows";
pub const DEFAULT_MAX_UPDATE_ATTEMPTS: u32 = 16;

/// Typed access to workflow records.
///
/// `update` is a read-modify-swap loop: the mutation runs against the value
/// just read and is only persisted if the stored record has not changed in the
/// meantime. On a lost race the mutation runs again against the fresh record,
/// so guards inside the mutation always see the latest status.
#[derive(Clone)]
pub struct WorkflowRepository {
    store: Arc<dyn RecordStore>,
    max_update_attempts: u32,
}

impl WorkflowRepository {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            max_update_attempts: DEFAULT_MAX_UPDATE_ATTEMPTS,
        }
    }

    pub fn with_max_update_attempts(mut self, attempts: u32) -> Self {
        self.max_update_attempts = attempts.max(1);
        self
    }

    pub async fn get(&self, id: &str) -> Result<Workflow, WorkflowError> {
        let raw = self.load_raw(id).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// All workflows, oldest first
    pub async fn list(&self) -> Result<Vec<Workflow>, WorkflowError> {
        let mut workflows = self
            .store
            .list(WORKFLOWS_COLLECTION)
            .await?
            .iter()
            .map(|raw| serde_json::from_str::<Workflow>(raw))
            .collect::<Result<Vec<_>, _>>()?;
        workflows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(workflows)
    }

    pub async fn create(&self, workflow: Workflow) -> Result<Workflow, WorkflowError> {
        let raw = serde_json::to_string(&workflow)?;
        let inserted = self
            .store
            .insert(WORKFLOWS_COLLECTION, &workflow.id, raw)
            .await?;
        if !inserted {
            return Err(WorkflowError::AlreadyExists { id: workflow.id });
        }
        debug!(workflow_id = %workflow.id, "Stored new workflow");
        Ok(workflow)
    }

    /// Apply `mutation` to the stored record atomically and return the result.
    ///
    /// If the mutation returns an error nothing is written and the error is
    /// passed through.
    pub async fn update<F>(&self, id: &str, mut mutation: F) -> Result<Workflow, WorkflowError>
    where
        F: FnMut(&mut Workflow) -> Result<(), WorkflowError> + Send,
    {
        for attempt in 1..=self.max_update_attempts {
            let current_raw = self.load_raw(id).await?;
            let mut workflow: Workflow = serde_json::from_str(&current_raw)?;
            mutation(&mut workflow)?;
            let next_raw = serde_json::to_string(&workflow)?;

            match self
                .store
                .compare_and_swap(WORKFLOWS_COLLECTION, id, &current_raw, next_raw)
                .await?
            {
                SwapOutcome::Swapped => return Ok(workflow),
                SwapOutcome::Missing => return Err(WorkflowError::NotFound { id: id.to_string() }),
                SwapOutcome::Stale => {
                    debug!(workflow_id = id, attempt, "Workflow changed underneath update, retrying");
                }
            }
        }

        Err(StoreError::Contention {
            collection: WORKFLOWS_COLLECTION.to_string(),
            id: id.to_string(),
            attempts: self.max_update_attempts,
        }
        .into())
    }

    async fn load_raw(&self, id: &str) -> Result<String, WorkflowError> {
        self.store
            .get(WORKFLOWS_COLLECTION, id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound { id: id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;
    use crate::workflows::types::WorkflowStatus;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn sample(id: &str) -> Workflow {
        Workflow {
            id: id.to_string(),
            name: "Assay A".to_string(),
            device_id: "liquid-handler-1".to_string(),
            sample_barcodes: vec!["SAMPLE001".to_string()],
            steps: vec!["pipette".into()],
            status: WorkflowStatus::Created,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let repo = WorkflowRepository::new(Arc::new(MemoryRecordStore::new()));
        repo.create(sample("wf-1")).await.unwrap();

        let loaded = repo.get("wf-1").await.unwrap();
        assert_eq!(loaded.name, "Assay A");
        assert!(matches!(
            repo.get("wf-2").await,
            Err(WorkflowError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_id() {
        let repo = WorkflowRepository::new(Arc::new(MemoryRecordStore::new()));
        repo.create(sample("wf-1")).await.unwrap();

        let result = repo.create(sample("wf-1")).await;
        assert!(matches!(result, Err(WorkflowError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_list_is_oldest_first() {
        let repo = WorkflowRepository::new(Arc::new(MemoryRecordStore::new()));
        let mut older = sample("wf-b");
        older.created_at = Utc::now() - Duration::minutes(5);
        repo.create(sample("wf-a")).await.unwrap();
        repo.create(older).await.unwrap();

        let ids: Vec<String> = repo.list().await.unwrap().into_iter().map(|w| w.id).collect();
        assert_eq!(ids, vec!["wf-b".to_string(), "wf-a".to_string()]);
    }

    #[tokio::test]
    async fn test_rejected_mutation_writes_nothing() {
        let repo = WorkflowRepository::new(Arc::new(MemoryRecordStore::new()));
        repo.create(sample("wf-1")).await.unwrap();

        let result = repo
            .update("wf-1", |wf| {
                wf.status = WorkflowStatus::Running;
                Err(WorkflowError::Validation {
                    reason: "nope".to_string(),
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(repo.get("wf-1").await.unwrap().status, WorkflowStatus::Created);
    }

    /// Store whose first N swaps report a concurrent writer
    struct FlakyStore {
        inner: MemoryRecordStore,
        stale_swaps: AtomicU32,
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn get(&self, collection: &str, id: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(collection, id).await
        }

        async fn list(&self, collection: &str) -> Result<Vec<String>, StoreError> {
            self.inner.list(collection).await
        }

        async fn insert(&self, collection: &str, id: &str, value: String) -> Result<bool, StoreError> {
            self.inner.insert(collection, id, value).await
        }

        async fn compare_and_swap(
            &self,
            collection: &str,
            id: &str,
            expected: &str,
            value: String,
        ) -> Result<SwapOutcome, StoreError> {
            let remaining = self.stale_swaps.load(Ordering::SeqCst);
            if remaining > 0 {
                self.stale_swaps.store(remaining - 1, Ordering::SeqCst);
                return Ok(SwapOutcome::Stale);
            }
            self.inner.compare_and_swap(collection, id, expected, value).await
        }
    }

    #[tokio::test]
    async fn test_update_retries_after_stale_swap() {
        let store = Arc::new(FlakyStore {
            inner: MemoryRecordStore::new(),
            stale_swaps: AtomicU32::new(2),
        });
        let repo = WorkflowRepository::new(store);
        repo.create(sample("wf-1")).await.unwrap();

        let mut calls = 0;
        let updated = repo
            .update("wf-1", |wf| {
                calls += 1;
                wf.name = "Assay B".to_string();
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(updated.name, "Assay B");
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_update_gives_up_under_contention() {
        let store = Arc::new(FlakyStore {
            inner: MemoryRecordStore::new(),
            stale_swaps: AtomicU32::new(10),
        });
        let repo = WorkflowRepository::new(store).with_max_update_attempts(3);
        repo.create(sample("wf-1")).await.unwrap();

        let result = repo.update("wf-1", |_| Ok(())).await;
        assert!(matches!(
            result,
            Err(WorkflowError::Store(StoreError::Contention { attempts: 3, .. }))
        ));
    }
}
