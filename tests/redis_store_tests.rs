//! Redis record store round trips
//!
//! Needs a running Redis; run with `REDIS_URL=redis://localhost:6379 cargo test -- --ignored`.

#![cfg(feature = "redis-store")]

use std::sync::Arc;

use labflow::devices::SimulatedDevices;
use labflow::store::{RecordStore, RedisRecordStore, SwapOutcome};
use labflow::workflows::{NewWorkflow, WorkflowRepository, WorkflowStateMachine, WorkflowStatus};
use labflow::generate_correlation_id;

fn store() -> RedisRecordStore {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    // Fresh prefix per run so reruns never see old records
    RedisRecordStore::new(&url, format!("labflow-test-{}", generate_correlation_id())).unwrap()
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_insert_and_swap_are_atomic() {
    let store = store();

    assert!(store.insert("workflows", "wf-1", "v1".to_string()).await.unwrap());
    assert!(!store.insert("workflows", "wf-1", "other".to_string()).await.unwrap());

    assert_eq!(
        store.compare_and_swap("workflows", "wf-1", "stale", "v2".to_string()).await.unwrap(),
        SwapOutcome::Stale
    );
    assert_eq!(
        store.compare_and_swap("workflows", "wf-1", "v1", "v2".to_string()).await.unwrap(),
        SwapOutcome::Swapped
    );
    assert_eq!(
        store.compare_and_swap("workflows", "wf-9", "v1", "v2".to_string()).await.unwrap(),
        SwapOutcome::Missing
    );

    assert_eq!(store.get("workflows", "wf-1").await.unwrap().as_deref(), Some("v2"));
    assert_eq!(store.list("workflows").await.unwrap(), vec!["v2".to_string()]);
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_lifecycle_persists_in_redis() {
    let store: Arc<dyn RecordStore> = Arc::new(store());
    let devices = Arc::new(SimulatedDevices::with_default_lab().with_booking_store(Arc::clone(&store)));
    let machine = WorkflowStateMachine::new(WorkflowRepository::new(store), devices.clone());

    let created = machine
        .create(NewWorkflow::new("Assay A", "liquid-handler-1").with_steps(["pipette", "dispense"]))
        .await
        .unwrap();
    machine.start(&created.id).await.unwrap();
    machine.execute_step(&created.id, 1).await.unwrap();
    let completed = machine.complete(&created.id).await.unwrap();

    assert_eq!(completed.status, WorkflowStatus::Completed);
    assert_eq!(machine.get(&created.id).await.unwrap(), completed);
    assert_eq!(machine.list().await.unwrap().len(), 1);
    assert_eq!(devices.holder("liquid-handler-1").await.unwrap(), None);
}
