//! Job store behaviour shared by the in-memory and file-backed stores

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;

use prism::error::{JobError, StoreError};
use prism::job::{JobRecord, JobState, StepTiming, Transition};
use prism::router::Lane;
use prism::store::{FileJobStore, InMemoryJobStore, JobStore};
use prism::tools::ResultPayload;

fn record(id: &str) -> JobRecord {
    JobRecord::new(id, Lane::Heavy, "change the cat to a dog")
}

fn step(index: usize, message: &str) -> Transition {
    Transition::StepStarted {
        index,
        total: 2,
        message: message.to_string(),
    }
}

async fn run_lifecycle(store: &dyn JobStore) -> Result<()> {
    store.create(record("job-a")).await?;

    let started = store
        .apply("job-a", Transition::Start { message: "planning".into() })
        .await?;
    assert_eq!(started.state, JobState::Running);

    store.apply("job-a", step(1, "(1/2) locating object (run_object_detection)")).await?;
    store
        .apply(
            "job-a",
            Transition::StepFinished(StepTiming {
                index: 1,
                tool_name: "run_object_detection".into(),
                elapsed_ms: 12,
            }),
        )
        .await?;
    let done = store
        .apply("job-a", Transition::Succeed(ResultPayload::Image("aW1n".into())))
        .await?;
    assert_eq!(done.state, JobState::Success);

    let fetched = store.get("job-a").await?.expect("record exists");
    assert_eq!(fetched, done);
    assert_eq!(fetched.timings.len(), 1);
    assert!(fetched.finished_at.is_some());

    let late = store
        .apply(
            "job-a",
            Transition::Fail(JobError {
                kind: "ToolExecutionError".into(),
                message: "late".into(),
            }),
        )
        .await;
    assert!(matches!(late, Err(StoreError::InvalidTransition { .. })));

    assert!(matches!(
        store.apply("missing", Transition::Start { message: "x".into() }).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(store.get("missing").await?.is_none());
    Ok(())
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_in_memory_lifecycle() -> Result<()> {
    run_lifecycle(&InMemoryJobStore::new()).await
}

#[tokio::test]
async fn test_file_lifecycle() -> Result<()> {
    let tmp = TempDir::new()?;
    run_lifecycle(&FileJobStore::new(tmp.path())?).await
}

// ============================================================================
// File store specifics
// ============================================================================

#[tokio::test]
async fn test_file_store_survives_reopen() -> Result<()> {
    let tmp = TempDir::new()?;
    {
        let store = FileJobStore::new(tmp.path())?;
        store.create(record("job-b")).await?;
        store.apply("job-b", step(1, "(1/2) generating mask (run_sam)")).await?;
    }

    let reopened = FileJobStore::new(tmp.path())?;
    let record = reopened.get("job-b").await?.expect("persisted");
    assert_eq!(record.state, JobState::Running);
    assert_eq!(record.current_message.as_deref(), Some("(1/2) generating mask (run_sam)"));
    assert!(tmp.path().join("jobs").join("job-b.json").exists());
    Ok(())
}

#[tokio::test]
async fn test_file_store_list_and_purge() -> Result<()> {
    let tmp = TempDir::new()?;
    let store = FileJobStore::new(tmp.path())?;
    for id in ["job-1", "job-2", "job-3"] {
        store.create(record(id)).await?;
    }
    store
        .apply(
            "job-2",
            Transition::Fail(JobError {
                kind: "PlanningServiceError".into(),
                message: "down".into(),
            }),
        )
        .await?;

    let ids: Vec<String> = store.list().await?.into_iter().map(|r| r.job_id).collect();
    assert_eq!(ids.len(), 3);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(store.purge_expired(Duration::from_millis(5)).await?, 1);
    assert!(store.get("job-2").await?.is_none());
    assert_eq!(store.list().await?.len(), 2);
    Ok(())
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_readers_never_see_torn_records() -> Result<()> {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    store.create(record("job-c")).await?;

    let writer = {
        let store = store.clone();
        tokio::spawn(async move {
            for i in 1..=50 {
                store
                    .apply("job-c", step(i, &format!("step {}", i)))
                    .await
                    .unwrap();
            }
            store
                .apply("job-c", Transition::Succeed(ResultPayload::Text("done".into())))
                .await
                .unwrap();
        })
    };

    let mut last_step = 0;
    loop {
        let snapshot = store.get("job-c").await?.expect("exists");
        // result and error stay empty until the record is terminal
        if !snapshot.is_terminal() {
            assert!(snapshot.result.is_none() && snapshot.error.is_none());
        }
        assert!(snapshot.current_step >= last_step);
        last_step = snapshot.current_step;
        if snapshot.is_terminal() {
            break;
        }
        tokio::task::yield_now().await;
    }

    writer.await?;
    Ok(())
}
