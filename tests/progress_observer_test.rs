//! Observation channel tests: ordering, deduplication, disconnects

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{cat_image, harness};
use prism::job::{JobInput, JobRecord, JobState, Transition};
use prism::progress::{Frame, JobObserver};
use prism::router::Lane;
use prism::store::{InMemoryJobStore, JobStore};
use prism::tools::ResultPayload;

async fn collect(mut rx: tokio::sync::mpsc::Receiver<Frame>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        frames.push(frame);
    }
    frames
}

#[tokio::test]
async fn test_no_consecutive_duplicates_and_single_terminal() {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    store.create(JobRecord::new("job-1", Lane::Light, "p")).await.unwrap();

    let observer = JobObserver::new(store.clone(), Duration::from_millis(5));
    let rx = observer.watch("job-1");

    let writer = {
        let store = store.clone();
        tokio::spawn(async move {
            let messages = ["planning", "planning", "(1/2) a", "(1/2) a", "(2/2) b"];
            for (i, message) in messages.iter().enumerate() {
                store
                    .apply(
                        "job-1",
                        Transition::StepStarted {
                            index: i,
                            total: 2,
                            message: message.to_string(),
                        },
                    )
                    .await
                    .unwrap();
                // let the observer poll the same snapshot several times
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            store
                .apply("job-1", Transition::Succeed(ResultPayload::Text("blue".into())))
                .await
                .unwrap();
        })
    };

    let frames = collect(rx).await;
    writer.await.unwrap();

    for pair in frames.windows(2) {
        assert_ne!(pair[0], pair[1], "duplicate frame: {:?}", pair[0]);
    }
    assert_eq!(frames.iter().filter(|f| f.is_terminal()).count(), 1);
    assert_eq!(
        frames.last(),
        Some(&Frame::Success(ResultPayload::Text("blue".into())))
    );

    // whatever was observed arrives in production order
    let progress: Vec<&str> = frames
        .iter()
        .filter_map(|f| match f {
            Frame::Progress { message } => Some(message.as_str()),
            _ => None,
        })
        .collect();
    let expected = ["planning", "(1/2) a", "(2/2) b"];
    let mut cursor = 0;
    for message in progress {
        let pos = expected[cursor..]
            .iter()
            .position(|m| *m == message)
            .expect("message out of order");
        cursor += pos + 1;
    }
}

#[tokio::test]
async fn test_unknown_job_yields_failed_frame() {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let observer = JobObserver::new(store, Duration::from_millis(5));

    let frames = collect(observer.watch("nope")).await;
    assert_eq!(frames.len(), 1);
    let wire = frames[0].to_json();
    assert_eq!(wire["status"], "FAILED");
    assert!(wire["error"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn test_failure_frame_carries_kind() {
    let h = harness();
    h.store
        .create(JobRecord::new("job-bad", Lane::Light, "p"))
        .await
        .unwrap();
    let observer = JobObserver::new(h.store.clone(), Duration::from_millis(5));
    let rx = observer.watch("job-bad");

    let plan = json!({"plan": [{"tool_name": "run_unknown", "parameters": {}}]});
    let _ = h
        .executor
        .execute("job-bad", &plan, JobInput::new(cat_image(), "p"))
        .await;

    let frames = collect(rx).await;
    let last = frames.last().unwrap().to_json();
    assert_eq!(last["status"], "FAILED");
    assert_eq!(last["kind"], "UnknownToolError");
    assert!(last["error"]
        .as_str()
        .unwrap()
        .starts_with("UnknownToolError: step 1: unknown tool 'run_unknown'"));
}

#[tokio::test]
async fn test_disconnect_does_not_cancel_job() {
    let h = harness();
    h.store
        .create(JobRecord::new("job-gone", Lane::Heavy, "p"))
        .await
        .unwrap();

    let observer = JobObserver::new(h.store.clone(), Duration::from_millis(5));
    drop(observer.watch("job-gone"));

    let plan = json!({"plan": [
        {"tool_name": "run_object_detection", "parameters": {"query": "cat"}},
        {"tool_name": "run_sam", "parameters": {"box": "[PREVIOUS_STEP_RESULT]"}}
    ]});
    h.executor
        .execute("job-gone", &plan, JobInput::new(cat_image(), "p"))
        .await
        .unwrap();

    let record = h.store.get("job-gone").await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Success);
    assert_eq!(h.tools.calls(), vec!["detect", "segment"]);
}
