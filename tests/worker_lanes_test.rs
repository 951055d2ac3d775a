//! Worker pool behaviour: lane isolation, queue overflow, crashed jobs

mod common;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use common::{
    cat_to_dog_plan, orchestrator, vqa_plan, wait_for_running, wait_for_terminal,
    ScriptedPlanner, ScriptedTools,
};
use prism::config::WorkersConfig;
use prism::job::JobState;
use prism::router::Lane;
use prism::store::{InMemoryJobStore, JobStore};
use prism::worker::WorkerPool;

fn one_worker_per_lane(queue_capacity: usize) -> WorkersConfig {
    WorkersConfig {
        light: 1,
        heavy: 1,
        queue_capacity,
    }
}

fn pool(
    tools: Arc<ScriptedTools>,
    planner: ScriptedPlanner,
    uploads: &TempDir,
    config: WorkersConfig,
) -> (WorkerPool, Arc<dyn JobStore>) {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let orch = orchestrator(tools, store.clone(), planner, uploads.path());
    (WorkerPool::start(orch, &config), store)
}

// ============================================================================
// Crashes
// ============================================================================

#[tokio::test]
async fn test_panicking_tool_fails_job_and_keeps_lane() {
    let uploads = TempDir::new().unwrap();
    let (pool, store) = pool(
        ScriptedTools::panicking_on("boom"),
        ScriptedPlanner::AskPrompt,
        &uploads,
        one_worker_per_lane(8),
    );

    let crashed = pool.submit("boom", b"img".to_vec()).await.unwrap();
    assert_eq!(crashed.lane, Lane::Light);

    let record = wait_for_terminal(store.as_ref(), &crashed.job_id).await;
    assert_eq!(record.state, JobState::Failure);
    let error = record.error.unwrap();
    assert_eq!(error.kind, "ToolExecutionError");
    assert!(error.message.contains("panicked: answer model crashed"));
    assert!(!uploads.path().join(&crashed.job_id).exists());

    // the single light worker is still serving
    let next = pool.submit("what color is the sky?", b"img".to_vec()).await.unwrap();
    let record = wait_for_terminal(store.as_ref(), &next.job_id).await;
    assert_eq!(record.state, JobState::Success);
}

#[tokio::test]
async fn test_crash_outside_tools_is_recorded() {
    let uploads = TempDir::new().unwrap();
    let (pool, store) = pool(
        ScriptedTools::new(),
        ScriptedPlanner::PanicOn("boom"),
        &uploads,
        one_worker_per_lane(8),
    );

    let crashed = pool.submit("boom", b"img".to_vec()).await.unwrap();
    let record = wait_for_terminal(store.as_ref(), &crashed.job_id).await;
    assert_eq!(record.state, JobState::Failure);
    assert_eq!(record.error.unwrap().kind, "JobCrashedError");
    assert!(!uploads.path().join(&crashed.job_id).exists());

    let next = pool.submit("what color is the sky?", b"img".to_vec()).await.unwrap();
    let record = wait_for_terminal(store.as_ref(), &next.job_id).await;
    assert_eq!(record.state, JobState::Success);
}

// ============================================================================
// Capacity
// ============================================================================

#[tokio::test]
async fn test_full_lane_fails_overflow_job() {
    let uploads = TempDir::new().unwrap();
    let (pool, store) = pool(
        ScriptedTools::slow_answers(Duration::from_millis(800)),
        ScriptedPlanner::Plan(vqa_plan("what color?")),
        &uploads,
        one_worker_per_lane(1),
    );

    // occupies the only light worker
    let running = pool.submit("what color?", b"img".to_vec()).await.unwrap();
    wait_for_running(store.as_ref(), &running.job_id).await;

    // fills the one queue slot
    let queued = pool.submit("what color?", b"img".to_vec()).await.unwrap();

    let overflow = pool.submit("what color?", b"img".to_vec()).await.unwrap();
    let record = store.get(&overflow.job_id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Failure);
    assert_eq!(record.error.unwrap().kind, "QueueUnavailableError");
    assert!(!uploads.path().join(&overflow.job_id).exists());

    for ticket in [running, queued] {
        let record = wait_for_terminal(store.as_ref(), &ticket.job_id).await;
        assert_eq!(record.state, JobState::Success);
    }
}

#[tokio::test]
async fn test_heavy_backlog_does_not_block_light_jobs() {
    let uploads = TempDir::new().unwrap();
    let (pool, store) = pool(
        ScriptedTools::slow_edits(Duration::from_millis(1500)),
        ScriptedPlanner::ByPrompt(vec![
            ("change", cat_to_dog_plan()),
            ("", vqa_plan("what color is the sky?")),
        ]),
        &uploads,
        one_worker_per_lane(8),
    );

    let first_edit = pool.submit("change the cat to a dog", b"img".to_vec()).await.unwrap();
    let second_edit = pool.submit("change the cat to a dog", b"img".to_vec()).await.unwrap();
    assert_eq!(first_edit.lane, Lane::Heavy);
    wait_for_running(store.as_ref(), &first_edit.job_id).await;

    let question = pool.submit("what color is the sky?", b"img".to_vec()).await.unwrap();
    assert_eq!(question.lane, Lane::Light);

    let answered = wait_for_terminal(store.as_ref(), &question.job_id).await;
    assert_eq!(answered.state, JobState::Success);

    // the heavy lane is still busy with its backlog
    let edit = store.get(&second_edit.job_id).await.unwrap().unwrap();
    assert!(!edit.is_terminal());

    for ticket in [first_edit, second_edit] {
        let record = wait_for_terminal(store.as_ref(), &ticket.job_id).await;
        assert_eq!(record.state, JobState::Success);
    }
}
