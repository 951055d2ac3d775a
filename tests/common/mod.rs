//! Scripted tool backends and planners shared by the integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use prism::config::ExecutorConfig;
use prism::error::{PrismError, Result};
use prism::executor::PlanExecutor;
use prism::job::{JobRecord, JobState};
use prism::orchestrator::Orchestrator;
use prism::planner::PlanningService;
use prism::router::QueueRouter;
use prism::store::{InMemoryJobStore, JobStore};
use prism::tools::{
    Answerer, BoundingBox, Detector, Dispatcher, EditRequest, Editor, Image, Segmenter,
    ToolRegistry, Toolbox,
};

/// The scenario image has a cat here
pub const CAT_BOX: [f64; 4] = [10.0, 10.0, 100.0, 100.0];

/// In-process stand-in for the inference server
///
/// Finds only cats, answers every question with "blue", and remembers the
/// images it was handed so tests can check data flow by identity. Questions
/// equal to `panic_question` make the answerer panic.
#[derive(Default)]
pub struct ScriptedTools {
    pub calls: Mutex<Vec<String>>,
    pub last_mask: Mutex<Option<Image>>,
    pub edit_inputs: Mutex<Vec<(Image, Option<Image>)>>,
    pub answer_delay: Option<Duration>,
    pub edit_delay: Option<Duration>,
    pub panic_question: Option<String>,
}

impl ScriptedTools {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow_answers(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            answer_delay: Some(delay),
            ..Default::default()
        })
    }

    pub fn slow_edits(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            edit_delay: Some(delay),
            ..Default::default()
        })
    }

    pub fn panicking_on(question: &str) -> Arc<Self> {
        Arc::new(Self {
            panic_question: Some(question.to_string()),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl Detector for ScriptedTools {
    async fn detect(&self, _image: &Image, query: &str) -> anyhow::Result<Option<BoundingBox>> {
        self.record("detect");
        if query.contains("cat") {
            Ok(Some(BoundingBox::try_from(CAT_BOX).map_err(anyhow::Error::msg)?))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl Segmenter for ScriptedTools {
    async fn segment(&self, _image: &Image, bbox: &BoundingBox) -> anyhow::Result<Image> {
        self.record("segment");
        let mask = Image::from_bytes(format!("mask{}", bbox).into_bytes());
        *self.last_mask.lock().unwrap() = Some(mask.clone());
        Ok(mask)
    }
}

#[async_trait]
impl Editor for ScriptedTools {
    async fn edit(&self, request: EditRequest<'_>) -> anyhow::Result<Image> {
        self.record("edit");
        if let Some(delay) = self.edit_delay {
            tokio::time::sleep(delay).await;
        }
        self.edit_inputs
            .lock()
            .unwrap()
            .push((request.image.clone(), request.mask.cloned()));
        Ok(Image::from_bytes(format!("edited:{}", request.prompt).into_bytes()))
    }
}

#[async_trait]
impl Answerer for ScriptedTools {
    async fn answer(&self, _image: &Image, question: &str) -> anyhow::Result<String> {
        self.record("answer");
        if self.panic_question.as_deref() == Some(question) {
            panic!("answer model crashed");
        }
        if let Some(delay) = self.answer_delay {
            tokio::time::sleep(delay).await;
        }
        Ok("blue".to_string())
    }
}

/// Planner returning canned plans, or failing like an unreachable service
pub enum ScriptedPlanner {
    Plan(Value),
    /// A single VQA step asking the user's prompt verbatim
    AskPrompt,
    /// First plan whose key occurs in the prompt, else the last plan
    ByPrompt(Vec<(&'static str, Value)>),
    /// Panics on prompts containing the key, else behaves like `AskPrompt`
    PanicOn(&'static str),
    Unavailable,
}

pub fn vqa_plan(question: &str) -> Value {
    json!({"plan": [{"tool_name": "run_vqa", "parameters": {"question": question}}]})
}

pub fn cat_to_dog_plan() -> Value {
    json!({"plan": [
        {"tool_name": "run_object_detection", "parameters": {"query": "cat"}},
        {"tool_name": "run_sam", "parameters": {"box": "[PREVIOUS_STEP_RESULT]"}},
        {"tool_name": "run_inpainting", "parameters": {
            "image": "[ORIGINAL_IMAGE]",
            "mask_image": "[PREVIOUS_STEP_RESULT]",
            "prompt": "a dog"
        }}
    ]})
}

#[async_trait]
impl PlanningService for ScriptedPlanner {
    async fn plan(&self, user_prompt: &str) -> Result<Value> {
        match self {
            ScriptedPlanner::Plan(plan) => Ok(plan.clone()),
            ScriptedPlanner::AskPrompt => Ok(vqa_plan(user_prompt)),
            ScriptedPlanner::ByPrompt(plans) => plans
                .iter()
                .find(|(key, _)| user_prompt.contains(key))
                .or(plans.last())
                .map(|(_, plan)| plan.clone())
                .ok_or_else(|| PrismError::PlanningService("no plans scripted".to_string())),
            ScriptedPlanner::PanicOn(key) => {
                if user_prompt.contains(key) {
                    panic!("planner client crashed");
                }
                Ok(vqa_plan(user_prompt))
            }
            ScriptedPlanner::Unavailable => Err(PrismError::PlanningService(
                "planner returned 503 Service Unavailable".to_string(),
            )),
        }
    }
}

pub struct Harness {
    pub tools: Arc<ScriptedTools>,
    pub store: Arc<dyn JobStore>,
    pub executor: PlanExecutor,
}

pub fn harness() -> Harness {
    harness_with(ScriptedTools::new(), ExecutorConfig::default())
}

pub fn harness_with(tools: Arc<ScriptedTools>, config: ExecutorConfig) -> Harness {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let executor = PlanExecutor::new(dispatcher(tools.clone()), store.clone(), config);
    Harness {
        tools,
        store,
        executor,
    }
}

pub fn dispatcher(tools: Arc<ScriptedTools>) -> Dispatcher {
    Dispatcher::new(
        Arc::new(ToolRegistry::with_defaults()),
        Toolbox::from_backend(tools),
    )
}

pub fn orchestrator(
    tools: Arc<ScriptedTools>,
    store: Arc<dyn JobStore>,
    planner: ScriptedPlanner,
    uploads_dir: &Path,
) -> Arc<Orchestrator> {
    let executor = PlanExecutor::new(dispatcher(tools), store.clone(), ExecutorConfig::default());
    Arc::new(Orchestrator::new(
        store,
        QueueRouter::default(),
        Arc::new(planner),
        executor,
        uploads_dir,
    ))
}

pub fn cat_image() -> Image {
    Image::from_bytes(b"\x89PNG fake cat picture".to_vec())
}

/// Poll the store until `job_id` is terminal
pub async fn wait_for_terminal(store: &dyn JobStore, job_id: &str) -> JobRecord {
    for _ in 0..200 {
        if let Some(record) = store.get(job_id).await.unwrap() {
            if record.is_terminal() {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {} never finished", job_id);
}

/// Poll the store until `job_id` has left PENDING
pub async fn wait_for_running(store: &dyn JobStore, job_id: &str) {
    for _ in 0..200 {
        if let Some(record) = store.get(job_id).await.unwrap() {
            if record.state == JobState::Running {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never started", job_id);
}
