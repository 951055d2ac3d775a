//! Planning service client
//!
//! Turns a user prompt into raw plan JSON. The output is untrusted: it goes
//! through [`crate::plan::validate`] before anything runs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::PlannerConfig;
use crate::error::{PrismError, Result};
use crate::plan::Placeholder;
use crate::tools::ToolRegistry;

#[async_trait]
pub trait PlanningService: Send + Sync {
    /// Raw `{"plan": [...]}` JSON for `user_prompt`
    async fn plan(&self, user_prompt: &str) -> Result<Value>;
}

/// Build the system prompt describing every registered tool
pub fn system_instructions(registry: &ToolRegistry) -> String {
    let original = Placeholder::OriginalImage.tag();
    let previous = Placeholder::PreviousStepResult.tag();

    let mut out = String::new();
    out.push_str(
        "You are a meticulous visual planning agent. Break the user's request into an \
         ordered sequence of tool calls, choosing the most specialised tool for each step.\n\
         Respond with a single JSON object of the form \
         {\"plan\": [{\"tool_name\": string, \"parameters\": object}, ...]} and nothing else.\n\n",
    );
    out.push_str(&format!(
        "Use \"{}\" for the image the user uploaded and \"{}\" for the output of the step \
         immediately before. Steps run strictly in order.\n\n## Tools\n\n",
        original, previous
    ));

    for spec in registry.specs() {
        out.push_str(&format!("### {}\n{}\n", spec.name, spec.description));
        out.push_str(&format!("- required: {}\n", list_or_none(&spec.required)));
        out.push_str(&format!("- optional: {}\n\n", list_or_none(&spec.optional)));
    }

    out.push_str(&format!(
        "## Example\nRequest: \"change the cat to a dog\"\n\
         {{\"plan\": [\
         {{\"tool_name\": \"run_object_detection\", \"parameters\": {{\"query\": \"a cat\"}}}}, \
         {{\"tool_name\": \"run_sam\", \"parameters\": {{\"box\": \"{prev}\"}}}}, \
         {{\"tool_name\": \"run_inpainting\", \"parameters\": {{\"image\": \"{orig}\", \
         \"mask_image\": \"{prev}\", \"prompt\": \"a photo of a dog\"}}}}]}}\n\n\
         Answer questions about attributes (colour, count, identity) with run_vqa; never use \
         it to locate objects.\n",
        prev = previous,
        orig = original
    ));
    out
}

fn list_or_none(params: &[String]) -> String {
    if params.is_empty() {
        "none".to_string()
    } else {
        params.join(", ")
    }
}

/// Outermost `{...}` in model output that may carry prose or code fences
pub fn extract_json_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (start < end).then(|| &content[start..=end])
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat-completions planner in JSON mode
pub struct HttpPlanner {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    instructions: String,
}

impl HttpPlanner {
    pub fn new(config: &PlannerConfig, registry: &ToolRegistry) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            instructions: system_instructions(registry),
        })
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }
}

#[async_trait]
impl PlanningService for HttpPlanner {
    async fn plan(&self, user_prompt: &str) -> Result<Value> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.instructions,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        info!(model = %self.model, "Requesting plan");
        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| PrismError::PlanningService(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PrismError::PlanningService(format!(
                "planner returned {}: {}",
                status, body
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| PrismError::PlanningService(format!("undecodable response: {}", e)))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| PrismError::PlanningService("response has no content".into()))?;
        debug!("Planner content: {}", content);

        parse_plan_content(&content)
    }
}

/// Decode model content into plan JSON
pub fn parse_plan_content(content: &str) -> Result<Value> {
    let json = extract_json_object(content).ok_or_else(|| {
        PrismError::PlanningService("response does not contain a JSON object".into())
    })?;
    serde_json::from_str(json)
        .map_err(|e| PrismError::PlanningService(format!("response is not valid JSON: {}", e)))
}

/// Planner that always returns the same plan
///
/// Used when a plan is supplied up front instead of requested.
pub struct FixedPlanner {
    plan: Value,
}

impl FixedPlanner {
    pub fn new(plan: Value) -> Self {
        Self { plan }
    }
}

#[async_trait]
impl PlanningService for FixedPlanner {
    async fn plan(&self, _user_prompt: &str) -> Result<Value> {
        Ok(self.plan.clone())
    }
}
