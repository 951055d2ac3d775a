use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Data-flow placeholder standing in for a value known only at run time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placeholder {
    /// The image supplied when the job was created
    OriginalImage,
    /// Whatever the immediately preceding step returned
    PreviousStepResult,
}

impl Placeholder {
    /// Canonical tag, as written by the planner
    pub fn tag(&self) -> &'static str {
        match self {
            Placeholder::OriginalImage => "[ORIGINAL_IMAGE]",
            Placeholder::PreviousStepResult => "[PREVIOUS_STEP_RESULT]",
        }
    }

    /// Whole-value match; `"[ORIGINAL_IMAGE] please"` is a literal string
    pub fn parse(value: &Value) -> Option<Self> {
        match value.as_str()? {
            "[ORIGINAL_IMAGE]" | "ORIGINAL_IMAGE" => Some(Placeholder::OriginalImage),
            "[PREVIOUS_STEP_RESULT]" | "PREVIOUS_STEP_RESULT" => {
                Some(Placeholder::PreviousStepResult)
            }
            _ => None,
        }
    }
}

/// A parameter value as written in the plan
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue<'a> {
    Literal(&'a Value),
    Placeholder(Placeholder),
}

impl<'a> ParamValue<'a> {
    pub fn classify(value: &'a Value) -> Self {
        match Placeholder::parse(value) {
            Some(placeholder) => ParamValue::Placeholder(placeholder),
            None => ParamValue::Literal(value),
        }
    }
}

/// One planned tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl Step {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters: Map::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn placeholder(self, key: impl Into<String>, placeholder: Placeholder) -> Self {
        self.param(key, placeholder.tag())
    }

    /// Parameters in insertion order, classified
    pub fn params(&self) -> impl Iterator<Item = (&str, ParamValue<'_>)> {
        self.parameters
            .iter()
            .map(|(k, v)| (k.as_str(), ParamValue::classify(v)))
    }

    /// Whether any parameter consumes the previous step's output
    pub fn references_previous(&self) -> bool {
        self.params()
            .any(|(_, v)| v == ParamValue::Placeholder(Placeholder::PreviousStepResult))
    }
}

/// An ordered, validated sequence of steps
///
/// Only [`validate`](super::validate) constructs one, so holding a `Plan`
/// means every tool is registered and every required parameter is present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    #[serde(rename = "plan")]
    steps: Vec<Step>,
}

impl Plan {
    pub(crate) fn from_validated(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.tool_name.as_str()).collect()
    }
}

/// Builder for raw plan JSON, mostly for tests and the CLI
pub struct PlanBuilder {
    steps: Vec<Step>,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self { steps: vec![] }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// `{"plan": [...]}` as the planner would produce it
    pub fn to_json(&self) -> Value {
        serde_json::json!({ "plan": self.steps })
    }
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::new()
    }
}
