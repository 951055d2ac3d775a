use serde_json::{Map, Value};
use tracing::debug;

use super::step::{ParamValue, Placeholder};
use crate::job::JobInput;
use crate::tools::{BoundingBox, Image, ToolResult};

/// A parameter after placeholder substitution
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Literal(Value),
    Image(Image),
    Text(String),
    BoundingBox(BoundingBox),
    /// `PREVIOUS_STEP_RESULT` with nothing (or "nothing found") before it
    Absent,
}

impl From<&ToolResult> for Resolved {
    fn from(result: &ToolResult) -> Self {
        match result {
            ToolResult::Image(image) => Resolved::Image(image.clone()),
            ToolResult::Text(text) => Resolved::Text(text.clone()),
            ToolResult::BoundingBox(b) => Resolved::BoundingBox(*b),
            ToolResult::None => Resolved::Absent,
        }
    }
}

/// Concrete parameters for one dispatch, in plan order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedParams {
    entries: Vec<(String, Resolved)>,
}

impl ResolvedParams {
    pub fn get(&self, key: &str) -> Option<&Resolved> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Resolved) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn image(&self, key: &str) -> Result<&Image, String> {
        match self.require(key)? {
            Resolved::Image(image) => Ok(image),
            other => Err(format!("parameter '{}' must be an image, got {}", key, describe(other))),
        }
    }

    /// Text from a literal or from an upstream answer
    pub fn text(&self, key: &str) -> Result<String, String> {
        match self.require(key)? {
            Resolved::Text(text) => Ok(text.clone()),
            Resolved::Literal(Value::String(s)) => Ok(s.clone()),
            Resolved::Literal(v @ (Value::Number(_) | Value::Bool(_))) => Ok(v.to_string()),
            other => Err(format!("parameter '{}' must be text, got {}", key, describe(other))),
        }
    }

    /// Box from an upstream detection or a literal `[x1, y1, x2, y2]`
    pub fn bounding_box(&self, key: &str) -> Result<BoundingBox, String> {
        match self.require(key)? {
            Resolved::BoundingBox(b) => Ok(*b),
            Resolved::Literal(v) => {
                BoundingBox::from_value(v).map_err(|e| format!("parameter '{}': {}", key, e))
            }
            other => Err(format!(
                "parameter '{}' must be a bounding box, got {}",
                key,
                describe(other)
            )),
        }
    }

    fn require(&self, key: &str) -> Result<&Resolved, String> {
        match self.get(key) {
            None => Err(format!("parameter '{}' was not supplied", key)),
            Some(Resolved::Absent) => Err(format!("parameter '{}' resolved to no value", key)),
            Some(value) => Ok(value),
        }
    }
}

fn describe(value: &Resolved) -> &'static str {
    match value {
        Resolved::Literal(_) => "a literal",
        Resolved::Image(_) => "an image",
        Resolved::Text(_) => "text",
        Resolved::BoundingBox(_) => "a bounding box",
        Resolved::Absent => "nothing",
    }
}

/// Substitute placeholders in one step's parameters
///
/// Never fails: a `PREVIOUS_STEP_RESULT` with no predecessor becomes
/// [`Resolved::Absent`] and the dispatcher decides whether that is acceptable.
pub fn resolve(
    parameters: &Map<String, Value>,
    input: &JobInput,
    previous: Option<&ToolResult>,
) -> ResolvedParams {
    let mut resolved = ResolvedParams::default();

    for (key, raw) in parameters {
        let value = match ParamValue::classify(raw) {
            ParamValue::Placeholder(Placeholder::OriginalImage) => {
                Resolved::Image(input.original_image.clone())
            }
            ParamValue::Placeholder(Placeholder::PreviousStepResult) => match previous {
                Some(result) => Resolved::from(result),
                None => {
                    debug!(param = %key, "previous step result referenced with no prior step");
                    Resolved::Absent
                }
            },
            ParamValue::Literal(v) => Resolved::Literal(v.clone()),
        };
        resolved.insert(key.clone(), value);
    }

    resolved
}
