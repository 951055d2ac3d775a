use serde_json::{Map, Value};

use super::step::{Plan, Step};
use crate::error::{PrismError, Result};
use crate::tools::ToolRegistry;

/// Parse planner text and validate it
pub fn validate_str(raw: &str, registry: &ToolRegistry) -> Result<Plan> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| PrismError::MalformedPlan(format!("not valid JSON: {}", e)))?;
    validate(&value, registry)
}

/// Check untrusted planner output against the registry
///
/// Pure: either every step names a registered tool with all of its required
/// parameters, or nothing is returned. Registry defaults for omitted optional
/// parameters are filled into the returned plan.
pub fn validate(plan_json: &Value, registry: &ToolRegistry) -> Result<Plan> {
    let root = plan_json
        .as_object()
        .ok_or_else(|| PrismError::MalformedPlan("top level is not a JSON object".into()))?;

    let raw_steps = root
        .get("plan")
        .ok_or_else(|| PrismError::MalformedPlan("missing 'plan' field".into()))?
        .as_array()
        .ok_or_else(|| PrismError::MalformedPlan("'plan' is not an array".into()))?;

    if raw_steps.is_empty() {
        return Err(PrismError::MalformedPlan("'plan' has no steps".into()));
    }

    let mut steps = Vec::with_capacity(raw_steps.len());
    for (i, raw) in raw_steps.iter().enumerate() {
        let number = i + 1;
        let mut step = parse_step(number, raw)?;

        let spec = registry.get(&step.tool_name).ok_or_else(|| PrismError::UnknownTool {
            step: number,
            tool_name: step.tool_name.clone(),
        })?;

        for required in &spec.required {
            if !step.parameters.contains_key(required) {
                return Err(PrismError::MissingParameter {
                    step: number,
                    tool_name: step.tool_name.clone(),
                    parameter: required.clone(),
                });
            }
        }

        for (name, value) in &spec.defaults {
            if !step.parameters.contains_key(name) {
                step.parameters.insert(name.clone(), value.clone());
            }
        }

        steps.push(step);
    }

    Ok(Plan::from_validated(steps))
}

fn parse_step(number: usize, raw: &Value) -> Result<Step> {
    let obj = raw
        .as_object()
        .ok_or_else(|| PrismError::MalformedPlan(format!("step {} is not an object", number)))?;

    let tool_name = obj
        .get("tool_name")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            PrismError::MalformedPlan(format!("step {} has no string 'tool_name'", number))
        })?;

    let parameters = match obj.get("parameters") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            return Err(PrismError::MalformedPlan(format!(
                "step {} 'parameters' is not an object",
                number
            )))
        }
    };

    Ok(Step {
        tool_name: tool_name.to_string(),
        parameters,
    })
}
