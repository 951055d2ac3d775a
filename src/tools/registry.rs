//! Static tool registry
//!
//! Maps a tool name to its capability and parameter contract. The executor
//! only ever consults the registry, so new tools are added here (or via
//! [`ToolRegistry::register`]) without touching execution code.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::plan::Placeholder;

/// What to do with `mask_image` for an edit tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskPolicy {
    /// Masked inpainting: the mask is required and forwarded
    Honor,
    /// Whole-image conditioned editing: any mask is dropped
    Ignore,
}

/// Capability variant a tool dispatches to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "capability", rename_all = "snake_case")]
pub enum Capability {
    Detect,
    Segment,
    Edit { mask: MaskPolicy },
    Answer,
}

impl Capability {
    /// Human-readable verb for progress messages
    pub fn verb(&self) -> &'static str {
        match self {
            Capability::Detect => "locating object",
            Capability::Segment => "generating mask",
            Capability::Edit { .. } => "editing image",
            Capability::Answer => "answering question",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub capability: Capability,
    pub required: Vec<String>,
    pub optional: Vec<String>,
    /// Values filled in by validation when the planner omits the parameter
    #[serde(skip)]
    pub defaults: Vec<(String, Value)>,
    pub description: String,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, capability: Capability) -> Self {
        Self {
            name: name.into(),
            capability,
            required: vec![],
            optional: vec![],
            defaults: vec![],
            description: String::new(),
        }
    }

    pub fn required(mut self, params: &[&str]) -> Self {
        self.required.extend(params.iter().map(|p| p.to_string()));
        self
    }

    pub fn optional(mut self, params: &[&str]) -> Self {
        self.optional.extend(params.iter().map(|p| p.to_string()));
        self
    }

    /// Optional parameter that falls back to a value when omitted
    pub fn default_param(mut self, name: &str, value: impl Into<Value>) -> Self {
        if !self.optional.iter().any(|p| p == name) {
            self.optional.push(name.to_string());
        }
        self.defaults.push((name.to_string(), value.into()));
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Registered tools, in registration order
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Registry with no tools
    pub fn empty() -> Self {
        Self {
            specs: vec![],
            index: HashMap::new(),
        }
    }

    /// The built-in perception/generation tools
    pub fn with_defaults() -> Self {
        let original = Placeholder::OriginalImage.tag();
        let mut registry = Self::empty();

        registry.register(
            ToolSpec::new("run_object_detection", Capability::Detect)
                .required(&["query"])
                .default_param("image", original)
                .describe("Find where an object described in text is; returns a bounding box"),
        );
        registry.register(
            ToolSpec::new("run_sam", Capability::Segment)
                .required(&["box"])
                .default_param("image", original)
                .describe("Produce a pixel mask of the object inside a bounding box"),
        );
        registry.register(
            ToolSpec::new("run_inpainting", Capability::Edit { mask: MaskPolicy::Honor })
                .required(&["image", "mask_image", "prompt"])
                .describe("Replace the masked area so it matches the prompt"),
        );
        registry.register(
            ToolSpec::new("run_img2img", Capability::Edit { mask: MaskPolicy::Ignore })
                .required(&["image", "prompt"])
                .optional(&["mask_image"])
                .describe("Re-render the whole image conditioned on the prompt; ignores masks"),
        );
        registry.register(
            ToolSpec::new("run_vqa", Capability::Answer)
                .required(&["question"])
                .default_param("image", original)
                .describe("Answer a question about image attributes (not locations)"),
        );

        registry
    }

    /// Add or replace a tool
    pub fn register(&mut self, spec: ToolSpec) {
        match self.index.get(&spec.name) {
            Some(&i) => self.specs[i] = spec,
            None => {
                self.index.insert(spec.name.clone(), self.specs.len());
                self.specs.push(spec);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.index.get(name).map(|&i| &self.specs[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn names(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.name.as_str()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
