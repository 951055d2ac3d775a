//! Capability-polymorphic tool dispatch
//!
//! Each capability is a trait so that model backends can be swapped (remote
//! inference, in-process, test doubles) without the executor knowing. The
//! [`Dispatcher`] turns a registered tool name plus resolved parameters into
//! one backend call and normalises the outcome into a [`ToolResult`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error};

use super::registry::{Capability, MaskPolicy, ToolRegistry};
use super::result::{BoundingBox, Image, ToolResult};
use crate::error::{PrismError, Result};
use crate::plan::ResolvedParams;

/// Open-vocabulary object localisation
#[async_trait]
pub trait Detector: Send + Sync {
    /// Best-scoring box for `query`, or `None` below the confidence threshold
    async fn detect(&self, image: &Image, query: &str) -> anyhow::Result<Option<BoundingBox>>;
}

/// Box-prompted single-object segmentation
#[async_trait]
pub trait Segmenter: Send + Sync {
    /// Binary mask the size of `image`
    async fn segment(&self, image: &Image, bbox: &BoundingBox) -> anyhow::Result<Image>;
}

#[derive(Debug, Clone, Copy)]
pub struct EditRequest<'a> {
    pub image: &'a Image,
    /// Present only for tools whose mask policy is [`MaskPolicy::Honor`]
    pub mask: Option<&'a Image>,
    pub prompt: &'a str,
}

/// Prompt-conditioned image editing
#[async_trait]
pub trait Editor: Send + Sync {
    async fn edit(&self, request: EditRequest<'_>) -> anyhow::Result<Image>;
}

/// Visual question answering
#[async_trait]
pub trait Answerer: Send + Sync {
    async fn answer(&self, image: &Image, question: &str) -> anyhow::Result<String>;
}

/// One backend per capability, shared by every worker
#[derive(Clone)]
pub struct Toolbox {
    pub detector: Arc<dyn Detector>,
    pub segmenter: Arc<dyn Segmenter>,
    pub editor: Arc<dyn Editor>,
    pub answerer: Arc<dyn Answerer>,
}

impl Toolbox {
    /// All four capabilities served by a single backend
    pub fn from_backend<T>(backend: Arc<T>) -> Self
    where
        T: Detector + Segmenter + Editor + Answerer + 'static,
    {
        Self {
            detector: backend.clone(),
            segmenter: backend.clone(),
            editor: backend.clone(),
            answerer: backend,
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    toolbox: Toolbox,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, toolbox: Toolbox) -> Self {
        Self { registry, toolbox }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Invoke the backend for `tool_name`
    ///
    /// Bad inputs, backend failures and backend panics all surface as
    /// [`PrismError::ToolExecution`]; nothing is retried here.
    pub async fn dispatch(&self, tool_name: &str, params: &ResolvedParams) -> Result<ToolResult> {
        let spec = self
            .registry
            .get(tool_name)
            .ok_or_else(|| PrismError::tool_execution(tool_name, "tool is not registered"))?;

        match AssertUnwindSafe(self.invoke(spec.capability, tool_name, params))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let cause = format!("panicked: {}", panic_message(panic.as_ref()));
                error!(tool = tool_name, "Tool backend {}", cause);
                Err(PrismError::tool_execution(tool_name, cause))
            }
        }
    }

    async fn invoke(
        &self,
        capability: Capability,
        tool_name: &str,
        params: &ResolvedParams,
    ) -> Result<ToolResult> {
        let fail = |cause: String| PrismError::tool_execution(tool_name, cause);
        let backend_fail = |e: anyhow::Error| PrismError::tool_execution(tool_name, format!("{:#}", e));

        match capability {
            Capability::Detect => {
                let image = params.image("image").map_err(fail)?;
                let query = params.text("query").map_err(fail)?;
                let found = self
                    .toolbox
                    .detector
                    .detect(image, &query)
                    .await
                    .map_err(backend_fail)?;
                Ok(found.map_or(ToolResult::None, ToolResult::BoundingBox))
            }
            Capability::Segment => {
                let image = params.image("image").map_err(fail)?;
                let bbox = params.bounding_box("box").map_err(fail)?;
                let mask = self
                    .toolbox
                    .segmenter
                    .segment(image, &bbox)
                    .await
                    .map_err(backend_fail)?;
                Ok(ToolResult::Image(mask))
            }
            Capability::Edit { mask: policy } => {
                let image = params.image("image").map_err(fail)?;
                let prompt = params.text("prompt").map_err(fail)?;
                let mask = match policy {
                    MaskPolicy::Honor => Some(params.image("mask_image").map_err(fail)?),
                    MaskPolicy::Ignore => {
                        if params.contains("mask_image") {
                            debug!(tool = tool_name, "mask supplied to whole-image editor, ignoring");
                        }
                        None
                    }
                };
                let edited = self
                    .toolbox
                    .editor
                    .edit(EditRequest {
                        image,
                        mask,
                        prompt: &prompt,
                    })
                    .await
                    .map_err(backend_fail)?;
                Ok(ToolResult::Image(edited))
            }
            Capability::Answer => {
                let image = params.image("image").map_err(fail)?;
                let question = params.text("question").map_err(fail)?;
                let answer = self
                    .toolbox
                    .answerer
                    .answer(image, &question)
                    .await
                    .map_err(backend_fail)?;
                Ok(ToolResult::Text(answer))
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
