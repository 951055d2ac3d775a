//! Error types for plan execution
//!
//! Every failure that can end a job maps onto one variant of [`PrismError`].
//! The variant's [`PrismError::kind`] tag is what observers see in a FAILURE
//! frame, so the tags are part of the wire contract and must stay stable.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for planning and execution
#[derive(Error, Debug)]
pub enum PrismError {
    /// Planner output did not have the `{"plan": [...]}` shape
    #[error("malformed plan: {0}")]
    MalformedPlan(String),

    /// A step names a tool that is not in the registry
    #[error("step {step}: unknown tool '{tool_name}'")]
    UnknownTool { step: usize, tool_name: String },

    /// A step omits a parameter its tool requires
    #[error("step {step}: tool '{tool_name}' is missing required parameter '{parameter}'")]
    MissingParameter {
        step: usize,
        tool_name: String,
        parameter: String,
    },

    /// A step came back empty while the next step consumes its result
    #[error("step {step}: tool '{tool_name}' produced no result for the next step")]
    ToolProducedNoResult { step: usize, tool_name: String },

    /// The underlying tool call failed
    #[error("tool '{tool_name}' failed: {cause}")]
    ToolExecution { tool_name: String, cause: String },

    /// The planning service failed or returned unusable content
    #[error("planning service error: {0}")]
    PlanningService(String),

    /// The job was accepted but no worker queue would take it
    #[error("job could not be queued: {0}")]
    QueueUnavailable(String),

    /// The job's task died outside any tool call
    #[error("job crashed: {0}")]
    JobCrashed(String),

    /// Releasing a job-scoped resource failed (logged, never fatal)
    #[error("resource cleanup failed: {0}")]
    ResourceCleanup(String),

    /// Job store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PrismError {
    /// Stable tag reported to observers
    pub fn kind(&self) -> &'static str {
        match self {
            PrismError::MalformedPlan(_) => "MalformedPlanError",
            PrismError::UnknownTool { .. } => "UnknownToolError",
            PrismError::MissingParameter { .. } => "MissingParameterError",
            PrismError::ToolProducedNoResult { .. } => "ToolProducedNoResultError",
            PrismError::ToolExecution { .. } => "ToolExecutionError",
            PrismError::PlanningService(_) => "PlanningServiceError",
            PrismError::QueueUnavailable(_) => "QueueUnavailableError",
            PrismError::JobCrashed(_) => "JobCrashedError",
            PrismError::ResourceCleanup(_) => "ResourceCleanupError",
            PrismError::Store(_) => "StoreError",
        }
    }

    /// Plan validation failures; the job never starts executing
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PrismError::MalformedPlan(_)
                | PrismError::UnknownTool { .. }
                | PrismError::MissingParameter { .. }
        )
    }

    pub fn tool_execution(tool_name: impl Into<String>, cause: impl ToString) -> Self {
        PrismError::ToolExecution {
            tool_name: tool_name.into(),
            cause: cause.to_string(),
        }
    }

    /// Serialisable form written into a FAILURE record
    pub fn to_job_error(&self) -> JobError {
        JobError {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

/// Errors raised by a [`JobStore`](crate::store::JobStore)
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job already exists: {0}")]
    AlreadyExists(String),

    /// The requested transition is not allowed from the record's state
    #[error("job {job_id}: cannot {transition} while {state}")]
    InvalidTransition {
        job_id: String,
        state: String,
        transition: String,
    },

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Structured error stored on a failed job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: String,
    pub message: String,
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result type alias for planning and execution
pub type Result<T> = std::result::Result<T, PrismError>;
