pub mod api;
pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod orchestrator;
pub mod plan;
pub mod planner;
pub mod progress;
pub mod router;
pub mod store;
pub mod tools;
pub mod worker;

pub use config::AppConfig;
pub use error::{JobError, PrismError, Result, StoreError};
pub use executor::PlanExecutor;
pub use job::{JobInput, JobRecord, JobState, StepTiming, Transition};
pub use orchestrator::{JobTicket, Orchestrator, QueuedJob};
pub use plan::{Placeholder, Plan, PlanBuilder, Step};
pub use planner::{HttpPlanner, PlanningService};
pub use progress::{Frame, FrameDeduper, JobObserver};
pub use router::{Lane, QueueRouter};
pub use store::{FileJobStore, InMemoryJobStore, JobStore};
pub use tools::{
    BoundingBox, Dispatcher, Image, ResultPayload, ToolRegistry, ToolResult, Toolbox,
};
pub use worker::WorkerPool;
