//! Job submission and job runs
//!
//! Submission is synchronous from the caller's point of view: the job is
//! routed, recorded as PENDING and its upload persisted before a ticket is
//! handed back. The run itself (plan, then execute) happens on a worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn, Instrument};

use crate::error::PrismError;
use crate::executor::{release, remove_scratch_files, PlanExecutor};
use crate::job::{new_job_id, JobInput, JobRecord, Transition};
use crate::planner::PlanningService;
use crate::router::{Lane, QueueRouter};
use crate::store::JobStore;
use crate::tools::{Image, ToolResult};

/// Progress message shown while the planner runs
pub const PLANNING_MESSAGE: &str = "planning";

/// Returned to the caller as soon as a job is accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTicket {
    pub job_id: String,
    pub lane: Lane,
}

/// A job waiting for a worker
#[derive(Debug)]
pub struct QueuedJob {
    pub ticket: JobTicket,
    pub input: JobInput,
}

pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    router: QueueRouter,
    planner: Arc<dyn PlanningService>,
    executor: PlanExecutor,
    uploads_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        router: QueueRouter,
        planner: Arc<dyn PlanningService>,
        executor: PlanExecutor,
        uploads_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            router,
            planner,
            executor,
            uploads_dir: uploads_dir.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn router(&self) -> &QueueRouter {
        &self.router
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    /// Accept a job: route it, persist the upload, record it as PENDING
    pub async fn submit(&self, prompt: &str, image: Vec<u8>) -> Result<QueuedJob> {
        let job_id = new_job_id();
        let lane = self.router.route(prompt);

        tokio::fs::create_dir_all(&self.uploads_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.uploads_dir.display()))?;
        let upload = self.uploads_dir.join(&job_id);
        tokio::fs::write(&upload, &image)
            .await
            .with_context(|| format!("Failed to store upload for job {}", job_id))?;

        let input = JobInput::new(Image::from_bytes(image), prompt).with_scratch_file(upload);

        if let Err(e) = self.store.create(JobRecord::new(&job_id, lane, prompt)).await {
            release(input).await;
            return Err(e).context("Failed to record job");
        }

        info!(job_id = %job_id, lane = %lane, "Job accepted");
        Ok(QueuedJob {
            ticket: JobTicket { job_id, lane },
            input,
        })
    }

    /// Plan and execute one job; the record always ends terminal
    pub async fn run(&self, job: QueuedJob) -> crate::error::Result<ToolResult> {
        let QueuedJob { ticket, input } = job;
        let span = info_span!("job", job_id = %ticket.job_id, lane = %ticket.lane);

        async move {
            let job_id = ticket.job_id.as_str();
            info!("Job started");

            if let Err(e) = self
                .store
                .apply(
                    job_id,
                    Transition::Start {
                        message: PLANNING_MESSAGE.to_string(),
                    },
                )
                .await
            {
                warn!("Job could not be started: {}", e);
                release(input).await;
                return Err(e.into());
            }

            match self.planner.plan(&input.user_prompt).await {
                Ok(plan) => self.executor.execute(job_id, &plan, input).await,
                Err(err) => Err(self.executor.abort(job_id, err, input).await),
            }
        }
        .instrument(span)
        .await
    }

    /// Fail a job whose run task died, then remove its scratch files
    ///
    /// A record that already reached a terminal state is left as it is.
    pub async fn recover(&self, job_id: &str, scratch_files: &[PathBuf], cause: impl Into<String>) {
        let err = PrismError::JobCrashed(cause.into());
        match self.store.apply(job_id, Transition::Fail(err.to_job_error())).await {
            Ok(_) => error!(job_id = %job_id, kind = err.kind(), "Job failed: {}", err),
            Err(e) => warn!(job_id = %job_id, "Crashed job not marked failed: {}", e),
        }
        remove_scratch_files(scratch_files).await;
    }

    /// Fail a job that never reached a worker
    pub async fn reject(&self, job: QueuedJob, reason: impl Into<String>) -> PrismError {
        let err = PrismError::QueueUnavailable(reason.into());
        self.executor.abort(&job.ticket.job_id, err, job.input).await
    }
}
