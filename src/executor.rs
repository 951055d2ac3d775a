//! Plan execution
//!
//! Runs a validated plan step by step against one job's input, writing
//! progress into the job store. Fail-fast: the first error ends the job and
//! no later step runs. Whatever happens, the job's scratch files are removed
//! before [`PlanExecutor::execute`] returns.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::ExecutorConfig;
use crate::error::{PrismError, Result};
use crate::job::{JobInput, StepTiming, Transition};
use crate::plan::{resolve, validate, ResolvedParams, Step};
use crate::store::JobStore;
use crate::tools::{Dispatcher, ToolResult};

pub struct PlanExecutor {
    dispatcher: Dispatcher,
    store: Arc<dyn JobStore>,
    config: ExecutorConfig,
}

/// Progress text for a step, e.g. `(2/3) generating mask (run_sam)`
pub fn step_message(index: usize, total: usize, verb: &str, tool_name: &str) -> String {
    format!("({}/{}) {} ({})", index, total, verb, tool_name)
}

impl PlanExecutor {
    pub fn new(dispatcher: Dispatcher, store: Arc<dyn JobStore>, config: ExecutorConfig) -> Self {
        Self {
            dispatcher,
            store,
            config,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Validate and run `plan_json` for `job_id`
    ///
    /// The record ends in exactly one terminal state. The returned value is
    /// the same outcome that was written to the store.
    pub async fn execute(&self, job_id: &str, plan_json: &Value, input: JobInput) -> Result<ToolResult> {
        let outcome = self.run_plan(job_id, plan_json, &input).await;
        self.finish(job_id, &outcome).await;
        release(input).await;
        outcome
    }

    /// End a job that failed before execution started
    pub async fn abort(&self, job_id: &str, err: PrismError, input: JobInput) -> PrismError {
        self.record_failure(job_id, &err).await;
        release(input).await;
        err
    }

    async fn run_plan(&self, job_id: &str, plan_json: &Value, input: &JobInput) -> Result<ToolResult> {
        let plan = validate(plan_json, self.dispatcher.registry())?;
        let total = plan.len();
        info!(steps = total, tools = ?plan.tool_names(), "Plan validated");

        let started = Instant::now();
        let mut previous: Option<(usize, &Step, ToolResult)> = None;

        for (i, step) in plan.steps().iter().enumerate() {
            let index = i + 1;

            if let Some((prev_index, prev_step, ToolResult::None)) = &previous {
                if step.references_previous() {
                    return Err(PrismError::ToolProducedNoResult {
                        step: *prev_index,
                        tool_name: prev_step.tool_name.clone(),
                    });
                }
            }

            let params = resolve(
                &step.parameters,
                input,
                previous.as_ref().map(|(_, _, result)| result),
            );

            let verb = self
                .dispatcher
                .registry()
                .get(&step.tool_name)
                .map(|spec| spec.capability.verb())
                .unwrap_or("running");
            // announced before dispatch, so the record names the step in flight
            self.store
                .apply(
                    job_id,
                    Transition::StepStarted {
                        index,
                        total,
                        message: step_message(index, total, verb, &step.tool_name),
                    },
                )
                .await?;

            let step_started = Instant::now();
            let result = self.dispatch_step(step, &params).await?;
            let elapsed_ms = step_started.elapsed().as_millis() as u64;
            info!(
                step = index,
                tool = %step.tool_name,
                elapsed_ms,
                result = result.variant_name(),
                "Step finished"
            );

            self.store
                .apply(
                    job_id,
                    Transition::StepFinished(StepTiming {
                        index,
                        tool_name: step.tool_name.clone(),
                        elapsed_ms,
                    }),
                )
                .await?;

            previous = Some((index, step, result));
        }

        info!(
            total_ms = started.elapsed().as_millis() as u64,
            "Plan finished"
        );
        previous
            .map(|(_, _, result)| result)
            .ok_or_else(|| PrismError::MalformedPlan("'plan' has no steps".into()))
    }

    async fn dispatch_step(&self, step: &Step, params: &ResolvedParams) -> Result<ToolResult> {
        debug!(tool = %step.tool_name, params = ?params.keys().collect::<Vec<_>>(), "Dispatching");
        let call = self.dispatcher.dispatch(&step.tool_name, params);
        match self.config.step_timeout() {
            Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
                Err(PrismError::tool_execution(
                    &step.tool_name,
                    format!("timed out after {}s", limit.as_secs()),
                ))
            }),
            None => call.await,
        }
    }

    async fn finish(&self, job_id: &str, outcome: &Result<ToolResult>) {
        match outcome {
            Ok(result) => {
                info!(result = result.variant_name(), "Job succeeded");
                self.record(job_id, Transition::Succeed(result.to_payload())).await;
            }
            Err(err) => self.record_failure(job_id, err).await,
        }
    }

    async fn record_failure(&self, job_id: &str, err: &PrismError) {
        error!(kind = err.kind(), "Job failed: {}", err);
        self.record(job_id, Transition::Fail(err.to_job_error())).await;
    }

    async fn record(&self, job_id: &str, transition: Transition) {
        if let Err(e) = self.store.apply(job_id, transition).await {
            error!("Could not record terminal state for job {}: {}", job_id, e);
        }
    }
}

/// Remove the job's scratch files; failures are logged, never raised
pub async fn release(input: JobInput) {
    remove_scratch_files(&input.scratch_files).await;
}

pub async fn remove_scratch_files(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                let err = PrismError::ResourceCleanup(format!("{}: {}", path.display(), e));
                warn!(kind = err.kind(), "{}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_message() {
        assert_eq!(
            step_message(2, 3, "generating mask", "run_sam"),
            "(2/3) generating mask (run_sam)"
        );
    }

    #[tokio::test]
    async fn test_release_removes_files_and_tolerates_missing() {
        let dir = tempfile::TempDir::new().unwrap();
        let upload = dir.path().join("upload");
        std::fs::write(&upload, b"png").unwrap();

        let input = crate::job::JobInput::new(crate::tools::Image::from_bytes(vec![1]), "p")
            .with_scratch_file(&upload)
            .with_scratch_file(dir.path().join("never-written"));
        release(input).await;

        assert!(!upload.exists());
    }
}
