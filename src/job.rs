//! Job lifecycle record and state machine
//!
//! `PENDING -> RUNNING -> {SUCCESS, FAILURE}`. A record has one writer (the
//! worker running the job) and many readers; all mutation goes through
//! [`JobRecord::apply`] so the transition rules live in one place.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{JobError, StoreError};
use crate::router::Lane;
use crate::tools::{Image, ResultPayload};

/// What a worker receives for one job
///
/// Owned by the executing worker for the job's lifetime. `scratch_files` are
/// job-scoped temporaries (the uploaded image) removed once execution ends.
#[derive(Debug)]
pub struct JobInput {
    pub original_image: Image,
    pub user_prompt: String,
    pub scratch_files: Vec<PathBuf>,
}

impl JobInput {
    pub fn new(original_image: Image, user_prompt: impl Into<String>) -> Self {
        Self {
            original_image,
            user_prompt: user_prompt.into(),
            scratch_files: vec![],
        }
    }

    pub fn with_scratch_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.scratch_files.push(path.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Success,
    Failure,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Failure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Success => "SUCCESS",
            JobState::Failure => "FAILURE",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wall-clock duration of one dispatched step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTiming {
    /// 1-based step number
    pub index: usize,
    pub tool_name: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub lane: Lane,
    pub state: JobState,
    pub prompt: String,
    pub current_message: Option<String>,
    pub current_step: usize,
    pub total_steps: usize,
    pub result: Option<ResultPayload>,
    pub error: Option<JobError>,
    #[serde(default)]
    pub timings: Vec<StepTiming>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A single mutation of a [`JobRecord`]
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Worker picked the job up
    Start { message: String },
    /// About to dispatch step `index` of `total`
    StepStarted {
        index: usize,
        total: usize,
        message: String,
    },
    StepFinished(StepTiming),
    Succeed(ResultPayload),
    Fail(JobError),
}

impl Transition {
    fn name(&self) -> &'static str {
        match self {
            Transition::Start { .. } => "start",
            Transition::StepStarted { .. } => "start a step",
            Transition::StepFinished(_) => "finish a step",
            Transition::Succeed(_) => "succeed",
            Transition::Fail(_) => "fail",
        }
    }
}

pub fn new_job_id() -> String {
    Uuid::new_v4().to_string()
}

impl JobRecord {
    pub fn new(job_id: impl Into<String>, lane: Lane, prompt: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            lane,
            state: JobState::Pending,
            prompt: prompt.into(),
            current_message: None,
            current_step: 0,
            total_steps: 0,
            result: None,
            error: None,
            timings: vec![],
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply a transition, returning whether anything observable changed
    ///
    /// Terminal records reject every transition. Re-sending the current
    /// progress message is accepted but reports no change.
    pub fn apply(&mut self, transition: Transition) -> Result<bool, StoreError> {
        if self.state.is_terminal() {
            return Err(self.invalid(&transition));
        }

        match transition {
            Transition::Start { message } => {
                self.begin();
                Ok(self.set_message(message))
            }
            Transition::StepStarted {
                index,
                total,
                message,
            } => {
                self.begin();
                self.current_step = index;
                self.total_steps = total;
                Ok(self.set_message(message))
            }
            Transition::StepFinished(timing) => {
                if self.state != JobState::Running {
                    return Err(self.invalid(&Transition::StepFinished(timing)));
                }
                self.timings.push(timing);
                Ok(true)
            }
            Transition::Succeed(payload) => {
                // a job cannot succeed without having run
                if self.state != JobState::Running {
                    return Err(self.invalid(&Transition::Succeed(payload)));
                }
                self.state = JobState::Success;
                self.result = Some(payload);
                self.finished_at = Some(Utc::now());
                Ok(true)
            }
            Transition::Fail(error) => {
                self.state = JobState::Failure;
                self.error = Some(error);
                self.finished_at = Some(Utc::now());
                Ok(true)
            }
        }
    }

    /// Total milliseconds spent in dispatched steps
    pub fn total_step_ms(&self) -> u64 {
        self.timings.iter().map(|t| t.elapsed_ms).sum()
    }

    fn begin(&mut self) {
        if self.state == JobState::Pending {
            self.state = JobState::Running;
            self.started_at = Some(Utc::now());
        }
    }

    fn set_message(&mut self, message: String) -> bool {
        if self.current_message.as_deref() == Some(message.as_str()) {
            return false;
        }
        self.current_message = Some(message);
        true
    }

    fn invalid(&self, transition: &Transition) -> StoreError {
        StoreError::InvalidTransition {
            job_id: self.job_id.clone(),
            state: self.state.to_string(),
            transition: transition.name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JobRecord {
        JobRecord::new("job-1", Lane::Heavy, "change the cat to a dog")
    }

    fn failure() -> JobError {
        JobError {
            kind: "ToolExecutionError".into(),
            message: "boom".into(),
        }
    }

    #[test]
    fn test_happy_path() {
        let mut job = record();
        assert_eq!(job.state, JobState::Pending);
        assert!(job.result.is_none() && job.error.is_none());

        job.apply(Transition::Start { message: "planning".into() }).unwrap();
        assert_eq!(job.state, JobState::Running);
        assert!(job.started_at.is_some());

        job.apply(Transition::StepStarted {
            index: 1,
            total: 1,
            message: "(1/1) answering question (run_vqa)".into(),
        })
        .unwrap();
        job.apply(Transition::StepFinished(StepTiming {
            index: 1,
            tool_name: "run_vqa".into(),
            elapsed_ms: 40,
        }))
        .unwrap();
        job.apply(Transition::Succeed(ResultPayload::Text("blue".into()))).unwrap();

        assert_eq!(job.state, JobState::Success);
        assert_eq!(job.current_step, 1);
        assert_eq!(job.total_step_ms(), 40);
        assert!(job.error.is_none());
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_terminal_is_final() {
        let mut job = record();
        job.apply(Transition::Fail(failure())).unwrap();
        assert_eq!(job.state, JobState::Failure);

        let err = job
            .apply(Transition::Succeed(ResultPayload::Text("late".into())))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert!(job.apply(Transition::Fail(failure())).is_err());
        assert!(job.result.is_none());
    }

    #[test]
    fn test_pending_cannot_succeed() {
        let mut job = record();
        assert!(job
            .apply(Transition::Succeed(ResultPayload::Text("x".into())))
            .is_err());
        assert_eq!(job.state, JobState::Pending);
    }

    #[test]
    fn test_repeated_message_is_not_a_change() {
        let mut job = record();
        assert!(job.apply(Transition::Start { message: "planning".into() }).unwrap());
        assert!(!job.apply(Transition::Start { message: "planning".into() }).unwrap());
    }

    #[test]
    fn test_state_wire_format() {
        assert_eq!(serde_json::to_string(&JobState::Running).unwrap(), "\"RUNNING\"");
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["state"], "PENDING");
        assert_eq!(json["lane"], "heavy");
    }
}
