//! Progress notification
//!
//! Observers never talk to workers. They poll the job store on a fixed
//! interval and turn each snapshot into at most one [`Frame`]; a snapshot that
//! would repeat the previous frame is swallowed. Dropping the receiving end
//! stops the poller but leaves the job running.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::job::{JobRecord, JobState};
use crate::store::JobStore;
use crate::tools::{ResultPayload, NO_RESULT_TEXT};

/// Kind reported when an observer asks for a job the store does not have
pub const JOB_NOT_FOUND: &str = "JobNotFoundError";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Progress { message: String },
    Success(ResultPayload),
    Failed { kind: String, error: String },
}

impl Frame {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Frame::Progress { .. })
    }

    /// Wire form sent over the observation channel
    pub fn to_json(&self) -> Value {
        match self {
            Frame::Progress { message } => json!({"status": "PROGRESS", "message": message}),
            Frame::Success(payload) => json!({
                "status": "SUCCESS",
                "type": payload.kind(),
                "data": payload.data(),
            }),
            Frame::Failed { kind, error } => json!({
                "status": "FAILED",
                "error": error,
                "kind": kind,
            }),
        }
    }

    /// Frame for a snapshot, if it has anything to show
    pub fn from_record(record: &JobRecord) -> Option<Frame> {
        match record.state {
            JobState::Success => Some(Frame::Success(
                record
                    .result
                    .clone()
                    .unwrap_or_else(|| ResultPayload::Text(NO_RESULT_TEXT.to_string())),
            )),
            JobState::Failure => Some(match &record.error {
                Some(err) => Frame::Failed {
                    kind: err.kind.clone(),
                    error: err.to_string(),
                },
                None => Frame::Failed {
                    kind: "UnknownError".to_string(),
                    error: "job failed without an error record".to_string(),
                },
            }),
            JobState::Pending | JobState::Running => record
                .current_message
                .as_ref()
                .map(|message| Frame::Progress {
                    message: message.clone(),
                }),
        }
    }

    fn not_found(job_id: &str) -> Frame {
        Frame::Failed {
            kind: JOB_NOT_FOUND.to_string(),
            error: format!("{}: no job with id {}", JOB_NOT_FOUND, job_id),
        }
    }
}

/// Suppresses a frame equal to the one emitted just before it
#[derive(Debug, Default)]
pub struct FrameDeduper {
    last: Option<Frame>,
}

impl FrameDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, record: &JobRecord) -> Option<Frame> {
        let frame = Frame::from_record(record)?;
        if self.last.as_ref() == Some(&frame) {
            return None;
        }
        self.last = Some(frame.clone());
        Some(frame)
    }
}

#[derive(Clone)]
pub struct JobObserver {
    store: Arc<dyn JobStore>,
    poll_interval: Duration,
}

impl JobObserver {
    pub fn new(store: Arc<dyn JobStore>, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
        }
    }

    /// Stream frames for `job_id` until its terminal frame
    ///
    /// The channel closes after the terminal frame. An unknown job yields a
    /// single FAILED frame.
    pub fn watch(&self, job_id: &str) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(16);
        let store = self.store.clone();
        let poll_interval = self.poll_interval;
        let job_id = job_id.to_string();

        tokio::spawn(async move {
            let mut deduper = FrameDeduper::new();
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let frame = match store.get(&job_id).await {
                    Ok(Some(record)) => deduper.next(&record),
                    Ok(None) => Some(Frame::not_found(&job_id)),
                    Err(e) => {
                        // transient store errors are retried on the next tick
                        debug!(job_id = %job_id, "observer poll failed: {}", e);
                        None
                    }
                };

                let Some(frame) = frame else {
                    if tx.is_closed() {
                        break;
                    }
                    continue;
                };
                let terminal = frame.is_terminal();
                if tx.send(frame).await.is_err() {
                    debug!(job_id = %job_id, "observer disconnected");
                    break;
                }
                if terminal {
                    break;
                }
            }
        });

        rx
    }
}
