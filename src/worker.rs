//! Lane-partitioned worker pools
//!
//! Each lane owns a bounded queue and its own set of workers, so a backlog of
//! slow generation jobs never delays detection or VQA jobs. A worker runs one
//! job at a time, start to finish.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::WorkersConfig;
use crate::orchestrator::{JobTicket, Orchestrator, QueuedJob};
use crate::router::Lane;

pub struct WorkerPool {
    orchestrator: Arc<Orchestrator>,
    queues: HashMap<Lane, mpsc::Sender<QueuedJob>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `config.light` + `config.heavy` workers
    pub fn start(orchestrator: Arc<Orchestrator>, config: &WorkersConfig) -> Self {
        let mut queues = HashMap::new();
        let mut handles = Vec::new();

        for lane in Lane::ALL {
            let workers = match lane {
                Lane::Light => config.light,
                Lane::Heavy => config.heavy,
            };
            let (tx, rx) = mpsc::channel::<QueuedJob>(config.queue_capacity.max(1));
            let rx = Arc::new(Mutex::new(rx));

            for n in 0..workers.max(1) {
                let rx = rx.clone();
                let orchestrator = orchestrator.clone();
                let span = tracing::info_span!("worker", lane = %lane, n);
                handles.push(tokio::spawn(
                    async move {
                        loop {
                            // hold the lock only while waiting, never while running
                            let next = rx.lock().await.recv().await;
                            let Some(job) = next else {
                                debug!("queue closed, worker exiting");
                                break;
                            };
                            run_isolated(&orchestrator, job).await;
                        }
                    }
                    .instrument(span),
                ));
            }

            info!(lane = %lane, workers = workers.max(1), "Worker lane started");
            queues.insert(lane, tx);
        }

        Self {
            orchestrator,
            queues,
            handles,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Accept a job and queue it on its lane
    ///
    /// A full or closed lane fails the job at once rather than blocking the
    /// caller; the ticket is still returned so the failure can be observed.
    pub async fn submit(&self, prompt: &str, image: Vec<u8>) -> Result<JobTicket> {
        let job = self.orchestrator.submit(prompt, image).await?;
        let ticket = job.ticket.clone();

        let Some(queue) = self.queues.get(&ticket.lane) else {
            let err = self.orchestrator.reject(job, "no workers for lane").await;
            return Err(anyhow!(err));
        };

        match queue.try_send(job) {
            Ok(()) => {
                debug!(job_id = %ticket.job_id, lane = %ticket.lane, "Job queued");
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(lane = %ticket.lane, "Lane queue full");
                self.orchestrator
                    .reject(job, format!("{} lane queue is full", ticket.lane))
                    .await;
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!(lane = %ticket.lane, "Lane queue closed");
                self.orchestrator
                    .reject(job, format!("{} lane is shut down", ticket.lane))
                    .await;
            }
        }
        Ok(ticket)
    }

    /// Stop accepting jobs and wait for queued ones to finish
    pub async fn shutdown(self) {
        drop(self.queues);
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("Worker task ended abnormally: {}", e);
            }
        }
        info!("Worker pool stopped");
    }
}

/// Run one job on its own task so a panic ends the job, not the worker
async fn run_isolated(orchestrator: &Arc<Orchestrator>, job: QueuedJob) {
    let job_id = job.ticket.job_id.clone();
    let scratch_files = job.input.scratch_files.clone();

    let runner = orchestrator.clone();
    let outcome = tokio::spawn(async move { runner.run(job).await }.in_current_span()).await;

    match outcome {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => debug!(job_id = %job_id, kind = e.kind(), "Job ended in failure"),
        Err(e) => {
            error!(job_id = %job_id, "Job task crashed: {}", e);
            orchestrator.recover(&job_id, &scratch_files, e.to_string()).await;
        }
    }
}
