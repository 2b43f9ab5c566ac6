use crate::engine::executor::ActiveJobs;
use crate::models::{Job, JobStatus};
use crate::ops::OperationRegistry;
use crate::storage::{Broker, JobPage, Storage};
use anyhow::{Result, anyhow};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The request was recorded; the job either stopped at the broker or
    /// will stop at its next cooperative check.
    Accepted,
    NotFound,
    /// The job already reached a terminal state; nothing changed.
    AlreadyTerminal(JobStatus),
}

/// Public submission/cancellation boundary of the core. Creates history rows,
/// hands execution requests to the broker, and reconciles cancellations.
pub struct TaskOrchestrator {
    storage: Arc<Storage>,
    broker: Arc<dyn Broker>,
    registry: Arc<OperationRegistry>,
    active: ActiveJobs,
}

impl TaskOrchestrator {
    pub fn new(
        storage: Arc<Storage>,
        broker: Arc<dyn Broker>,
        registry: Arc<OperationRegistry>,
        active: ActiveJobs,
    ) -> Self {
        Self {
            storage,
            broker,
            registry,
            active,
        }
    }

    /// Validate the operation kind, record a PENDING job, and enqueue it.
    /// Returns immediately with the job id; enqueue failures propagate to
    /// the caller (and the job is marked FAILURE rather than left pending).
    pub fn submit(&self, account_id: i64, kind: &str, params: serde_json::Value) -> Result<String> {
        if !self.registry.contains(kind) {
            return Err(anyhow!("unknown operation kind: {kind}"));
        }

        let job = Job::new(account_id, kind.to_string(), params);
        let job_id = self.storage.history.create(&job)?;

        let broker_ref = match self.broker.enqueue(&job_id) {
            Ok(broker_ref) => broker_ref,
            Err(error) => {
                self.storage.history.transition(
                    &job_id,
                    JobStatus::Failure,
                    Some("failed to enqueue execution request".to_string()),
                )?;
                return Err(error);
            }
        };
        self.storage.history.set_broker_ref(&job_id, &broker_ref)?;

        info!(job_id = %job_id, account_id, kind, "Job submitted");
        Ok(job_id)
    }

    /// Best-effort cancellation: abort at the broker if the job has not
    /// started, and flip the durable flag plus the in-process token so a
    /// running executor exits at its next check. A running job may complete
    /// a few more targets before it observes the request.
    pub fn cancel(&self, job_id: &str, requested_by: &str) -> Result<CancelOutcome> {
        let Some(job) = self.storage.history.get(job_id)? else {
            return Ok(CancelOutcome::NotFound);
        };

        if job.status.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal(job.status));
        }

        self.storage.history.request_cancel(job_id)?;

        let aborted_at_broker = match &job.broker_ref {
            Some(broker_ref) => self.broker.abort(broker_ref).unwrap_or_else(|error| {
                warn!(job_id, error = %error, "Broker abort failed, relying on cooperative stop");
                false
            }),
            None => false,
        };

        if aborted_at_broker {
            // Never started; terminal state is ours to record.
            self.storage.history.transition(
                job_id,
                JobStatus::Cancelled,
                Some(format!("cancelled by {requested_by}")),
            )?;
        } else if let Some(token) = self.active.get(job_id) {
            // In flight here: preempt the pacing sleep.
            token.cancel();
        }

        info!(job_id, requested_by, aborted_at_broker, "Cancellation requested");
        Ok(CancelOutcome::Accepted)
    }

    /// Paginated per-account job history.
    pub fn get_history(
        &self,
        account_id: i64,
        page: u32,
        page_size: usize,
        status: Option<JobStatus>,
    ) -> Result<JobPage> {
        self.storage
            .history
            .list_for_account(account_id, page, page_size, status)
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        self.storage.history.get(job_id)
    }
}
