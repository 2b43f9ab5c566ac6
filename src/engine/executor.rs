use crate::engine::pacing::Humanizer;
use crate::error::{ActionError, QuotaError};
use crate::events::JobEventEmitter;
use crate::models::{Job, JobEvent, JobStatus, SettingsProvider};
use crate::ops::OperationRegistry;
use crate::remote::Target;
use crate::storage::{Broker, Storage};
use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DEQUEUE_RETRY_DELAY_MS: u64 = 100;

/// In-process cancellation tokens for jobs currently executing, keyed by job
/// id. The orchestrator trips a token to preempt an in-flight pacing sleep;
/// the durable flag in storage covers workers in other processes.
pub type ActiveJobs = Arc<DashMap<String, CancellationToken>>;

struct Outcome {
    status: JobStatus,
    message: String,
    succeeded: u32,
    skipped: u32,
}

impl Outcome {
    fn new(status: JobStatus, message: impl Into<String>, succeeded: u32, skipped: u32) -> Self {
        Self {
            status,
            message: message.into(),
            succeeded,
            skipped,
        }
    }
}

/// Executes one job to a guaranteed terminal status: walks the resolved
/// target list sequentially, pacing each step, consuming quota on success,
/// tolerating per-target failures, and emitting progress events throughout.
pub struct JobExecutor {
    storage: Arc<Storage>,
    registry: Arc<OperationRegistry>,
    humanizer: Arc<Humanizer>,
    emitter: JobEventEmitter,
    settings: Arc<dyn SettingsProvider>,
    active: ActiveJobs,
}

impl JobExecutor {
    pub fn new(
        storage: Arc<Storage>,
        registry: Arc<OperationRegistry>,
        humanizer: Arc<Humanizer>,
        emitter: JobEventEmitter,
        settings: Arc<dyn SettingsProvider>,
        active: ActiveJobs,
    ) -> Self {
        Self {
            storage,
            registry,
            humanizer,
            emitter,
            settings,
            active,
        }
    }

    /// Run the job to completion. Whatever happens inside, the job ends in a
    /// terminal status; unexpected internal failures are recorded as FAILURE
    /// with a generic message rather than dropped.
    pub async fn execute(&self, job_id: &str) -> Result<()> {
        let Some(job) = self.storage.history.get(job_id)? else {
            warn!(job_id, "Dequeued request for unknown job");
            return Ok(());
        };

        if job.status.is_terminal() {
            debug!(job_id, "Job already terminal, skipping execution");
            return Ok(());
        }

        // A cancellation that raced the queue beats execution entirely.
        if self.storage.history.cancel_requested(job_id)? {
            self.storage.history.transition(
                job_id,
                JobStatus::Cancelled,
                Some("cancelled before execution started".to_string()),
            )?;
            return Ok(());
        }

        self.storage
            .history
            .transition(job_id, JobStatus::Running, None)?;

        let token = CancellationToken::new();
        self.active.insert(job_id.to_string(), token.clone());

        let outcome = match self.run_targets(&job, &token).await {
            Ok(outcome) => outcome,
            Err(error) => {
                error!(job_id, error = %error, "Job execution failed unexpectedly");
                Outcome::new(JobStatus::Failure, "internal error during execution", 0, 0)
            }
        };

        self.active.remove(job_id);

        self.storage
            .history
            .transition(job_id, outcome.status, Some(outcome.message.clone()))?;

        let summary = JobEvent::Summary {
            job_id: job_id.to_string(),
            succeeded: outcome.succeeded,
            skipped: outcome.skipped,
            message: outcome.message,
        };
        if let Err(error) = self.emitter.emit(job.account_id, &summary) {
            warn!(job_id, error = %error, "Failed to emit summary event");
        }

        info!(
            job_id,
            account_id = job.account_id,
            status = ?outcome.status,
            succeeded = outcome.succeeded,
            skipped = outcome.skipped,
            "Job finished"
        );
        Ok(())
    }

    async fn run_targets(&self, job: &Job, token: &CancellationToken) -> Result<Outcome> {
        let Some(op) = self.registry.get(&job.kind) else {
            return Ok(Outcome::new(
                JobStatus::Failure,
                format!("unknown operation kind: {}", job.kind),
                0,
                0,
            ));
        };

        let targets = match op.resolve_targets(job.account_id, &job.params).await {
            Ok(targets) => targets,
            Err(error) => {
                return Ok(Outcome::new(
                    JobStatus::Failure,
                    format!("failed to resolve targets: {error}"),
                    0,
                    0,
                ));
            }
        };

        let tier = self.settings.settings_for(job.account_id).speed;
        let action_kind = op.action_kind();
        let mut succeeded = 0u32;
        let mut skipped = 0u32;

        for target in &targets {
            if token.is_cancelled() || self.storage.history.cancel_requested(&job.id)? {
                return Ok(Outcome::new(
                    JobStatus::Cancelled,
                    format!("cancelled after {succeeded} actions"),
                    succeeded,
                    skipped,
                ));
            }

            // Stop before acting once the day's budget is gone. Reaching the
            // limit is an expected stopping condition, not an error.
            if self.storage.quota.remaining(job.account_id, action_kind)? == 0 {
                return Ok(Outcome::new(
                    JobStatus::Success,
                    format!("daily limit for {action_kind} reached after {succeeded} actions"),
                    succeeded,
                    skipped,
                ));
            }

            let delay = self.humanizer.delay_for(action_kind, tier);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => {
                    return Ok(Outcome::new(
                        JobStatus::Cancelled,
                        format!("cancelled after {succeeded} actions"),
                        succeeded,
                        skipped,
                    ));
                }
            }

            match op.perform(job.account_id, target).await {
                Ok(_) => match self.storage.quota.try_consume(job.account_id, action_kind, 1) {
                    Ok(_remaining) => {
                        succeeded += 1;
                        self.emit_target_event(
                            job,
                            JobEvent::TargetDone {
                                job_id: job.id.clone(),
                                target: target.id.clone(),
                                message: format!("{action_kind} done"),
                            },
                        );
                    }
                    // Lost a race against a concurrent job for the same
                    // account. The action already happened and is not
                    // refunded; stop here.
                    Err(QuotaError::Exceeded { limit, .. }) => {
                        return Ok(Outcome::new(
                            JobStatus::Success,
                            format!("daily limit of {limit} for {action_kind} reached"),
                            succeeded,
                            skipped,
                        ));
                    }
                    Err(QuotaError::Storage(error)) => return Err(error),
                },
                Err(ActionError::TargetInvalid(reason)) => {
                    skipped += 1;
                    self.emit_target_event(
                        job,
                        JobEvent::TargetSkipped {
                            job_id: job.id.clone(),
                            target: target.id.clone(),
                            reason,
                        },
                    );
                }
                Err(ActionError::Transient(reason)) => {
                    // No per-target retry here; redelivery is the broker's
                    // business. Skipping keeps one flaky target from eating
                    // the job's time budget.
                    skipped += 1;
                    self.emit_target_event(
                        job,
                        JobEvent::TargetSkipped {
                            job_id: job.id.clone(),
                            target: target.id.clone(),
                            reason: format!("transient failure: {reason}"),
                        },
                    );
                }
                Err(ActionError::AuthInvalid(detail)) => {
                    self.emit_target_event(
                        job,
                        JobEvent::AuthFailure {
                            job_id: job.id.clone(),
                            message: format!(
                                "account {} needs to re-authenticate: {detail}",
                                job.account_id
                            ),
                        },
                    );
                    return Ok(Outcome::new(
                        JobStatus::Failure,
                        format!("credentials rejected after {succeeded} actions: {detail}"),
                        succeeded,
                        skipped,
                    ));
                }
            }
        }

        Ok(Outcome::new(
            JobStatus::Success,
            format!("processed {} targets", targets.len()),
            succeeded,
            skipped,
        ))
    }

    fn emit_target_event(&self, job: &Job, event: JobEvent) {
        if let Err(error) = self.emitter.emit(job.account_id, &event) {
            warn!(job_id = %job.id, error = %error, "Failed to emit job event");
        }
    }
}

/// Pulls execution requests off the broker and hands them to the executor.
pub struct Worker {
    id: usize,
    broker: Arc<dyn Broker>,
    executor: Arc<JobExecutor>,
    running: Arc<Mutex<bool>>,
}

impl Worker {
    pub fn new(
        id: usize,
        broker: Arc<dyn Broker>,
        executor: Arc<JobExecutor>,
        running: Arc<Mutex<bool>>,
    ) -> Self {
        Self {
            id,
            broker,
            executor,
            running,
        }
    }

    pub async fn run_worker_loop(&self) {
        info!(worker_id = self.id, "Worker started");

        while *self.running.lock().await {
            if let Err(error) = self.process_next().await {
                error!(worker_id = self.id, error = %error, "Worker error");
                tokio::time::sleep(std::time::Duration::from_millis(DEQUEUE_RETRY_DELAY_MS)).await;
            }
        }

        info!(worker_id = self.id, "Worker stopped");
    }

    async fn process_next(&self) -> Result<()> {
        let request = self.broker.dequeue().await?;
        debug!(worker_id = self.id, job_id = %request.job_id, "Processing request");

        if let Err(error) = self.executor.execute(&request.job_id).await {
            // The executor normally records its own terminal status; this is
            // the last-resort guarantee that nothing stays RUNNING forever.
            error!(job_id = %request.job_id, error = %error, "Execution error");
            if let Err(persist_err) = self.storage_failure(&request.job_id) {
                warn!(job_id = %request.job_id, error = %persist_err, "Failed to persist failure status");
            }
        }

        self.broker.mark_done(&request.request_id)?;
        Ok(())
    }

    fn storage_failure(&self, job_id: &str) -> Result<()> {
        self.executor.storage.history.transition(
            job_id,
            JobStatus::Failure,
            Some("internal error".to_string()),
        )?;
        Ok(())
    }
}

/// Target list placeholder used in executor tests and simple operations.
pub fn targets_from_ids<I: IntoIterator<Item = S>, S: Into<String>>(ids: I) -> Vec<Target> {
    ids.into_iter().map(|id| Target::new(id.into())).collect()
}
