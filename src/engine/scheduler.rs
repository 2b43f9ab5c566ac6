use crate::engine::orchestrator::TaskOrchestrator;
use crate::storage::Storage;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// One materialized trigger: a parsed cron rule plus the submission data for
/// the job it fires.
struct ScheduleTrigger {
    schedule_id: String,
    account_id: i64,
    kind: String,
    params: serde_json::Value,
    cron: cron::Schedule,
}

/// What one scheduler tick did; surfaced for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub fired: u32,
    pub parse_errors: u32,
    pub rebuilt: bool,
}

/// Reconciles the persisted schedule table into trigger rules on a fixed
/// cadence and fires due jobs through the orchestrator.
///
/// The trigger table is only rebuilt when the storage-side dirty flag says
/// schedule rows changed; quiet ticks reuse the cached table. A malformed
/// cron expression is logged and skipped without affecting its neighbors.
pub struct DynamicScheduler {
    storage: Arc<Storage>,
    orchestrator: Arc<TaskOrchestrator>,
    interval: Duration,
    triggers: Vec<ScheduleTrigger>,
    last_tick: DateTime<Utc>,
}

impl DynamicScheduler {
    pub fn new(
        storage: Arc<Storage>,
        orchestrator: Arc<TaskOrchestrator>,
        interval: Duration,
    ) -> Self {
        Self {
            storage,
            orchestrator,
            interval,
            triggers: Vec::new(),
            // Backdate so occurrences due in the first interval still fire.
            last_tick: Utc::now() - chrono::Duration::from_std(interval).unwrap_or_default(),
        }
    }

    /// Run the tick loop until the task is dropped.
    pub async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "Scheduler started");
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            match self.tick() {
                Ok(report) if report.fired > 0 || report.parse_errors > 0 => {
                    info!(
                        fired = report.fired,
                        parse_errors = report.parse_errors,
                        rebuilt = report.rebuilt,
                        "Scheduler tick"
                    );
                }
                Ok(_) => {}
                Err(error) => error!(error = %error, "Scheduler tick failed"),
            }
        }
    }

    /// One reconciliation pass at the current wall-clock time.
    pub fn tick(&mut self) -> Result<TickReport> {
        self.tick_at(Utc::now())
    }

    fn tick_at(&mut self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();

        if self.storage.schedules.take_dirty() {
            report.parse_errors = self.rebuild()?;
            report.rebuilt = true;
        }

        for trigger in &self.triggers {
            let due = trigger
                .cron
                .after(&self.last_tick)
                .next()
                .filter(|occurrence| *occurrence <= now);

            if let Some(occurrence) = due {
                debug!(
                    schedule_id = %trigger.schedule_id,
                    account_id = trigger.account_id,
                    occurrence = %occurrence,
                    "Schedule due"
                );
                match self.orchestrator.submit(
                    trigger.account_id,
                    &trigger.kind,
                    trigger.params.clone(),
                ) {
                    Ok(job_id) => {
                        report.fired += 1;
                        info!(
                            schedule_id = %trigger.schedule_id,
                            job_id = %job_id,
                            "Scheduled job fired"
                        );
                    }
                    Err(error) => {
                        error!(
                            schedule_id = %trigger.schedule_id,
                            error = %error,
                            "Failed to submit scheduled job"
                        );
                    }
                }
            }
        }

        self.last_tick = now;
        Ok(report)
    }

    /// Re-read enabled schedule rows and materialize the trigger table.
    /// Returns the number of rows skipped for parse errors.
    fn rebuild(&mut self) -> Result<u32> {
        let schedules = self.storage.schedules.list_enabled()?;
        let mut parse_errors = 0;
        let mut triggers = Vec::with_capacity(schedules.len());

        for schedule in schedules {
            match cron::Schedule::from_str(&normalize_cron(&schedule.cron)) {
                Ok(parsed) => triggers.push(ScheduleTrigger {
                    schedule_id: schedule.id,
                    account_id: schedule.account_id,
                    kind: schedule.kind,
                    params: schedule.params,
                    cron: parsed,
                }),
                Err(error) => {
                    parse_errors += 1;
                    warn!(
                        schedule_id = %schedule.id,
                        cron = %schedule.cron,
                        error = %error,
                        "Skipping schedule with malformed cron expression"
                    );
                }
            }
        }

        debug!(triggers = triggers.len(), parse_errors, "Trigger table rebuilt");
        self.triggers = triggers;
        Ok(parse_errors)
    }
}

// Stored expressions are five-field (min hour day month weekday); the cron
// crate wants a seconds field, so prepend one. Six-field input passes
// through untouched.
fn normalize_cron(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}
