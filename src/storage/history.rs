use crate::models::{Job, JobStatus};
use anyhow::Result;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::sync::Arc;

const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");
// Durable cancellation flags, polled by the executor between targets.
const CANCEL_FLAGS: TableDefinition<&str, u64> = TableDefinition::new("cancel_flags");

/// One page of job history, newest first.
#[derive(Debug, Clone)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub page: u32,
    pub total: usize,
}

/// Durable record of every submitted job: status transitions, timestamps,
/// result text, and the broker reference used for cancellation.
///
/// Each mutation is a read-modify-write inside a single write transaction;
/// redb serializes writers, which gives per-job transition atomicity.
pub struct JobHistoryStore {
    db: Arc<Database>,
}

impl JobHistoryStore {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(JOBS)?;
        write_txn.open_table(CANCEL_FLAGS)?;
        write_txn.commit()?;

        Ok(Self { db })
    }

    pub fn create(&self, job: &Job) -> Result<String> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(JOBS)?;
            let serialized = serde_json::to_vec(job)?;
            table.insert(job.id.as_str(), serialized.as_slice())?;
        }
        write_txn.commit()?;
        Ok(job.id.clone())
    }

    pub fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(JOBS)?;

        if let Some(value) = table.get(job_id)? {
            let job: Job = serde_json::from_slice(value.value())?;
            Ok(Some(job))
        } else {
            Ok(None)
        }
    }

    /// Apply a guarded status transition. Transitions out of a terminal state
    /// (and otherwise non-monotonic ones) are no-op successes returning the
    /// stored row unchanged, so administrative retries stay idempotent.
    pub fn transition(
        &self,
        job_id: &str,
        status: JobStatus,
        result: Option<String>,
    ) -> Result<Option<Job>> {
        self.mutate(job_id, |job| {
            if !job.status.can_transition_to(status) {
                return false;
            }
            job.status = status;
            if result.is_some() {
                job.result = result.clone();
            }
            true
        })
    }

    /// Administrative override: bypasses the monotonicity guard. Re-applying
    /// the same override is a no-op and does not bump `updated_at`.
    pub fn override_status(
        &self,
        job_id: &str,
        status: JobStatus,
        result: Option<String>,
    ) -> Result<Option<Job>> {
        self.mutate(job_id, |job| {
            if job.status == status && job.result == result {
                return false;
            }
            job.status = status;
            job.result = result.clone();
            true
        })
    }

    /// Record the broker reference for a freshly enqueued job.
    pub fn set_broker_ref(&self, job_id: &str, broker_ref: &str) -> Result<Option<Job>> {
        self.mutate(job_id, |job| {
            job.broker_ref = Some(broker_ref.to_string());
            true
        })
    }

    /// Paginated per-account history, newest first, optionally filtered by
    /// status.
    pub fn list_for_account(
        &self,
        account_id: i64,
        page: u32,
        page_size: usize,
        status: Option<JobStatus>,
    ) -> Result<JobPage> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(JOBS)?;

        let mut jobs = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let job: Job = serde_json::from_slice(value.value())?;
            if job.account_id == account_id && status.is_none_or(|s| job.status == s) {
                jobs.push(job);
            }
        }

        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = jobs.len();
        let start = (page as usize).saturating_mul(page_size);
        let jobs = if start < total {
            jobs[start..(start + page_size).min(total)].to_vec()
        } else {
            Vec::new()
        };

        Ok(JobPage { jobs, page, total })
    }

    /// Flip the durable cancel flag for a job.
    pub fn request_cancel(&self, job_id: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CANCEL_FLAGS)?;
            table.insert(job_id, chrono::Utc::now().timestamp_millis() as u64)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn cancel_requested(&self, job_id: &str) -> Result<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CANCEL_FLAGS)?;
        Ok(table.get(job_id)?.is_some())
    }

    fn mutate<F>(&self, job_id: &str, apply: F) -> Result<Option<Job>>
    where
        F: FnOnce(&mut Job) -> bool,
    {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(JOBS)?;

            let current = if let Some(value) = table.get(job_id)? {
                let job: Job = serde_json::from_slice(value.value())?;
                Some(job)
            } else {
                None
            };

            match current {
                Some(mut job) => {
                    if apply(&mut job) {
                        job.updated_at = chrono::Utc::now().timestamp_millis();
                        let serialized = serde_json::to_vec(&job)?;
                        table.insert(job_id, serialized.as_slice())?;
                    }
                    Some(job)
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup() -> (JobHistoryStore, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db = Arc::new(Database::create(temp_dir.path().join("test.db")).unwrap());
        (JobHistoryStore::new(db).unwrap(), temp_dir)
    }

    fn sample_job(account_id: i64) -> Job {
        Job::new(account_id, "like_feed".to_string(), serde_json::json!({}))
    }

    #[test]
    fn test_create_and_get() {
        let (store, _tmp) = setup();
        let job = sample_job(1);
        let id = store.create(&job).unwrap();

        let loaded = store.get(&id).unwrap().unwrap();
        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.status, JobStatus::Pending);
    }

    #[test]
    fn test_transition_is_monotonic() {
        let (store, _tmp) = setup();
        let job = sample_job(1);
        store.create(&job).unwrap();

        store.transition(&job.id, JobStatus::Running, None).unwrap();
        store
            .transition(&job.id, JobStatus::Success, Some("done".to_string()))
            .unwrap();

        // Attempting to leave a terminal state is a no-op success.
        let after = store
            .transition(&job.id, JobStatus::Running, None)
            .unwrap()
            .unwrap();
        assert_eq!(after.status, JobStatus::Success);
        assert_eq!(after.result.as_deref(), Some("done"));
    }

    #[test]
    fn test_terminal_transition_noop_keeps_updated_at() {
        let (store, _tmp) = setup();
        let job = sample_job(1);
        store.create(&job).unwrap();

        store.transition(&job.id, JobStatus::Cancelled, None).unwrap();
        let first = store.get(&job.id).unwrap().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = store
            .transition(&job.id, JobStatus::Cancelled, None)
            .unwrap()
            .unwrap();

        assert_eq!(second.status, JobStatus::Cancelled);
        assert_eq!(second.updated_at, first.updated_at);
    }

    #[test]
    fn test_override_is_idempotent() {
        let (store, _tmp) = setup();
        let job = sample_job(1);
        store.create(&job).unwrap();
        store
            .transition(&job.id, JobStatus::Failure, Some("boom".to_string()))
            .unwrap();

        let first = store
            .override_status(&job.id, JobStatus::Success, Some("fixed".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(first.status, JobStatus::Success);

        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = store
            .override_status(&job.id, JobStatus::Success, Some("fixed".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(second.updated_at, first.updated_at);
    }

    #[test]
    fn test_list_for_account_pages_newest_first() {
        let (store, _tmp) = setup();
        for _ in 0..5 {
            let mut job = sample_job(42);
            // Spread created_at so ordering is deterministic.
            job.created_at = chrono::Utc::now().timestamp_millis();
            store.create(&job).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        store.create(&sample_job(43)).unwrap();

        let page = store.list_for_account(42, 0, 3, None).unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.jobs.len(), 3);
        assert!(page.jobs[0].created_at >= page.jobs[1].created_at);

        let last = store.list_for_account(42, 1, 3, None).unwrap();
        assert_eq!(last.jobs.len(), 2);
    }

    #[test]
    fn test_cancel_flag_roundtrip() {
        let (store, _tmp) = setup();
        let job = sample_job(1);
        store.create(&job).unwrap();

        assert!(!store.cancel_requested(&job.id).unwrap());
        store.request_cancel(&job.id).unwrap();
        assert!(store.cancel_requested(&job.id).unwrap());
    }
}
