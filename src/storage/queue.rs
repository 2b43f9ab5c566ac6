use anyhow::Result;
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

// Two-table design: O(1) pop from the priority-ordered pending table, with
// in-flight requests parked in processing for stall recovery.
const PENDING: TableDefinition<u64, &[u8]> = TableDefinition::new("queue_pending");
const PROCESSING: TableDefinition<&str, &[u8]> = TableDefinition::new("queue_processing");

/// One queued job-execution request. The broker only ever sees job ids; all
/// job state lives in the history store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub request_id: String,
    pub job_id: String,
    pub enqueued_at: i64,
    pub started_at: Option<i64>,
}

impl ExecutionRequest {
    fn new(job_id: &str) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            enqueued_at: chrono::Utc::now().timestamp_millis(),
            started_at: None,
        }
    }
}

/// Abstract durable work queue delivering job-execution requests to workers.
/// Any durable queue technology satisfies this; the in-tree implementation
/// rides the same embedded database as the rest of the core.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueue a request for the job; returns the broker reference used for
    /// abort. Failures propagate synchronously to the submitter.
    fn enqueue(&self, job_id: &str) -> Result<String>;

    /// Block until a request is available and claim it.
    async fn dequeue(&self) -> Result<ExecutionRequest>;

    /// Best-effort abort: removes the request if it has not started yet.
    /// Returns false when the request is already in flight (or unknown).
    fn abort(&self, broker_ref: &str) -> Result<bool>;

    /// Release a claimed request once the worker has finished with it.
    fn mark_done(&self, broker_ref: &str) -> Result<()>;

    /// Move requests claimed longer than `timeout_secs` ago back to pending,
    /// so a crashed worker never strands a job.
    fn recover_stalled(&self, timeout_secs: i64) -> Result<u32>;
}

pub struct RedbBroker {
    db: Arc<Database>,
    notify: Arc<Notify>,
}

impl RedbBroker {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(PENDING)?;
        write_txn.open_table(PROCESSING)?;
        write_txn.commit()?;

        Ok(Self {
            db,
            notify: Arc::new(Notify::new()),
        })
    }

    fn try_pop(&self) -> Result<Option<ExecutionRequest>> {
        let write_txn = self.db.begin_write()?;

        let claimed = {
            let first = {
                let pending = write_txn.open_table(PENDING)?;
                if let Some((key, value)) = pending.first()? {
                    let request: ExecutionRequest = serde_json::from_slice(value.value())?;
                    Some((key.value(), request))
                } else {
                    None
                }
            };

            if let Some((key, mut request)) = first {
                request.started_at = Some(chrono::Utc::now().timestamp_millis());

                {
                    let mut pending = write_txn.open_table(PENDING)?;
                    pending.remove(&key)?;
                }
                {
                    let mut processing = write_txn.open_table(PROCESSING)?;
                    let serialized = serde_json::to_vec(&request)?;
                    processing.insert(request.request_id.as_str(), serialized.as_slice())?;
                }
                Some(request)
            } else {
                None
            }
        };

        write_txn.commit()?;
        Ok(claimed)
    }
}

#[async_trait]
impl Broker for RedbBroker {
    fn enqueue(&self, job_id: &str) -> Result<String> {
        let request = ExecutionRequest::new(job_id);
        let broker_ref = request.request_id.clone();

        // Nanosecond priority keeps FIFO order; collisions at this precision
        // are negligible for a per-process queue.
        let priority = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PENDING)?;
            let serialized = serde_json::to_vec(&request)?;
            table.insert(priority, serialized.as_slice())?;
        }
        write_txn.commit()?;

        self.notify.notify_one();
        Ok(broker_ref)
    }

    async fn dequeue(&self) -> Result<ExecutionRequest> {
        loop {
            match self.try_pop()? {
                Some(request) => return Ok(request),
                None => self.notify.notified().await,
            }
        }
    }

    fn abort(&self, broker_ref: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;

        let key = {
            let pending = write_txn.open_table(PENDING)?;
            let mut found = None;
            for entry in pending.iter()? {
                let (k, value) = entry?;
                let request: ExecutionRequest = serde_json::from_slice(value.value())?;
                if request.request_id == broker_ref {
                    found = Some(k.value());
                    break;
                }
            }
            found
        };

        let removed = if let Some(key) = key {
            let mut pending = write_txn.open_table(PENDING)?;
            pending.remove(&key)?;
            true
        } else {
            false
        };

        write_txn.commit()?;
        Ok(removed)
    }

    fn mark_done(&self, broker_ref: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut processing = write_txn.open_table(PROCESSING)?;
            processing.remove(broker_ref)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn recover_stalled(&self, timeout_secs: i64) -> Result<u32> {
        let now = chrono::Utc::now().timestamp_millis();
        let write_txn = self.db.begin_write()?;
        let mut recovered = 0;

        let stalled = {
            let processing = write_txn.open_table(PROCESSING)?;
            let mut requests = Vec::new();
            for entry in processing.iter()? {
                let (_, value) = entry?;
                let request: ExecutionRequest = serde_json::from_slice(value.value())?;
                if let Some(started_at) = request.started_at {
                    if now - started_at >= timeout_secs * 1_000 {
                        requests.push(request);
                    }
                }
            }
            requests
        };

        for mut request in stalled {
            {
                let mut processing = write_txn.open_table(PROCESSING)?;
                processing.remove(request.request_id.as_str())?;
            }
            {
                request.started_at = None;
                let mut pending = write_txn.open_table(PENDING)?;
                let priority = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64;
                let serialized = serde_json::to_vec(&request)?;
                pending.insert(priority, serialized.as_slice())?;
            }
            recovered += 1;
        }

        write_txn.commit()?;

        if recovered > 0 {
            self.notify.notify_one();
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup() -> (RedbBroker, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db = Arc::new(Database::create(temp_dir.path().join("test.db")).unwrap());
        (RedbBroker::new(db).unwrap(), temp_dir)
    }

    #[tokio::test]
    async fn test_enqueue_dequeue_fifo() {
        let (broker, _tmp) = setup();

        broker.enqueue("job-1").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1));
        broker.enqueue("job-2").unwrap();

        let first = broker.dequeue().await.unwrap();
        let second = broker.dequeue().await.unwrap();
        assert_eq!(first.job_id, "job-1");
        assert_eq!(second.job_id, "job-2");
        assert!(first.started_at.is_some());
    }

    #[tokio::test]
    async fn test_abort_removes_pending_request() {
        let (broker, _tmp) = setup();

        let broker_ref = broker.enqueue("job-1").unwrap();
        assert!(broker.abort(&broker_ref).unwrap());

        // Aborting again (or an unknown ref) is a no-op.
        assert!(!broker.abort(&broker_ref).unwrap());
    }

    #[tokio::test]
    async fn test_abort_misses_claimed_request() {
        let (broker, _tmp) = setup();

        let broker_ref = broker.enqueue("job-1").unwrap();
        let request = broker.dequeue().await.unwrap();
        assert_eq!(request.request_id, broker_ref);

        assert!(!broker.abort(&broker_ref).unwrap());
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let (broker, _tmp) = setup();
        let broker = Arc::new(broker);

        let waiter = broker.clone();
        let handle = tokio::spawn(async move { waiter.dequeue().await.unwrap() });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        broker.enqueue("job-late").unwrap();

        let request = handle.await.unwrap();
        assert_eq!(request.job_id, "job-late");
    }

    #[tokio::test]
    async fn test_recover_stalled_requeues_old_claims() {
        let (broker, _tmp) = setup();

        broker.enqueue("job-1").unwrap();
        let request = broker.dequeue().await.unwrap();

        // Claimed just now: nothing to recover under a generous timeout.
        assert_eq!(broker.recover_stalled(300).unwrap(), 0);

        // With a zero timeout the claim counts as stalled immediately.
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(broker.recover_stalled(0).unwrap(), 1);

        let requeued = broker.dequeue().await.unwrap();
        assert_eq!(requeued.job_id, "job-1");
        assert_eq!(requeued.request_id, request.request_id);
    }

    #[tokio::test]
    async fn test_mark_done_clears_processing() {
        let (broker, _tmp) = setup();

        broker.enqueue("job-1").unwrap();
        let request = broker.dequeue().await.unwrap();
        broker.mark_done(&request.request_id).unwrap();

        // Nothing left to recover once the claim is released.
        assert_eq!(broker.recover_stalled(0).unwrap(), 0);
    }
}
