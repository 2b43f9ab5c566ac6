use crate::events::bus::EventBus;
use crate::models::JobEvent;
use anyhow::Result;
use std::sync::Arc;

const TOPIC_PREFIX: &str = "job.events.";

/// Publishes structured job progress events onto the per-account topic.
/// One emitter instance is shared by all executors; ordering per job is
/// guaranteed by the single sequential publisher per job.
#[derive(Clone)]
pub struct JobEventEmitter {
    bus: Arc<dyn EventBus>,
}

impl JobEventEmitter {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    pub fn emit(&self, account_id: i64, event: &JobEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)?;
        self.bus.publish(&account_topic(account_id), payload)
    }
}

/// Topic carrying all job events for one account.
pub fn account_topic(account_id: i64) -> String {
    format!("{TOPIC_PREFIX}{account_id}")
}

/// Wildcard pattern matching every account's job-event topic.
pub fn all_accounts_pattern() -> String {
    format!("{TOPIC_PREFIX}*")
}

/// Decode the account id back out of a topic name.
pub fn parse_account_topic(topic: &str) -> Option<i64> {
    topic.strip_prefix(TOPIC_PREFIX)?.parse().ok()
}
