use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failure,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Cancelled)
    }

    /// Monotonic transition check: Pending -> Running -> (Success|Failure),
    /// and Pending|Running -> Cancelled. Terminal states never transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) => true,
            (Self::Pending | Self::Running, Self::Success | Self::Failure | Self::Cancelled) => {
                true
            }
            _ => false,
        }
    }
}

/// One executable unit of automation work tied to one account and one
/// operation kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub account_id: i64,
    pub kind: String,
    pub params: Value,
    pub status: JobStatus,
    /// Reference to the queued execution request, used for broker-side abort.
    pub broker_ref: Option<String>,
    pub result: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Job {
    pub fn new(account_id: i64, kind: String, params: Value) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            account_id,
            kind,
            params,
            status: JobStatus::Pending,
            broker_ref: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }
}
