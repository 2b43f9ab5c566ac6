use serde::{Deserialize, Serialize};

/// Structured progress event for one job, published to the per-account topic
/// and fanned out to live observers. Events for a single job are delivered
/// in emission order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum JobEvent {
    /// One target was acted upon successfully.
    TargetDone {
        job_id: String,
        target: String,
        message: String,
    },
    /// One target was skipped (unusable target or transient remote failure).
    TargetSkipped {
        job_id: String,
        target: String,
        reason: String,
    },
    /// The account's credentials were rejected; carries enough detail for an
    /// observer to prompt re-authentication.
    AuthFailure { job_id: String, message: String },
    /// Final summary, emitted exactly once per executed job.
    Summary {
        job_id: String,
        succeeded: u32,
        skipped: u32,
        message: String,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            Self::TargetDone { job_id, .. }
            | Self::TargetSkipped { job_id, .. }
            | Self::AuthFailure { job_id, .. }
            | Self::Summary { job_id, .. } => job_id,
        }
    }
}
