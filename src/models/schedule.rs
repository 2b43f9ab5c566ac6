use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A stored recurring schedule. Mutated by external management surfaces;
/// the scheduler only reads these rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringSchedule {
    pub id: String,
    pub account_id: i64,
    /// Five-field cron expression (min hour day month weekday).
    pub cron: String,
    pub enabled: bool,
    /// Operation kind submitted when the schedule fires.
    pub kind: String,
    /// Parameters passed through to the submitted job.
    pub params: Value,
}

impl RecurringSchedule {
    pub fn new(account_id: i64, cron: String, kind: String, params: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            account_id,
            cron,
            enabled: true,
            kind,
            params,
        }
    }
}
