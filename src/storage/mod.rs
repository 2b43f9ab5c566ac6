pub mod history;
pub mod queue;
pub mod quota;
pub mod schedule;

use crate::models::SettingsProvider;
use anyhow::Result;
use redb::Database;
use std::path::Path;
use std::sync::Arc;

pub use history::{JobHistoryStore, JobPage};
pub use queue::{Broker, ExecutionRequest, RedbBroker};
pub use quota::QuotaLedger;
pub use schedule::ScheduleStorage;

/// All persistent state of the core, backed by a single embedded database.
pub struct Storage {
    db: Arc<Database>,
    pub history: JobHistoryStore,
    pub quota: QuotaLedger,
    pub schedules: ScheduleStorage,
}

impl Storage {
    pub fn new(path: impl AsRef<Path>, settings: Arc<dyn SettingsProvider>) -> Result<Self> {
        let db = Arc::new(Database::create(path)?);

        let history = JobHistoryStore::new(db.clone())?;
        let quota = QuotaLedger::new(db.clone(), settings)?;
        let schedules = ScheduleStorage::new(db.clone())?;

        Ok(Self {
            db,
            history,
            quota,
            schedules,
        })
    }

    pub fn get_db(&self) -> Arc<Database> {
        self.db.clone()
    }
}
