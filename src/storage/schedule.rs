use crate::models::RecurringSchedule;
use anyhow::Result;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const SCHEDULES: TableDefinition<&str, &[u8]> = TableDefinition::new("recurring_schedules");

/// Persisted recurring schedules, with a dirty flag the scheduler uses to
/// skip rebuilding its trigger table on ticks where nothing changed.
///
/// The mutation methods stand in for the external management surface; every
/// write marks the table dirty.
pub struct ScheduleStorage {
    db: Arc<Database>,
    dirty: AtomicBool,
}

impl ScheduleStorage {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(SCHEDULES)?;
        write_txn.commit()?;

        Ok(Self {
            db,
            // Dirty on startup so the first tick always materializes.
            dirty: AtomicBool::new(true),
        })
    }

    pub fn upsert(&self, schedule: &RecurringSchedule) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SCHEDULES)?;
            let serialized = serde_json::to_vec(schedule)?;
            table.insert(schedule.id.as_str(), serialized.as_slice())?;
        }
        write_txn.commit()?;
        self.mark_dirty();
        Ok(())
    }

    pub fn delete(&self, schedule_id: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SCHEDULES)?;
            table.remove(schedule_id)?;
        }
        write_txn.commit()?;
        self.mark_dirty();
        Ok(())
    }

    pub fn get(&self, schedule_id: &str) -> Result<Option<RecurringSchedule>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SCHEDULES)?;

        if let Some(value) = table.get(schedule_id)? {
            Ok(Some(serde_json::from_slice(value.value())?))
        } else {
            Ok(None)
        }
    }

    /// A disabled schedule never produces fired jobs, so the scheduler only
    /// ever sees this filtered view.
    pub fn list_enabled(&self) -> Result<Vec<RecurringSchedule>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SCHEDULES)?;

        let mut schedules = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let schedule: RecurringSchedule = serde_json::from_slice(value.value())?;
            if schedule.enabled {
                schedules.push(schedule);
            }
        }
        Ok(schedules)
    }

    /// Signal that schedule rows changed and the trigger table must be
    /// rebuilt on the next tick.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Consume the dirty flag. Returns true exactly once per mutation burst.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }
}
