use crate::error::QuotaError;
use crate::models::SettingsProvider;
use anyhow::Result;
use chrono::NaiveDate;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::sync::Arc;

// (account, action kind, calendar day) -> count. Counters are created lazily,
// only ever incremented, and naturally expire once the day's key stops being
// queried.
const QUOTA: TableDefinition<&str, u64> = TableDefinition::new("quota_counters");

/// Per-account, per-day action counters enforcing plan limits.
///
/// `try_consume` performs the check and the increment inside one write
/// transaction; redb serializes writers, so concurrent jobs for the same
/// account can never push a counter past its limit. There is no refund path:
/// consumption models "intent to act", and a downstream failure after the
/// increment does not decrement the counter.
pub struct QuotaLedger {
    db: Arc<Database>,
    settings: Arc<dyn SettingsProvider>,
}

impl QuotaLedger {
    pub fn new(db: Arc<Database>, settings: Arc<dyn SettingsProvider>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(QUOTA)?;
        write_txn.commit()?;

        Ok(Self { db, settings })
    }

    /// Atomically consume `amount` units of today's quota for the account and
    /// action kind. Returns the remaining headroom, or
    /// `QuotaError::Exceeded` without consuming anything.
    pub fn try_consume(&self, account_id: i64, kind: &str, amount: u32) -> Result<u32, QuotaError> {
        self.try_consume_on(account_id, kind, amount, today())
    }

    /// Advisory headroom check for today, without consuming. Used by the
    /// executor to stop before acting once the limit is reached; the
    /// authoritative check remains `try_consume`.
    pub fn remaining(&self, account_id: i64, kind: &str) -> Result<u32> {
        let limit = self.limit_for(account_id, kind);
        let count = self.count_for(account_id, kind, today())?;
        Ok(limit.saturating_sub(count))
    }

    /// Current counter value for one calendar day.
    pub fn count_for(&self, account_id: i64, kind: &str, day: NaiveDate) -> Result<u32> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(QUOTA)?;
        let count = table
            .get(counter_key(account_id, kind, day).as_str())?
            .map(|v| v.value())
            .unwrap_or(0);
        Ok(count as u32)
    }

    fn try_consume_on(
        &self,
        account_id: i64,
        kind: &str,
        amount: u32,
        day: NaiveDate,
    ) -> Result<u32, QuotaError> {
        let limit = self.limit_for(account_id, kind);
        let key = counter_key(account_id, kind, day);

        let write_txn = self.db.begin_write().map_err(anyhow::Error::from)?;
        let remaining = {
            let mut table = write_txn.open_table(QUOTA).map_err(anyhow::Error::from)?;

            let count = table
                .get(key.as_str())
                .map_err(anyhow::Error::from)?
                .map(|v| v.value() as u32)
                .unwrap_or(0);

            if count + amount > limit {
                return Err(QuotaError::Exceeded {
                    kind: kind.to_string(),
                    limit,
                    count,
                });
            }

            table
                .insert(key.as_str(), (count + amount) as u64)
                .map_err(anyhow::Error::from)?;
            limit - (count + amount)
        };
        write_txn.commit().map_err(anyhow::Error::from)?;

        Ok(remaining)
    }

    fn limit_for(&self, account_id: i64, kind: &str) -> u32 {
        self.settings.settings_for(account_id).daily_limit(kind)
    }
}

fn counter_key(account_id: i64, kind: &str, day: NaiveDate) -> String {
    format!("{}:{}:{}", account_id, kind, day)
}

fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}
