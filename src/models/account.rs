use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

const DEFAULT_DAILY_LIMIT: u32 = 200;

/// How quickly an account is allowed to appear to act. Slower tiers draw
/// strictly longer pacing delays.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SpeedTier {
    Slow,
    Normal,
    Fast,
}

/// Per-account plan settings: pacing tier plus daily action limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSettings {
    pub speed: SpeedTier,
    /// Daily limit per action kind; kinds not listed fall back to the default.
    pub daily_limits: HashMap<String, u32>,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            speed: SpeedTier::Normal,
            daily_limits: HashMap::new(),
        }
    }
}

impl AccountSettings {
    pub fn daily_limit(&self, action_kind: &str) -> u32 {
        self.daily_limits
            .get(action_kind)
            .copied()
            .unwrap_or(DEFAULT_DAILY_LIMIT)
    }
}

/// Source of per-account settings. Implemented over whatever the billing/plan
/// surface persists; this core only reads.
pub trait SettingsProvider: Send + Sync {
    fn settings_for(&self, account_id: i64) -> AccountSettings;
}

/// Static provider backed by an in-memory map, used for wiring and tests.
#[derive(Default)]
pub struct StaticSettings {
    accounts: HashMap<i64, AccountSettings>,
}

impl StaticSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, account_id: i64, settings: AccountSettings) {
        self.accounts.insert(account_id, settings);
    }
}

impl SettingsProvider for StaticSettings {
    fn settings_for(&self, account_id: i64) -> AccountSettings {
        self.accounts.get(&account_id).cloned().unwrap_or_default()
    }
}

/// Time-bounded read-through cache over a settings provider. Explicitly owned
/// by the caller and refreshed on a fixed TTL, so there is no hidden
/// process-wide mutable state and tests stay deterministic.
pub struct CachedSettings<P> {
    inner: P,
    ttl: Duration,
    entries: RwLock<HashMap<i64, (Instant, AccountSettings)>>,
}

impl<P: SettingsProvider> CachedSettings<P> {
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<P: SettingsProvider> SettingsProvider for CachedSettings<P> {
    fn settings_for(&self, account_id: i64) -> AccountSettings {
        if let Ok(entries) = self.entries.read() {
            if let Some((loaded_at, settings)) = entries.get(&account_id) {
                if loaded_at.elapsed() < self.ttl {
                    return settings.clone();
                }
            }
        }

        let fresh = self.inner.settings_for(account_id);
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(account_id, (Instant::now(), fresh.clone()));
        }
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingProvider {
        calls: Arc<AtomicU32>,
    }

    impl SettingsProvider for CountingProvider {
        fn settings_for(&self, _account_id: i64) -> AccountSettings {
            self.calls.fetch_add(1, Ordering::SeqCst);
            AccountSettings::default()
        }
    }

    #[test]
    fn test_cached_settings_hits_provider_once_within_ttl() {
        let calls = Arc::new(AtomicU32::new(0));
        let cache = CachedSettings::new(
            CountingProvider {
                calls: calls.clone(),
            },
            Duration::from_secs(60),
        );

        cache.settings_for(1);
        cache.settings_for(1);
        cache.settings_for(1);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cached_settings_refreshes_after_ttl() {
        let calls = Arc::new(AtomicU32::new(0));
        let cache = CachedSettings::new(
            CountingProvider {
                calls: calls.clone(),
            },
            Duration::from_millis(0),
        );

        cache.settings_for(1);
        cache.settings_for(1);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_daily_limit_falls_back_to_default() {
        let mut settings = AccountSettings::default();
        settings.daily_limits.insert("like".to_string(), 50);

        assert_eq!(settings.daily_limit("like"), 50);
        assert_eq!(settings.daily_limit("follow"), DEFAULT_DAILY_LIMIT);
    }
}
