use crate::models::SpeedTier;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;

// Baseline think-delay for action kinds without a configured profile, and
// per-character typing time. Values are the "fast" tier in milliseconds;
// slower tiers scale up from these.
const DEFAULT_ACTION_MS: (u64, u64) = (800, 2_500);
const TYPING_CHAR_MS: (u64, u64) = (90, 240);

/// Inclusive delay bounds in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        debug_assert!(min_ms <= max_ms);
        Self { min_ms, max_ms }
    }
}

/// Randomized delay generator simulating human response timing.
///
/// Stateless: every call is an independent uniform draw over the range for
/// the (action kind, speed tier) pair. Tier ranges are derived from a base
/// "fast" range per action kind so that the slow tier's minimum bound is
/// always at or above the fast tier's maximum bound — the ordering is an
/// invariant of the derivation, not a statistical accident.
pub struct Humanizer {
    profiles: HashMap<String, DelayRange>,
    default_action: DelayRange,
    typing_char: DelayRange,
}

impl Humanizer {
    pub fn new() -> Self {
        Self {
            profiles: HashMap::new(),
            default_action: DelayRange::new(DEFAULT_ACTION_MS.0, DEFAULT_ACTION_MS.1),
            typing_char: DelayRange::new(TYPING_CHAR_MS.0, TYPING_CHAR_MS.1),
        }
    }

    /// Override the base (fast-tier) range for one action kind.
    pub fn set_profile(&mut self, action_kind: impl Into<String>, range: DelayRange) {
        self.profiles.insert(action_kind.into(), range);
    }

    /// The effective range for an (action kind, tier) pair.
    pub fn range_for(&self, action_kind: &str, tier: SpeedTier) -> DelayRange {
        let base = self
            .profiles
            .get(action_kind)
            .copied()
            .unwrap_or(self.default_action);
        scale_for_tier(base, tier)
    }

    /// Think-delay before acting on one target.
    pub fn delay_for(&self, action_kind: &str, tier: SpeedTier) -> Duration {
        draw(self.range_for(action_kind, tier))
    }

    /// Typing-simulation delay for composing a message of `message_len`
    /// characters: one per-character draw scaled by the message length.
    pub fn typing_delay_for(&self, message_len: usize, tier: SpeedTier) -> Duration {
        let per_char = draw(scale_for_tier(self.typing_char, tier));
        per_char * message_len.max(1) as u32
    }
}

impl Default for Humanizer {
    fn default() -> Self {
        Self::new()
    }
}

// Fast uses the base range as-is; normal starts where fast ends; slow starts
// at twice the fast maximum. Keeps slow.min >= fast.max by construction.
fn scale_for_tier(base: DelayRange, tier: SpeedTier) -> DelayRange {
    match tier {
        SpeedTier::Fast => base,
        SpeedTier::Normal => DelayRange::new(base.max_ms, base.max_ms * 2),
        SpeedTier::Slow => DelayRange::new(base.max_ms * 2, base.max_ms * 4),
    }
}

fn draw(range: DelayRange) -> Duration {
    let ms = rand::rng().random_range(range.min_ms..=range.max_ms);
    Duration::from_millis(ms)
}
