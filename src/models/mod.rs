pub mod account;
pub mod event;
pub mod job;
pub mod schedule;

pub use account::{AccountSettings, CachedSettings, SettingsProvider, SpeedTier, StaticSettings};
pub use event::JobEvent;
pub use job::{Job, JobStatus};
pub use schedule::RecurringSchedule;
