pub mod executor;
pub mod orchestrator;
pub mod pacing;
pub mod scheduler;

pub use executor::{ActiveJobs, JobExecutor, Worker};
pub use orchestrator::{CancelOutcome, TaskOrchestrator};
pub use pacing::{DelayRange, Humanizer};
pub use scheduler::{DynamicScheduler, TickReport};
