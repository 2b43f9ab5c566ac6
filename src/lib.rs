pub mod engine;
pub mod error;
pub mod events;
pub mod models;
pub mod ops;
pub mod remote;
pub mod storage;

pub use models::*;

use engine::executor::{ActiveJobs, JobExecutor, Worker};
use engine::orchestrator::TaskOrchestrator;
use engine::pacing::Humanizer;
use engine::scheduler::DynamicScheduler;
use events::bus::{EventBus, InMemoryBus};
use events::connections::{ConnectionManager, spawn_relay};
use events::emitter::JobEventEmitter;
use ops::OperationRegistry;
use storage::{Broker, RedbBroker, Storage};

use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Install the default log subscriber, for embedding hosts that do not bring
/// their own. The filter comes from `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

const DEFAULT_NUM_WORKERS: usize = 2;
const DEFAULT_SCHEDULER_INTERVAL: Duration = Duration::from_secs(30);
// Claims older than this are treated as orphans of a dead worker.
const STALLED_CLAIM_TIMEOUT_SECS: i64 = 300;

/// Fully wired automation core: storage, queue, workers, scheduler, and the
/// event fan-out. Shared between embedding hosts (server, desktop shell);
/// construct once, `start()` once, then drive it through `orchestrator` and
/// `connections`.
pub struct AutomationCore {
    pub storage: Arc<Storage>,
    pub orchestrator: Arc<TaskOrchestrator>,
    pub connections: Arc<ConnectionManager>,
    pub bus: Arc<dyn EventBus>,
    broker: Arc<dyn Broker>,
    executor: Arc<JobExecutor>,
    num_workers: usize,
    scheduler_interval: Duration,
    running: Arc<Mutex<bool>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AutomationCore {
    pub fn new(
        db_path: impl AsRef<Path>,
        settings: Arc<dyn SettingsProvider>,
        registry: OperationRegistry,
        humanizer: Humanizer,
    ) -> anyhow::Result<Self> {
        let storage = Arc::new(Storage::new(db_path, settings.clone())?);
        let broker: Arc<dyn Broker> = Arc::new(RedbBroker::new(storage.get_db())?);
        let registry = Arc::new(registry);

        let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
        let emitter = JobEventEmitter::new(bus.clone());
        let connections = Arc::new(ConnectionManager::new());

        let active: ActiveJobs = Arc::new(DashMap::new());
        let executor = Arc::new(JobExecutor::new(
            storage.clone(),
            registry.clone(),
            Arc::new(humanizer),
            emitter,
            settings,
            active.clone(),
        ));
        let orchestrator = Arc::new(TaskOrchestrator::new(
            storage.clone(),
            broker.clone(),
            registry,
            active,
        ));

        Ok(Self {
            storage,
            orchestrator,
            connections,
            bus,
            broker,
            executor,
            num_workers: DEFAULT_NUM_WORKERS,
            scheduler_interval: DEFAULT_SCHEDULER_INTERVAL,
            running: Arc::new(Mutex::new(false)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers.max(1);
        self
    }

    pub fn with_scheduler_interval(mut self, interval: Duration) -> Self {
        self.scheduler_interval = interval;
        self
    }

    /// Recover orphaned queue claims, then spawn the worker pool, the
    /// schedule reconciler, and the bus-to-observer relay. Idempotent.
    pub async fn start(&self) {
        {
            let mut running = self.running.lock().await;
            if *running {
                warn!("Core already started");
                return;
            }
            *running = true;
        }

        match self.broker.recover_stalled(STALLED_CLAIM_TIMEOUT_SECS) {
            Ok(0) => {}
            Ok(recovered) => info!(recovered, "Requeued stalled execution requests"),
            Err(error) => warn!(error = %error, "Stalled-claim recovery failed"),
        }

        let mut tasks = self.tasks.lock().await;

        for worker_id in 0..self.num_workers {
            let worker = Worker::new(
                worker_id,
                self.broker.clone(),
                self.executor.clone(),
                self.running.clone(),
            );
            tasks.push(tokio::spawn(async move {
                worker.run_worker_loop().await;
            }));
        }

        let scheduler = DynamicScheduler::new(
            self.storage.clone(),
            self.orchestrator.clone(),
            self.scheduler_interval,
        );
        tasks.push(tokio::spawn(scheduler.run()));

        tasks.push(spawn_relay(self.bus.clone(), self.connections.clone()));

        info!(workers = self.num_workers, "Automation core started");
    }

    /// Stop the worker pool and background tasks. In-flight jobs are not
    /// interrupted here; their claims are picked up by stalled-claim
    /// recovery on the next start if the process dies mid-run.
    pub async fn stop(&self) {
        *self.running.lock().await = false;
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        info!("Automation core stopped");
    }
}
