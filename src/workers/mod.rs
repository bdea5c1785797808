//! Background workers (component H): object-store synchroniser, file
//! culler, and primary metadata-store health monitor. Each runs on its own
//! OS thread with an `Arc<AtomicBool>` stop flag; `WorkerSupervisor` owns
//! all three handles and tears them down together.

pub mod culler;
pub mod monitor;
pub mod sync_worker;

use crate::engine::{Engine, SyncTask};
use culler::{CullStrategy, Culler};
use monitor::PrimaryMonitor;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use sync_worker::SyncWorker;

pub struct WorkerConfig {
    pub sync_retry_interval: Duration,
    pub sync_on_startup: bool,
    pub cull_period: Duration,
    pub cull_strategy: CullStrategy,
    pub cull_batch_size: usize,
    pub cull_usage_threshold_bytes: u64,
    pub monitor_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            sync_retry_interval: Duration::from_secs(30),
            sync_on_startup: true,
            cull_period: Duration::from_secs(300),
            cull_strategy: CullStrategy::Lru,
            cull_batch_size: 100,
            cull_usage_threshold_bytes: 1 << 30,
            monitor_interval: Duration::from_secs(10),
        }
    }
}

/// Owns the three background workers and their thread handles. Wires the
/// sync worker's enqueue channel into the engine before starting it, so
/// `Engine::put`/`restore_to_version`/etc. can push tasks straight onto the
/// sync queue instead of waiting for the periodic scan to find them.
pub struct WorkerSupervisor {
    sync_worker: Arc<SyncWorker>,
    culler: Arc<Culler>,
    monitor: Arc<PrimaryMonitor>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerSupervisor {
    pub fn start(engine: Arc<Engine>, config: WorkerConfig) -> Self {
        let (tx, rx) = mpsc::channel::<SyncTask>();
        engine.set_sync_sender(tx);

        let sync_worker = SyncWorker::new(engine.clone(), rx, config.sync_retry_interval, config.sync_on_startup);
        let culler = Culler::new(engine.clone(), config.cull_period, config.cull_strategy, config.cull_batch_size, config.cull_usage_threshold_bytes);
        let monitor = PrimaryMonitor::new(engine, config.monitor_interval);

        let handles = vec![sync_worker.start(), culler.start(), monitor.start()];
        log::info!("worker supervisor: all workers started");
        WorkerSupervisor { sync_worker, culler, monitor, handles }
    }

    pub fn sync_worker(&self) -> &Arc<SyncWorker> {
        &self.sync_worker
    }

    pub fn culler(&self) -> &Arc<Culler> {
        &self.culler
    }

    pub fn monitor(&self) -> &Arc<PrimaryMonitor> {
        &self.monitor
    }

    /// Signal all workers to stop and block until their threads exit. Each
    /// worker finishes its current pass before observing the stop flag.
    pub fn stop_and_join(mut self) {
        self.sync_worker.stop();
        self.culler.stop();
        self.monitor.stop();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        log::info!("worker supervisor: all workers stopped");
    }
}
