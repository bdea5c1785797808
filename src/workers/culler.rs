//! File culler (§4.8.2): periodically evicts local blobs that are cold
//! (per host-local access statistics) and already safely replicated to the
//! remote store, to keep local disk usage under a threshold.

use crate::engine::Engine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullerState {
    Idle,
    Gathering,
    Deleting,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullStrategy {
    Lru,
    Lfu,
}

pub struct Culler {
    engine: Arc<Engine>,
    running: Arc<AtomicBool>,
    state: Mutex<CullerState>,
    period: Duration,
    strategy: CullStrategy,
    batch_size: usize,
    usage_threshold_bytes: u64,
}

impl Culler {
    pub fn new(engine: Arc<Engine>, period: Duration, strategy: CullStrategy, batch_size: usize, usage_threshold_bytes: u64) -> Arc<Self> {
        Arc::new(Culler { engine, running: Arc::new(AtomicBool::new(false)), state: Mutex::new(CullerState::Idle), period, strategy, batch_size, usage_threshold_bytes })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> CullerState {
        *self.state.lock().expect("culler state mutex poisoned")
    }

    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::Relaxed);
        log::info!("culler: started (period={:?}, strategy={:?}, batch={})", self.period, self.strategy, self.batch_size);
        let culler = self.clone();
        thread::spawn(move || culler.run_loop())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    fn run_loop(self: Arc<Self>) {
        while self.running.load(Ordering::Relaxed) {
            match self.perform_cull() {
                Ok(n) if n > 0 => log::info!("culler: reclaimed {n} local blobs"),
                Ok(_) => {}
                Err(e) => log::error!("culler: pass failed: {e}"),
            }

            let tick = Duration::from_millis(200);
            let mut waited = Duration::ZERO;
            while waited < self.period && self.running.load(Ordering::Relaxed) {
                thread::sleep(tick.min(self.period - waited));
                waited += tick;
            }
        }
        *self.state.lock().expect("culler state mutex poisoned") = CullerState::Stopped;
        log::info!("culler: stopped");
    }

    /// Run one gather-then-delete pass across all tenants. Returns the
    /// number of blobs reclaimed.
    pub fn perform_cull(&self) -> anyhow::Result<usize> {
        *self.state.lock().expect("culler state mutex poisoned") = CullerState::Gathering;

        let mut total_local_bytes = 0u64;
        for tenant in self.engine.list_tenants() {
            if let Ok(bundle) = self.engine.resolve_tenant(&tenant) {
                total_local_bytes += bundle.local.total_bytes();
            }
        }
        if total_local_bytes < self.usage_threshold_bytes {
            *self.state.lock().expect("culler state mutex poisoned") = CullerState::Idle;
            return Ok(0);
        }

        let host = self.engine.host_id().to_string();
        let candidates = match self.strategy {
            CullStrategy::Lru => self.engine.metadata().least_accessed(&host, self.batch_size),
            CullStrategy::Lfu => {
                let mut rows = self.engine.metadata().infrequently_accessed(&host, 0);
                rows.sort_by_key(|(_, stat)| stat.access_count);
                rows.truncate(self.batch_size);
                rows
            }
        };

        *self.state.lock().expect("culler state mutex poisoned") = CullerState::Deleting;
        let mut reclaimed = 0;
        for (uid, _stat) in candidates {
            for tenant in self.engine.list_tenants() {
                let Ok(file) = self.engine.metadata().get_by_uid(&tenant, uid, false) else { continue };
                let Some(ts) = &file.current_version else { continue };
                let Ok(storage_path) = self.engine.metadata().get_storage_path(&tenant, uid, ts) else { continue };
                let Ok(bundle) = self.engine.resolve_tenant(&tenant) else { continue };

                if !bundle.local.exists(&storage_path, &tenant) {
                    continue;
                }
                if !bundle.remote.exists(&storage_path, &tenant) {
                    log::debug!("culler: skipping {uid} in tenant {tenant}, not yet replicated");
                    continue;
                }
                bundle.local.delete(&storage_path, &tenant)?;
                bundle.cache.remove(&storage_path);
                reclaimed += 1;
                log::debug!("culler: reclaimed {uid}@{ts} in tenant {tenant}");
            }
        }

        *self.state.lock().expect("culler state mutex poisoned") = CullerState::Idle;
        Ok(reclaimed)
    }
}
