//! Primary metadata-store health monitor (§4.8.3): periodically probes the
//! primary and flips the engine's read-only state on transitions.

use crate::engine::Engine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    PrimaryUp,
    PrimaryDown,
    Stopped,
}

pub struct PrimaryMonitor {
    engine: Arc<Engine>,
    running: Arc<AtomicBool>,
    state: Mutex<MonitorState>,
    interval: Duration,
}

impl PrimaryMonitor {
    pub fn new(engine: Arc<Engine>, interval: Duration) -> Arc<Self> {
        Arc::new(PrimaryMonitor { engine, running: Arc::new(AtomicBool::new(false)), state: Mutex::new(MonitorState::PrimaryUp), interval })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> MonitorState {
        *self.state.lock().expect("monitor state mutex poisoned")
    }

    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::Relaxed);
        log::info!("primary monitor: started (interval={:?})", self.interval);
        let monitor = self.clone();
        thread::spawn(move || monitor.run_loop())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    fn run_loop(self: Arc<Self>) {
        while self.running.load(Ordering::Relaxed) {
            self.probe_once();

            let tick = Duration::from_millis(200);
            let mut waited = Duration::ZERO;
            while waited < self.interval && self.running.load(Ordering::Relaxed) {
                thread::sleep(tick.min(self.interval - waited));
                waited += tick;
            }
        }
        *self.state.lock().expect("monitor state mutex poisoned") = MonitorState::Stopped;
        log::info!("primary monitor: stopped");
    }

    /// Run a single probe; exposed separately from `run_loop` so callers
    /// and tests can drive it synchronously.
    pub fn probe_once(&self) {
        let healthy = self.engine.metadata().check_connection();
        let mut state = self.state.lock().expect("monitor state mutex poisoned");
        let was_down = *state == MonitorState::PrimaryDown;

        if healthy && was_down {
            self.engine.metadata().set_primary_available(true);
            *state = MonitorState::PrimaryUp;
            log::info!("primary monitor: primary metadata store recovered, resuming writes");
        } else if !healthy && !was_down {
            self.engine.metadata().set_primary_available(false);
            *state = MonitorState::PrimaryDown;
            log::warn!("primary monitor: primary metadata store unavailable, entering read-only mode");
        } else if healthy {
            *state = MonitorState::PrimaryUp;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_pool::ConnectionPool;
    use crate::metadata_store::{MetadataStore, SqlLikeMetadataStore};
    use crate::tenant::TenantRouter;

    fn test_engine() -> (tempfile::TempDir, Arc<Engine>) {
        let dir = tempfile::tempdir().unwrap();
        let metadata: Arc<dyn MetadataStore> = Arc::new(SqlLikeMetadataStore::new());
        let router = TenantRouter::new(dir.path().to_path_buf(), 1 << 20, 1.0, metadata.clone());
        let pool = ConnectionPool::new(4);
        (dir, Arc::new(Engine::new(router, metadata, pool, "host-1")))
    }

    #[test]
    fn probe_flips_read_only_state_on_transition() {
        let (_dir, engine) = test_engine();
        let monitor = PrimaryMonitor::new(engine.clone(), Duration::from_secs(30));

        engine.metadata().set_primary_available(false);
        monitor.probe_once();
        assert_eq!(monitor.state(), MonitorState::PrimaryDown);

        engine.metadata().set_primary_available(true);
        monitor.probe_once();
        assert_eq!(monitor.state(), MonitorState::PrimaryUp);
    }
}
