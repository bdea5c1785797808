//! Object-store synchroniser (§4.8.1): uploads local blobs the remote
//! store is missing, driven by an enqueue channel, a periodic scan, and a
//! one-time startup comprehensive scan.

use crate::engine::{Engine, SyncTask};
use crate::error::{EngineError, EngineResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Scanning,
    Uploading,
    Backoff,
    Stopped,
}

pub struct SyncWorker {
    engine: Arc<Engine>,
    rx: Mutex<Receiver<SyncTask>>,
    state: Mutex<SyncState>,
    running: Arc<AtomicBool>,
    sync_in_progress: AtomicBool,
    synced_count: AtomicU64,
    failed_count: AtomicU64,
    retry_interval: Duration,
    scan_on_startup: bool,
}

impl SyncWorker {
    pub fn new(engine: Arc<Engine>, rx: Receiver<SyncTask>, retry_interval: Duration, scan_on_startup: bool) -> Arc<Self> {
        Arc::new(SyncWorker {
            engine,
            rx: Mutex::new(rx),
            state: Mutex::new(SyncState::Idle),
            running: Arc::new(AtomicBool::new(false)),
            sync_in_progress: AtomicBool::new(false),
            synced_count: AtomicU64::new(0),
            failed_count: AtomicU64::new(0),
            retry_interval,
            scan_on_startup,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> SyncState {
        *self.state.lock().expect("sync worker state mutex poisoned")
    }

    pub fn counters(&self) -> (u64, u64) {
        (self.synced_count.load(Ordering::Relaxed), self.failed_count.load(Ordering::Relaxed))
    }

    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::Relaxed);
        log::info!("sync worker: started (retry_interval={:?})", self.retry_interval);
        let worker = self.clone();
        thread::spawn(move || worker.run_loop())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    fn run_loop(self: Arc<Self>) {
        if self.scan_on_startup {
            if let Err(e) = self.startup_scan() {
                log::warn!("sync worker: startup scan failed: {e}");
            }
        }

        while self.running.load(Ordering::Relaxed) {
            match self.perform_sync() {
                Ok((synced, failed)) if synced > 0 || failed > 0 => {
                    log::info!("sync worker: pass complete, synced={synced} failed={failed}");
                }
                Ok(_) => {}
                Err(EngineError::Busy(_)) => log::debug!("sync worker: pass already in flight, skipping"),
                Err(e) => log::error!("sync worker: pass failed: {e}"),
            }

            let deadline = Duration::from_millis(200);
            let mut waited = Duration::ZERO;
            while waited < self.retry_interval && self.running.load(Ordering::Relaxed) {
                thread::sleep(deadline.min(self.retry_interval - waited));
                waited += deadline;
            }
        }

        *self.state.lock().expect("sync worker state mutex poisoned") = SyncState::Stopped;
        log::info!("sync worker: stopped");
    }

    /// Union of (a) channel-enqueued tasks, (b) a periodic scan across all
    /// tenants for versions the remote store doesn't have yet. Only one
    /// pass runs at a time.
    pub fn perform_sync(&self) -> EngineResult<(u64, u64)> {
        if self.sync_in_progress.swap(true, Ordering::AcqRel) {
            return Err(EngineError::Busy("a sync pass is already in flight".to_string()));
        }
        let result = self.perform_sync_inner();
        self.sync_in_progress.store(false, Ordering::Release);
        result
    }

    fn perform_sync_inner(&self) -> EngineResult<(u64, u64)> {
        *self.state.lock().expect("sync worker state mutex poisoned") = SyncState::Scanning;

        let mut tasks: Vec<SyncTask> = Vec::new();
        {
            let rx = self.rx.lock().expect("sync worker channel mutex poisoned");
            loop {
                match rx.recv_timeout(Duration::from_millis(0)) {
                    Ok(task) => tasks.push(task),
                    Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }

        for tenant in self.engine.list_tenants() {
            let Ok(bundle) = self.engine.resolve_tenant(&tenant) else { continue };
            if !bundle.remote.bucket_exists() {
                bundle.remote.initialize();
                log::warn!("sync worker: remote store unavailable for tenant {tenant}, skipping periodic scan this cycle");
                continue;
            }
            let Ok(files) = self.engine.metadata().list_all(&tenant) else { continue };
            for file in files.into_iter().filter(|f| !f.deleted) {
                let Ok(versions) = self.engine.metadata().list_versions(&tenant, file.uid) else { continue };
                for version in versions {
                    if !bundle.remote.exists(&version.storage_path, &tenant) {
                        tasks.push(SyncTask { tenant: tenant.clone(), uid: file.uid, version_ts: version.version_ts });
                    }
                }
            }
        }

        *self.state.lock().expect("sync worker state mutex poisoned") = SyncState::Uploading;
        let mut synced = 0u64;
        let mut failed = 0u64;
        for task in tasks {
            match self.sync_one(&task) {
                Ok(()) => {
                    synced += 1;
                    self.synced_count.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    failed += 1;
                    self.failed_count.fetch_add(1, Ordering::Relaxed);
                    log::warn!("sync worker: failed to sync {}/{} in tenant {}: {e}", task.uid, task.version_ts, task.tenant);
                    *self.state.lock().expect("sync worker state mutex poisoned") = SyncState::Backoff;
                }
            }
        }

        *self.state.lock().expect("sync worker state mutex poisoned") = SyncState::Idle;
        Ok((synced, failed))
    }

    fn sync_one(&self, task: &SyncTask) -> EngineResult<()> {
        let bundle = self.engine.resolve_tenant(&task.tenant)?;
        let storage_path = self.engine.metadata().get_storage_path(&task.tenant, task.uid, &task.version_ts)?;
        let bytes = bundle.local.get(&storage_path, &task.tenant).map_err(|e| EngineError::Io(e.to_string()))?;
        bundle.remote.put(&storage_path, &bytes, &task.tenant).map_err(|e| EngineError::Io(e.to_string()))?;
        Ok(())
    }

    /// Enumerate the local blob store for every tenant once at startup,
    /// enqueuing anything missing from the remote store.
    fn startup_scan(&self) -> EngineResult<()> {
        for tenant in self.engine.list_tenants() {
            let Ok(bundle) = self.engine.resolve_tenant(&tenant) else { continue };
            for (entry_tenant, uid, version_ts, storage_path) in bundle.local.enumerate() {
                if entry_tenant != tenant {
                    continue;
                }
                if !bundle.remote.exists(&storage_path, &tenant) {
                    if let Err(e) = self.sync_one(&SyncTask { tenant: tenant.clone(), uid, version_ts: version_ts.clone() }) {
                        log::warn!("sync worker: startup scan failed to sync {uid}/{version_ts}: {e}");
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_pool::ConnectionPool;
    use crate::metadata_store::{MetadataStore, SqlLikeMetadataStore};
    use crate::tenant::TenantRouter;
    use std::sync::mpsc;

    fn test_engine() -> (tempfile::TempDir, Arc<Engine>) {
        let dir = tempfile::tempdir().unwrap();
        let metadata: Arc<dyn MetadataStore> = Arc::new(SqlLikeMetadataStore::new());
        let router = TenantRouter::new(dir.path().to_path_buf(), 1 << 20, 1.0, metadata.clone());
        let pool = ConnectionPool::new(4);
        (dir, Arc::new(Engine::new(router, metadata, pool, "host-1")))
    }

    #[test]
    fn perform_sync_uploads_enqueued_task() {
        let (_dir, engine) = test_engine();
        let roles = vec![];
        let uid = engine.touch("", crate::ids::ROOT_UID, "doc.txt", "alice", &roles).unwrap();
        let version_ts = engine.put("", uid, b"payload".to_vec(), "alice", &roles).unwrap();

        let (tx, rx) = mpsc::channel();
        tx.send(SyncTask { tenant: "default".to_string(), uid, version_ts: version_ts.clone() }).unwrap();

        let worker = SyncWorker::new(engine.clone(), rx, Duration::from_secs(60), false);
        let (synced, failed) = worker.perform_sync().unwrap();
        assert_eq!(synced, 1);
        assert_eq!(failed, 0);

        let bundle = engine.resolve_tenant("").unwrap();
        let storage_path = engine.metadata().get_storage_path("default", uid, &version_ts).unwrap();
        assert!(bundle.remote.exists(&storage_path, "default"));
    }

    #[test]
    fn concurrent_sync_pass_is_rejected_as_busy() {
        let (_dir, engine) = test_engine();
        let (_tx, rx) = mpsc::channel::<SyncTask>();
        let worker = SyncWorker::new(engine, rx, Duration::from_secs(60), false);
        worker.sync_in_progress.store(true, Ordering::SeqCst);
        assert!(matches!(worker.perform_sync(), Err(EngineError::Busy(_))));
    }
}
