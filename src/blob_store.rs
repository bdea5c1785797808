//! Blob Stores (component C, C'): the local (mutable, evictable) tier and
//! the object-store (append-only) tier, keyed by `(uid, version_ts)`.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

/// Round-trip codec plugin seam (compression/encryption are out of scope;
/// only identity round-trip is required by the spec).
pub trait BlobCodec: Send + Sync {
    fn encode(&self, bytes: &[u8]) -> Vec<u8>;
    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>>;
}

/// No-op codec: the default when neither `ENCRYPT_DATA` nor
/// `COMPRESS_DATA` is configured.
pub struct IdentityCodec;

impl BlobCodec for IdentityCodec {
    fn encode(&self, bytes: &[u8]) -> Vec<u8> {
        bytes.to_vec()
    }
    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// Builds the deterministic key a blob is addressed by.
pub fn path_for(uid: Uuid, version_ts: &str) -> String {
    let hex = uid.simple().to_string();
    format!("{}/{}/{}/{}/{}/{}", &hex[0..2], &hex[2..4], &hex[4..6], hex, version_ts, "blob")
}

/// The local (warm) tier: a mutable, evictable filesystem cache of version
/// payloads rooted at `base/tenant/xx/yy/zz/uid/version_ts`.
pub struct LocalBlobStore {
    base: PathBuf,
    codec: Box<dyn BlobCodec>,
}

impl LocalBlobStore {
    pub fn new(base: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base).context("failed to create local blob store root")?;
        Ok(LocalBlobStore { base, codec: Box::new(IdentityCodec) })
    }

    pub fn with_codec(base: PathBuf, codec: Box<dyn BlobCodec>) -> Result<Self> {
        fs::create_dir_all(&base).context("failed to create local blob store root")?;
        Ok(LocalBlobStore { base, codec })
    }

    fn full_path(&self, tenant: &str, storage_path: &str) -> PathBuf {
        self.base.join(tenant).join(storage_path)
    }

    pub fn ensure_tenant(&self, tenant: &str) -> Result<()> {
        fs::create_dir_all(self.base.join(tenant)).context("failed to create tenant storage subtree")
    }

    pub fn path_for(&self, uid: Uuid, version_ts: &str, _tenant: &str) -> String {
        path_for(uid, version_ts)
    }

    pub fn put(&self, uid: Uuid, version_ts: &str, bytes: &[u8], tenant: &str) -> Result<String> {
        let storage_path = self.path_for(uid, version_ts, tenant);
        let full = self.full_path(tenant, &storage_path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).context("failed to create local blob directory")?;
        }
        fs::write(&full, self.codec.encode(bytes)).context("failed to write local blob")?;
        log::trace!("local blob store: wrote {} bytes at {}", bytes.len(), storage_path);
        Ok(storage_path)
    }

    pub fn get(&self, storage_path: &str, tenant: &str) -> Result<Vec<u8>> {
        let full = self.full_path(tenant, storage_path);
        let raw = fs::read(&full).with_context(|| format!("failed to read local blob {storage_path}"))?;
        self.codec.decode(&raw)
    }

    pub fn exists(&self, storage_path: &str, tenant: &str) -> bool {
        self.full_path(tenant, storage_path).is_file()
    }

    pub fn delete(&self, storage_path: &str, tenant: &str) -> Result<()> {
        let full = self.full_path(tenant, storage_path);
        if full.is_file() {
            fs::remove_file(&full).context("failed to delete local blob")?;
            log::debug!("local blob store: deleted {}", storage_path);
        }
        Ok(())
    }

    /// Total bytes currently occupied under `base`, used to derive the
    /// cache's `max_bytes` on startup.
    pub fn total_bytes(&self) -> u64 {
        walkdir::WalkDir::new(&self.base)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    /// Enumerate all `(tenant, uid, version_ts, storage_path)` tuples on
    /// disk, used by the sync worker's startup comprehensive scan.
    pub fn enumerate(&self) -> Vec<(String, Uuid, String, String)> {
        let mut out = Vec::new();
        for tenant_entry in walkdir::WalkDir::new(&self.base).min_depth(1).max_depth(1).into_iter().filter_map(|e| e.ok()) {
            if !tenant_entry.file_type().is_dir() {
                continue;
            }
            let tenant = tenant_entry.file_name().to_string_lossy().to_string();
            for entry in walkdir::WalkDir::new(tenant_entry.path()).min_depth(5).max_depth(6).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry.path().strip_prefix(tenant_entry.path()).unwrap_or(entry.path());
                let parts: Vec<_> = rel.components().map(|c| c.as_os_str().to_string_lossy().to_string()).collect();
                // xx/yy/zz/uid/version_ts/blob
                if parts.len() != 6 {
                    continue;
                }
                let uid_str = &parts[3];
                let Ok(uid) = Uuid::parse_str(uid_str) else { continue };
                let version_ts = parts[4].clone();
                let storage_path = rel.to_string_lossy().to_string();
                out.push((tenant.clone(), uid, version_ts, storage_path));
            }
        }
        out
    }
}

/// The remote (cold) tier: append-only, keyed `tenant/uid/version_ts`.
/// `put` is accepted only if the key is absent or byte-identical;
/// `delete` is always an error. The reference implementation stands in
/// for a real S3-compatible product the way the rest of this crate's
/// abstract stores do, behind the same contract.
pub struct RemoteBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    available: std::sync::atomic::AtomicBool,
}

impl RemoteBlobStore {
    pub fn new() -> Self {
        RemoteBlobStore { objects: Mutex::new(HashMap::new()), available: std::sync::atomic::AtomicBool::new(true) }
    }

    fn key(tenant: &str, storage_path: &str) -> String {
        format!("{tenant}/{storage_path}")
    }

    pub fn path_for(&self, uid: Uuid, version_ts: &str, _tenant: &str) -> String {
        path_for(uid, version_ts)
    }

    pub fn put(&self, storage_path: &str, bytes: &[u8], tenant: &str) -> Result<()> {
        let key = Self::key(tenant, storage_path);
        let mut objects = self.objects.lock().expect("remote blob store mutex poisoned");
        if let Some(existing) = objects.get(&key) {
            if blake3::hash(existing) != blake3::hash(bytes) {
                anyhow::bail!("object store is append-only: {key} already has different content");
            }
            return Ok(());
        }
        objects.insert(key, bytes.to_vec());
        Ok(())
    }

    pub fn get(&self, storage_path: &str, tenant: &str) -> Result<Vec<u8>> {
        let key = Self::key(tenant, storage_path);
        let objects = self.objects.lock().expect("remote blob store mutex poisoned");
        objects.get(&key).cloned().ok_or_else(|| anyhow::anyhow!("object {key} not found in remote store"))
    }

    pub fn exists(&self, storage_path: &str, tenant: &str) -> bool {
        let key = Self::key(tenant, storage_path);
        self.objects.lock().expect("remote blob store mutex poisoned").contains_key(&key)
    }

    pub fn delete(&self, _storage_path: &str, _tenant: &str) -> Result<()> {
        anyhow::bail!("remote blob store is append-only; delete is unsupported")
    }

    pub fn bucket_exists(&self) -> bool {
        self.available.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn initialize(&self) {
        self.available.store(true, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn ensure_prefix(&self, _tenant: &str) {
        // Best-effort: the in-process store has no bucket-level prefixes to create.
    }
}

impl Default for RemoteBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_blob_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().to_path_buf()).unwrap();
        let uid = Uuid::new_v4();
        let path = store.put(uid, "20260101_000000.000_0000", b"hello", "t1").unwrap();
        assert!(store.exists(&path, "t1"));
        assert_eq!(store.get(&path, "t1").unwrap(), b"hello");
        store.delete(&path, "t1").unwrap();
        assert!(!store.exists(&path, "t1"));
    }

    #[test]
    fn path_for_is_deterministic() {
        let uid = Uuid::new_v4();
        assert_eq!(path_for(uid, "ts1"), path_for(uid, "ts1"));
    }

    #[test]
    fn remote_blob_is_append_only() {
        let store = RemoteBlobStore::new();
        store.put("p", b"hello", "t1").unwrap();
        // identical payload: ok
        store.put("p", b"hello", "t1").unwrap();
        // different payload: error
        assert!(store.put("p", b"world", "t1").is_err());
        assert!(store.delete("p", "t1").is_err());
    }
}
