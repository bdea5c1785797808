//! Namespace & Version Engine (component G): the public operation surface.
//! Every operation resolves its tenant (F), checks ACLs (E), transacts
//! against the metadata store (B), and for payload operations touches the
//! cache/blob tiers (D/C/C'), in that order.
//!
//! Operations share the shape (resolve tenant → check ACL → transact →
//! post-I/O → enqueue); `dispatch` factors that shape out as a small
//! pipeline combinator rather than per-operation copies. This is
//! deliberately not virtual dispatch over a trait object per operation.

use crate::acl;
use crate::blob_store::path_for as blob_path_for;
use crate::connection_pool::ConnectionPool;
use crate::domain::{permission, AclEntry, File, FileInfo, FileType, MetadataEntry, PrincipalType, Version};
use crate::error::{EngineError, EngineResult};
use crate::ids::{new_uid, new_version_ts, ROOT_UID};
use crate::metadata_store::MetadataStore;
use crate::tenant::{TenantBundle, TenantRouter};
use chrono::Utc;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// One `(tenant, uid, version_ts)` the sync worker should push to the
/// remote blob store.
#[derive(Debug, Clone)]
pub struct SyncTask {
    pub tenant: String,
    pub uid: Uuid,
    pub version_ts: String,
}

pub struct Engine {
    tenant_router: TenantRouter,
    metadata: Arc<dyn MetadataStore>,
    conn_pool: ConnectionPool,
    conn_timeout: Duration,
    host_id: String,
    sync_tx: Mutex<Option<Sender<SyncTask>>>,
}

impl Engine {
    pub fn new(tenant_router: TenantRouter, metadata: Arc<dyn MetadataStore>, conn_pool: ConnectionPool, host_id: impl Into<String>) -> Self {
        Engine { tenant_router, metadata, conn_pool, conn_timeout: Duration::from_secs(5), host_id: host_id.into(), sync_tx: Mutex::new(None) }
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Resolve a tenant's storage/cache bundle, provisioning it if this is
    /// its first use. Exposed so background workers can reach the blob
    /// stores without the engine owning worker logic itself.
    pub fn resolve_tenant(&self, tenant_id: &str) -> EngineResult<Arc<TenantBundle>> {
        self.tenant_router.resolve(tenant_id)
    }

    pub fn list_tenants(&self) -> Vec<String> {
        self.tenant_router.list()
    }

    pub fn set_sync_sender(&self, tx: Sender<SyncTask>) {
        *self.sync_tx.lock().expect("engine sync sender mutex poisoned") = Some(tx);
    }

    fn enqueue_sync(&self, tenant: &str, uid: Uuid, version_ts: &str) {
        let guard = self.sync_tx.lock().expect("engine sync sender mutex poisoned");
        if let Some(tx) = guard.as_ref() {
            let task = SyncTask { tenant: tenant.to_string(), uid, version_ts: version_ts.to_string() };
            if tx.send(task).is_err() {
                log::warn!("engine: sync worker channel closed, dropping enqueue for {uid}/{version_ts}");
            }
        }
    }

    fn check_acl(&self, tenant: &str, resource: Uuid, user: &str, roles: &[String], required: u32) -> EngineResult<()> {
        let rows = self.metadata.get_acls_for_resource(tenant, resource)?;
        if acl::check_permission(resource, user, roles, required, &rows) {
            Ok(())
        } else {
            Err(EngineError::Denied(format!("{user} lacks required permission on {resource}")))
        }
    }

    /// Resolve tenant, acquire a connection permit, run the caller-supplied
    /// ACL check, then the caller-supplied transaction body.
    fn dispatch<T>(
        &self,
        tenant_id: &str,
        acl_check: impl FnOnce(&Self, &str) -> EngineResult<()>,
        body: impl FnOnce(&Self, &str, Arc<TenantBundle>) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let bundle = self.tenant_router.resolve(tenant_id)?;
        let tenant = if tenant_id.is_empty() { "default" } else { tenant_id };
        let _permit = self.conn_pool.acquire(self.conn_timeout).ok_or_else(|| EngineError::Busy("connection pool exhausted".to_string()))?;
        acl_check(self, tenant)?;
        body(self, tenant, bundle)
    }

    // ---- namespace operations -------------------------------------------------

    pub fn mkdir(&self, tenant_id: &str, parent: Uuid, name: &str, user: &str, roles: &[String], mode: u32) -> EngineResult<Uuid> {
        self.dispatch(
            tenant_id,
            |this, tenant| this.check_acl(tenant, parent, user, roles, permission::WRITE),
            |this, tenant, _bundle| {
                let parent_rows = this.metadata.get_acls_for_resource(tenant, parent)?;
                let uid = new_uid();
                let now = Utc::now();
                this.metadata.insert_file(
                    tenant,
                    File {
                        uid,
                        name: name.to_string(),
                        parent_uid: parent,
                        file_type: FileType::Directory,
                        owner: user.to_string(),
                        mode_bits: mode,
                        current_version: None,
                        created_at: now,
                        modified_at: now,
                        deleted: false,
                        deleted_at: None,
                    },
                )?;
                for row in acl::inherited_acls(&parent_rows, uid) {
                    this.metadata.add_acl(tenant, row)?;
                }
                for row in acl::default_acls(uid, user) {
                    this.metadata.add_acl(tenant, row)?;
                }
                log::debug!("engine: mkdir {name} under {parent} in tenant {tenant} -> {uid}");
                Ok(uid)
            },
        )
    }

    pub fn rmdir(&self, tenant_id: &str, uid: Uuid, user: &str, roles: &[String]) -> EngineResult<()> {
        self.dispatch(
            tenant_id,
            |this, tenant| this.check_acl(tenant, uid, user, roles, permission::DELETE),
            |this, tenant, _bundle| {
                this.metadata.soft_delete(tenant, uid)?;
                log::debug!("engine: rmdir {uid} in tenant {tenant}");
                Ok(())
            },
        )
    }

    pub fn listdir(&self, tenant_id: &str, uid: Uuid, user: &str, roles: &[String]) -> EngineResult<Vec<FileInfo>> {
        self.listdir_impl(tenant_id, uid, user, roles, false)
    }

    pub fn listdir_with_deleted(&self, tenant_id: &str, uid: Uuid, user: &str, roles: &[String]) -> EngineResult<Vec<FileInfo>> {
        self.listdir_impl(tenant_id, uid, user, roles, true)
    }

    fn listdir_impl(&self, tenant_id: &str, uid: Uuid, user: &str, roles: &[String], include_deleted: bool) -> EngineResult<Vec<FileInfo>> {
        let required = if include_deleted { permission::LIST_DELETED } else { permission::READ };
        self.dispatch(
            tenant_id,
            move |this, tenant| this.check_acl(tenant, uid, user, roles, required),
            move |this, tenant, _bundle| {
                let children = this.metadata.list_children(tenant, uid, include_deleted)?;
                children.into_iter().map(|f| this.to_file_info(tenant, f)).collect()
            },
        )
    }

    fn to_file_info(&self, tenant: &str, file: File) -> EngineResult<FileInfo> {
        let size = self.metadata.get_file_size(tenant, file.uid).unwrap_or(0);
        Ok(FileInfo {
            uid: file.uid,
            name: file.name,
            parent_uid: file.parent_uid,
            file_type: file.file_type,
            size,
            owner: file.owner,
            mode_bits: file.mode_bits,
            current_version: file.current_version,
            created_at: file.created_at,
            modified_at: file.modified_at,
            deleted: file.deleted,
        })
    }

    pub fn touch(&self, tenant_id: &str, parent: Uuid, name: &str, user: &str, roles: &[String]) -> EngineResult<Uuid> {
        self.dispatch(
            tenant_id,
            |this, tenant| this.check_acl(tenant, parent, user, roles, permission::WRITE),
            |this, tenant, _bundle| {
                let parent_rows = this.metadata.get_acls_for_resource(tenant, parent)?;
                let uid = new_uid();
                let now = Utc::now();
                this.metadata.insert_file(
                    tenant,
                    File {
                        uid,
                        name: name.to_string(),
                        parent_uid: parent,
                        file_type: FileType::RegularFile,
                        owner: user.to_string(),
                        mode_bits: 0o644,
                        current_version: None,
                        created_at: now,
                        modified_at: now,
                        deleted: false,
                        deleted_at: None,
                    },
                )?;
                for row in acl::inherited_acls(&parent_rows, uid) {
                    this.metadata.add_acl(tenant, row)?;
                }
                for row in acl::default_acls(uid, user) {
                    this.metadata.add_acl(tenant, row)?;
                }
                Ok(uid)
            },
        )
    }

    pub fn remove(&self, tenant_id: &str, uid: Uuid, user: &str, roles: &[String]) -> EngineResult<()> {
        self.dispatch(
            tenant_id,
            |this, tenant| this.check_acl(tenant, uid, user, roles, permission::DELETE),
            |this, tenant, _bundle| {
                this.metadata.soft_delete(tenant, uid)?;
                Ok(())
            },
        )
    }

    pub fn undelete(&self, tenant_id: &str, uid: Uuid, user: &str, roles: &[String]) -> EngineResult<()> {
        self.dispatch(
            tenant_id,
            |this, tenant| this.check_acl(tenant, uid, user, roles, permission::UNDELETE),
            |this, tenant, _bundle| {
                this.metadata.undelete(tenant, uid)?;
                Ok(())
            },
        )
    }

    pub fn put(&self, tenant_id: &str, uid: Uuid, bytes: Vec<u8>, user: &str, roles: &[String]) -> EngineResult<String> {
        self.dispatch(
            tenant_id,
            |this, tenant| this.check_acl(tenant, uid, user, roles, permission::WRITE),
            move |this, tenant, bundle| {
                this.metadata.get_by_uid(tenant, uid, false)?;
                let version_ts = new_version_ts();
                let storage_path = bundle.local.put(uid, &version_ts, &bytes, tenant).map_err(|e| EngineError::Io(e.to_string()))?;
                this.metadata.append_version(tenant, uid, &version_ts, bytes.len() as u64, &storage_path)?;
                this.metadata.update_current_version(tenant, uid, &version_ts)?;
                bundle.cache.put(storage_path, bytes, tenant.to_string())?;
                this.metadata.touch_access(uid, &this.host_id);
                this.enqueue_sync(tenant, uid, &version_ts);
                log::debug!("engine: put {uid}@{version_ts} in tenant {tenant}");
                Ok(version_ts)
            },
        )
    }

    pub fn get(&self, tenant_id: &str, uid: Uuid, user: &str, roles: &[String]) -> EngineResult<Arc<Vec<u8>>> {
        self.dispatch(
            tenant_id,
            |this, tenant| this.check_acl(tenant, uid, user, roles, permission::READ),
            move |this, tenant, bundle| {
                let file = this.metadata.get_by_uid(tenant, uid, false)?;
                let version_ts = file.current_version.ok_or_else(|| EngineError::NoVersion(uid.to_string()))?;
                let bytes = this.fetch_version(tenant, &bundle, uid, &version_ts)?;
                this.metadata.touch_access(uid, &this.host_id);
                Ok(bytes)
            },
        )
    }

    fn fetch_version(&self, tenant: &str, bundle: &TenantBundle, uid: Uuid, version_ts: &str) -> EngineResult<Arc<Vec<u8>>> {
        let storage_path = self.metadata.get_storage_path(tenant, uid, version_ts)?;
        bundle.cache.fetch_if_missing(uid, version_ts, &storage_path, tenant, &bundle.local, &bundle.remote)
    }

    pub fn stat(&self, tenant_id: &str, uid: Uuid, user: &str, roles: &[String]) -> EngineResult<FileInfo> {
        self.dispatch(
            tenant_id,
            |this, tenant| this.check_acl(tenant, uid, user, roles, permission::READ),
            move |this, tenant, _bundle| {
                let file = this.metadata.get_by_uid(tenant, uid, false)?;
                this.to_file_info(tenant, file)
            },
        )
    }

    pub fn exists(&self, tenant_id: &str, uid: Uuid) -> bool {
        if uid == ROOT_UID {
            return true;
        }
        let tenant = if tenant_id.is_empty() { "default" } else { tenant_id };
        if !self.tenant_router.exists(tenant) {
            return false;
        }
        self.metadata.get_by_uid(tenant, uid, false).is_ok()
    }

    pub fn rename(&self, tenant_id: &str, uid: Uuid, new_name: &str, user: &str, roles: &[String]) -> EngineResult<()> {
        self.dispatch(
            tenant_id,
            |this, tenant| this.check_acl(tenant, uid, user, roles, permission::WRITE),
            |this, tenant, _bundle| {
                this.metadata.update_name(tenant, uid, new_name)?;
                Ok(())
            },
        )
    }

    fn is_ancestor(&self, tenant: &str, ancestor: Uuid, descendant: Uuid) -> EngineResult<bool> {
        let mut current = descendant;
        loop {
            if current == ancestor {
                return Ok(true);
            }
            if current == ROOT_UID {
                return Ok(false);
            }
            let file = self.metadata.get_by_uid(tenant, current, true)?;
            if file.parent_uid == current {
                return Ok(false);
            }
            current = file.parent_uid;
        }
    }

    pub fn move_file(&self, tenant_id: &str, src: Uuid, dst_parent: Uuid, user: &str, roles: &[String]) -> EngineResult<()> {
        self.dispatch(
            tenant_id,
            |this, tenant| {
                this.check_acl(tenant, src, user, roles, permission::WRITE)?;
                this.check_acl(tenant, dst_parent, user, roles, permission::WRITE)
            },
            move |this, tenant, _bundle| {
                if this.is_ancestor(tenant, src, dst_parent)? {
                    return Err(EngineError::Cycle(src.to_string(), dst_parent.to_string()));
                }
                this.metadata.update_parent(tenant, src, dst_parent)?;
                Ok(())
            },
        )
    }

    pub fn copy(&self, tenant_id: &str, src: Uuid, dst_parent: Uuid, user: &str, roles: &[String]) -> EngineResult<Uuid> {
        self.dispatch(
            tenant_id,
            |this, tenant| {
                this.check_acl(tenant, src, user, roles, permission::READ)?;
                this.check_acl(tenant, dst_parent, user, roles, permission::WRITE)
            },
            move |this, tenant, bundle| this.copy_recursive(tenant, &bundle, src, dst_parent, user),
        )
    }

    fn copy_recursive(&self, tenant: &str, bundle: &TenantBundle, src: Uuid, dst_parent: Uuid, user: &str) -> EngineResult<Uuid> {
        let source = self.metadata.get_by_uid(tenant, src, false)?;
        let dst_parent_rows = self.metadata.get_acls_for_resource(tenant, dst_parent)?;
        let new_uid_val = new_uid();
        let now = Utc::now();

        self.metadata.insert_file(
            tenant,
            File {
                uid: new_uid_val,
                name: source.name.clone(),
                parent_uid: dst_parent,
                file_type: source.file_type,
                owner: user.to_string(),
                mode_bits: source.mode_bits,
                current_version: None,
                created_at: now,
                modified_at: now,
                deleted: false,
                deleted_at: None,
            },
        )?;
        for row in acl::inherited_acls(&dst_parent_rows, new_uid_val) {
            self.metadata.add_acl(tenant, row)?;
        }

        match source.file_type {
            FileType::Directory => {
                for child in self.metadata.list_children(tenant, src, false)? {
                    self.copy_recursive(tenant, bundle, child.uid, new_uid_val, user)?;
                }
            }
            _ => {
                if let Some(ts) = &source.current_version {
                    let bytes = self.fetch_version(tenant, bundle, src, ts)?;
                    let new_ts = new_version_ts();
                    let storage_path =
                        bundle.local.put(new_uid_val, &new_ts, &bytes, tenant).map_err(|e| EngineError::Io(e.to_string()))?;
                    self.metadata.append_version(tenant, new_uid_val, &new_ts, bytes.len() as u64, &storage_path)?;
                    self.metadata.update_current_version(tenant, new_uid_val, &new_ts)?;
                    bundle.cache.put(storage_path, bytes.as_ref().clone(), tenant.to_string())?;
                    for entry in self.metadata.get_all_metadata(tenant, src, ts)? {
                        self.metadata.set_metadata(tenant, new_uid_val, &new_ts, &entry.key, &entry.value)?;
                    }
                    self.enqueue_sync(tenant, new_uid_val, &new_ts);
                }
            }
        }

        Ok(new_uid_val)
    }

    pub fn list_versions(&self, tenant_id: &str, uid: Uuid, user: &str, roles: &[String]) -> EngineResult<Vec<Version>> {
        self.dispatch(
            tenant_id,
            |this, tenant| this.check_acl(tenant, uid, user, roles, permission::VIEW_VERSIONS),
            |this, tenant, _bundle| this.metadata.list_versions(tenant, uid),
        )
    }

    pub fn get_version(&self, tenant_id: &str, uid: Uuid, version_ts: &str, user: &str, roles: &[String]) -> EngineResult<Arc<Vec<u8>>> {
        self.dispatch(
            tenant_id,
            |this, tenant| this.check_acl(tenant, uid, user, roles, permission::RETRIEVE_BACK_VERSION),
            move |this, tenant, bundle| this.fetch_version(tenant, &bundle, uid, version_ts),
        )
    }

    pub fn restore_to_version(&self, tenant_id: &str, uid: Uuid, version_ts: &str, user: &str, roles: &[String]) -> EngineResult<String> {
        self.dispatch(
            tenant_id,
            |this, tenant| this.check_acl(tenant, uid, user, roles, permission::RESTORE_TO_VERSION),
            move |this, tenant, _bundle| {
                let new_ts = new_version_ts();
                this.metadata.restore_to_version(tenant, uid, version_ts, &new_ts)?;
                this.enqueue_sync(tenant, uid, &new_ts);
                Ok(new_ts)
            },
        )
    }

    pub fn set_metadata(&self, tenant_id: &str, uid: Uuid, key: &str, value: &str, user: &str, roles: &[String]) -> EngineResult<()> {
        self.dispatch(
            tenant_id,
            |this, tenant| this.check_acl(tenant, uid, user, roles, permission::WRITE),
            move |this, tenant, _bundle| {
                let file = this.metadata.get_by_uid(tenant, uid, false)?;
                let ts = file.current_version.ok_or_else(|| EngineError::NoVersion(uid.to_string()))?;
                this.metadata.set_metadata(tenant, uid, &ts, key, value)
            },
        )
    }

    pub fn get_metadata(&self, tenant_id: &str, uid: Uuid, key: &str, user: &str, roles: &[String]) -> EngineResult<Option<String>> {
        self.dispatch(
            tenant_id,
            |this, tenant| this.check_acl(tenant, uid, user, roles, permission::READ),
            move |this, tenant, _bundle| {
                let file = this.metadata.get_by_uid(tenant, uid, false)?;
                let ts = file.current_version.ok_or_else(|| EngineError::NoVersion(uid.to_string()))?;
                this.metadata.get_metadata(tenant, uid, &ts, key)
            },
        )
    }

    pub fn get_all_metadata(&self, tenant_id: &str, uid: Uuid, user: &str, roles: &[String]) -> EngineResult<Vec<MetadataEntry>> {
        self.dispatch(
            tenant_id,
            |this, tenant| this.check_acl(tenant, uid, user, roles, permission::READ),
            move |this, tenant, _bundle| {
                let file = this.metadata.get_by_uid(tenant, uid, false)?;
                let ts = file.current_version.ok_or_else(|| EngineError::NoVersion(uid.to_string()))?;
                this.metadata.get_all_metadata(tenant, uid, &ts)
            },
        )
    }

    pub fn delete_metadata(&self, tenant_id: &str, uid: Uuid, key: &str, user: &str, roles: &[String]) -> EngineResult<()> {
        self.dispatch(
            tenant_id,
            |this, tenant| this.check_acl(tenant, uid, user, roles, permission::WRITE),
            move |this, tenant, _bundle| {
                let file = this.metadata.get_by_uid(tenant, uid, false)?;
                let ts = file.current_version.ok_or_else(|| EngineError::NoVersion(uid.to_string()))?;
                this.metadata.delete_metadata(tenant, uid, &ts, key)
            },
        )
    }

    pub fn grant_permission(&self, tenant_id: &str, resource: Uuid, principal: &str, principal_type: PrincipalType, bits: u32, user: &str, roles: &[String]) -> EngineResult<()> {
        self.dispatch(
            tenant_id,
            |this, tenant| this.check_acl(tenant, resource, user, roles, permission::WRITE),
            move |this, tenant, _bundle| this.metadata.add_acl(tenant, AclEntry { resource_uid: resource, principal: principal.to_string(), principal_type, permissions: bits }),
        )
    }

    pub fn revoke_permission(&self, tenant_id: &str, resource: Uuid, principal: &str, principal_type: PrincipalType, bits: u32, user: &str, roles: &[String]) -> EngineResult<()> {
        self.dispatch(
            tenant_id,
            |this, tenant| this.check_acl(tenant, resource, user, roles, permission::WRITE),
            move |this, tenant, _bundle| this.metadata.remove_acl(tenant, resource, principal, principal_type, bits),
        )
    }

    pub fn check_permission(&self, tenant_id: &str, resource: Uuid, user: &str, roles: &[String], required: u32) -> EngineResult<bool> {
        let tenant = if tenant_id.is_empty() { "default" } else { tenant_id };
        let rows = self.metadata.get_acls_for_resource(tenant, resource)?;
        Ok(acl::check_permission(resource, user, roles, required, &rows))
    }

    // ---- administrative operations ---------------------------------------

    /// Enqueue every version of `uid` for upload, regardless of whether the
    /// sync worker's own scans would already find them.
    pub fn backup_to_object_store(&self, tenant_id: &str, uid: Uuid, user: &str, roles: &[String]) -> EngineResult<usize> {
        self.dispatch(
            tenant_id,
            |this, tenant| this.check_acl(tenant, uid, user, roles, permission::READ),
            move |this, tenant, _bundle| {
                let versions = this.metadata.list_versions(tenant, uid)?;
                let count = versions.len();
                for version in versions {
                    this.enqueue_sync(tenant, uid, &version.version_ts);
                }
                Ok(count)
            },
        )
    }

    /// Remove versions strictly older than the `keep_count` most recent
    /// **and** already present in the remote store; never the current
    /// version, never a version that is its sole copy anywhere.
    pub fn purge_old_versions(&self, tenant_id: &str, uid: Uuid, keep_count: usize, user: &str, roles: &[String]) -> EngineResult<usize> {
        self.dispatch(
            tenant_id,
            |this, tenant| this.check_acl(tenant, uid, user, roles, permission::DELETE),
            move |this, tenant, bundle| {
                let file = this.metadata.get_by_uid(tenant, uid, true)?;
                let mut versions = this.metadata.list_versions(tenant, uid)?;
                versions.sort_by(|a, b| b.version_ts.cmp(&a.version_ts));
                let candidates = versions.into_iter().skip(keep_count);

                let mut purged = 0;
                for version in candidates {
                    if Some(&version.version_ts) == file.current_version.as_ref() {
                        continue;
                    }
                    if !bundle.remote.exists(&version.storage_path, tenant) {
                        continue;
                    }
                    bundle.local.delete(&version.storage_path, tenant).map_err(|e| EngineError::Io(e.to_string()))?;
                    bundle.cache.remove(&version.storage_path);
                    purged += 1;
                    log::debug!("engine: purged {uid}@{} in tenant {tenant}", version.version_ts);
                }
                Ok(purged)
            },
        )
    }

    /// Derive a file's full path by walking `parent_uid` to ROOT; `path` is
    /// never stored.
    pub fn resolve_path(&self, tenant_id: &str, uid: Uuid) -> EngineResult<String> {
        let tenant = if tenant_id.is_empty() { "default" } else { tenant_id };
        let mut segments = Vec::new();
        let mut current = uid;
        loop {
            if current == ROOT_UID {
                break;
            }
            let file = self.metadata.get_by_uid(tenant, current, true)?;
            segments.push(file.name.clone());
            if file.parent_uid == current {
                break;
            }
            current = file.parent_uid;
        }
        segments.reverse();
        Ok(format!("/{}", segments.join("/")))
    }

    pub fn storage_path_for(&self, uid: Uuid, version_ts: &str) -> String {
        blob_path_for(uid, version_ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata_store::SqlLikeMetadataStore;
    use crate::tenant::TenantRouter;

    fn test_engine() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let metadata: Arc<dyn MetadataStore> = Arc::new(SqlLikeMetadataStore::new());
        let router = TenantRouter::new(dir.path().to_path_buf(), 1 << 20, 1.0, metadata.clone());
        let pool = ConnectionPool::new(4);
        (dir, Engine::new(router, metadata, pool, "host-1"))
    }

    #[test]
    fn put_then_get_round_trips_bytes() {
        let (_dir, engine) = test_engine();
        let roles = vec![];
        let uid = engine.touch("", ROOT_UID, "doc.txt", "alice", &roles).unwrap();
        engine.put("", uid, b"hello world".to_vec(), "alice", &roles).unwrap();
        let bytes = engine.get("", uid, "alice", &roles).unwrap();
        assert_eq!(bytes.as_slice(), b"hello world");
    }

    #[test]
    fn write_without_permission_is_denied() {
        let (_dir, engine) = test_engine();
        let roles = vec![];
        let uid = engine.touch("", ROOT_UID, "doc.txt", "alice", &roles).unwrap();
        let err = engine.put("", uid, b"nope".to_vec(), "mallory", &roles).unwrap_err();
        assert!(matches!(err, EngineError::Denied(_)));
    }

    #[test]
    fn rename_conflict_is_rejected() {
        let (_dir, engine) = test_engine();
        let roles = vec![];
        engine.touch("", ROOT_UID, "a.txt", "alice", &roles).unwrap();
        let b = engine.touch("", ROOT_UID, "b.txt", "alice", &roles).unwrap();
        let err = engine.rename("", b, "a.txt", "alice", &roles).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[test]
    fn restore_to_version_then_get_matches_get_version() {
        let (_dir, engine) = test_engine();
        let roles = vec![];
        let uid = engine.touch("", ROOT_UID, "doc.txt", "alice", &roles).unwrap();
        let v1 = engine.put("", uid, b"version one".to_vec(), "alice", &roles).unwrap();
        engine.put("", uid, b"version two".to_vec(), "alice", &roles).unwrap();

        engine.restore_to_version("", uid, &v1, "alice", &roles).unwrap();
        let current = engine.get("", uid, "alice", &roles).unwrap();
        let historic = engine.get_version("", uid, &v1, "alice", &roles).unwrap();
        assert_eq!(current.as_slice(), historic.as_slice());
        assert_eq!(current.as_slice(), b"version one");
    }

    #[test]
    fn move_into_own_subtree_is_a_cycle() {
        let (_dir, engine) = test_engine();
        let roles = vec![];
        let parent = engine.mkdir("", ROOT_UID, "parent", "alice", &roles, 0o755).unwrap();
        let child = engine.mkdir("", parent, "child", "alice", &roles, 0o755).unwrap();
        let err = engine.move_file("", parent, child, "alice", &roles).unwrap_err();
        assert!(matches!(err, EngineError::Cycle(_, _)));
    }

    #[test]
    fn read_only_mode_rejects_mutations() {
        let (_dir, engine) = test_engine();
        let roles = vec![];
        engine.metadata().set_primary_available(false);
        let err = engine.touch("", ROOT_UID, "doc.txt", "alice", &roles).unwrap_err();
        assert!(matches!(err, EngineError::ReadOnly));
    }

    #[test]
    fn copy_directory_is_recursive_and_independent() {
        let (_dir, engine) = test_engine();
        let roles = vec![];
        let src_dir = engine.mkdir("", ROOT_UID, "src", "alice", &roles, 0o755).unwrap();
        let dst_dir = engine.mkdir("", ROOT_UID, "dst", "alice", &roles, 0o755).unwrap();
        let file = engine.touch("", src_dir, "leaf.txt", "alice", &roles).unwrap();
        engine.put("", file, b"payload".to_vec(), "alice", &roles).unwrap();

        let copied_dir = engine.copy("", src_dir, dst_dir, "alice", &roles).unwrap();
        let children = engine.listdir("", copied_dir, "alice", &roles).unwrap();
        assert_eq!(children.len(), 1);
        let copied_bytes = engine.get("", children[0].uid, "alice", &roles).unwrap();
        assert_eq!(copied_bytes.as_slice(), b"payload");
        assert_ne!(children[0].uid, file);
    }

    #[test]
    fn revoke_clears_only_the_revoked_bits() {
        let (_dir, engine) = test_engine();
        let roles = vec![];
        let file = engine.touch("", ROOT_UID, "doc.txt", "alice", &roles).unwrap();
        engine.grant_permission("", file, "bob", PrincipalType::User, permission::READ | permission::WRITE, "alice", &roles).unwrap();
        assert!(engine.check_permission("", file, "bob", &roles, permission::WRITE).unwrap());

        engine.revoke_permission("", file, "bob", PrincipalType::User, permission::WRITE, "alice", &roles).unwrap();
        assert!(engine.check_permission("", file, "bob", &roles, permission::READ).unwrap());
        assert!(!engine.check_permission("", file, "bob", &roles, permission::WRITE).unwrap());
    }

    #[test]
    fn revoking_all_granted_bits_removes_the_acl_row() {
        let (_dir, engine) = test_engine();
        let roles = vec![];
        let file = engine.touch("", ROOT_UID, "doc.txt", "alice", &roles).unwrap();
        engine.grant_permission("", file, "bob", PrincipalType::User, permission::READ, "alice", &roles).unwrap();
        engine.revoke_permission("", file, "bob", PrincipalType::User, permission::READ, "alice", &roles).unwrap();
        assert!(!engine.check_permission("", file, "bob", &roles, permission::READ).unwrap());
    }
}
