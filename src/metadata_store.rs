//! Metadata Store (component B): transactional persistence of files,
//! versions, metadata key/value pairs, ACL rows and access statistics,
//! schema-per-tenant. `SqlLikeMetadataStore` stands in for a real RDBMS the
//! way `PersistedBTree` stands in for a real index structure elsewhere in
//! this crate.

use crate::domain::{AccessStat, AclEntry, File, FileType, MetadataEntry, PrincipalType, Version};
use crate::error::{EngineError, EngineResult};
use crate::ids::ROOT_UID;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct TenantTables {
    files: HashMap<Uuid, File>,
    versions: HashMap<(Uuid, String), Version>,
    metadata: HashMap<(Uuid, String, String), String>,
    acls: HashMap<(Uuid, String, PrincipalType), AclEntry>,
}

impl TenantTables {
    fn with_root() -> Self {
        let mut t = TenantTables::default();
        t.files.insert(ROOT_UID, File::new_root());
        t
    }
}

/// Everything the Namespace & Version Engine needs from durable storage.
/// A single mutation call is one transaction; failures are hard errors, not
/// silently retried.
pub trait MetadataStore: Send + Sync {
    fn insert_file(&self, tenant: &str, file: File) -> EngineResult<()>;
    fn get_by_uid(&self, tenant: &str, uid: Uuid, include_deleted: bool) -> EngineResult<File>;
    fn get_by_name_and_parent(&self, tenant: &str, parent_uid: Uuid, name: &str, include_deleted: bool) -> EngineResult<Option<File>>;
    fn update_name(&self, tenant: &str, uid: Uuid, name: &str) -> EngineResult<()>;
    fn update_parent(&self, tenant: &str, uid: Uuid, parent_uid: Uuid) -> EngineResult<()>;
    fn update_modified(&self, tenant: &str, uid: Uuid) -> EngineResult<()>;
    fn update_current_version(&self, tenant: &str, uid: Uuid, version_ts: &str) -> EngineResult<()>;
    fn soft_delete(&self, tenant: &str, uid: Uuid) -> EngineResult<()>;
    fn undelete(&self, tenant: &str, uid: Uuid) -> EngineResult<()>;
    fn list_children(&self, tenant: &str, parent_uid: Uuid, include_deleted: bool) -> EngineResult<Vec<File>>;
    fn list_all(&self, tenant: &str) -> EngineResult<Vec<File>>;
    fn get_file_size(&self, tenant: &str, uid: Uuid) -> EngineResult<u64>;
    fn get_directory_size(&self, tenant: &str, uid: Uuid) -> EngineResult<u64>;

    fn append_version(&self, tenant: &str, file_uid: Uuid, version_ts: &str, size: u64, storage_path: &str) -> EngineResult<()>;
    fn get_storage_path(&self, tenant: &str, file_uid: Uuid, version_ts: &str) -> EngineResult<String>;
    fn list_versions(&self, tenant: &str, file_uid: Uuid) -> EngineResult<Vec<Version>>;
    fn restore_to_version(&self, tenant: &str, file_uid: Uuid, version_ts: &str, new_version_ts: &str) -> EngineResult<()>;

    fn set_metadata(&self, tenant: &str, file_uid: Uuid, version_ts: &str, key: &str, value: &str) -> EngineResult<()>;
    fn get_metadata(&self, tenant: &str, file_uid: Uuid, version_ts: &str, key: &str) -> EngineResult<Option<String>>;
    fn get_all_metadata(&self, tenant: &str, file_uid: Uuid, version_ts: &str) -> EngineResult<Vec<MetadataEntry>>;
    fn delete_metadata(&self, tenant: &str, file_uid: Uuid, version_ts: &str, key: &str) -> EngineResult<()>;

    fn add_acl(&self, tenant: &str, entry: AclEntry) -> EngineResult<()>;
    fn remove_acl(&self, tenant: &str, resource_uid: Uuid, principal: &str, principal_type: PrincipalType, bits: u32) -> EngineResult<()>;
    fn get_acls_for_resource(&self, tenant: &str, resource_uid: Uuid) -> EngineResult<Vec<AclEntry>>;
    fn get_user_acls(&self, tenant: &str, principal: &str) -> EngineResult<Vec<AclEntry>>;

    fn touch_access(&self, file_uid: Uuid, host: &str);
    fn least_accessed(&self, host: &str, limit: usize) -> Vec<(Uuid, AccessStat)>;
    fn infrequently_accessed(&self, host: &str, older_than_secs: i64) -> Vec<(Uuid, AccessStat)>;

    fn create_tenant_schema(&self, tenant: &str) -> EngineResult<()>;
    fn tenant_exists(&self, tenant: &str) -> bool;
    fn cleanup_tenant_data(&self, tenant: &str) -> EngineResult<()>;
    fn list_tenants(&self) -> Vec<String>;

    fn check_connection(&self) -> bool;
    fn set_primary_available(&self, available: bool);
}

/// In-process, multi-tenant-schema-simulating implementation. One coarse
/// lock guards all tables for all tenants, matching the `Mutex`-per-
/// structure discipline already used elsewhere in this crate; a real
/// deployment swaps this for per-tenant-schema Postgres connections behind
/// the same trait.
pub struct SqlLikeMetadataStore {
    tenants: Mutex<HashMap<String, TenantTables>>,
    access_stats: Mutex<HashMap<(Uuid, String), AccessStat>>,
    primary_available: AtomicBool,
}

impl SqlLikeMetadataStore {
    pub fn new() -> Self {
        let mut tenants = HashMap::new();
        tenants.insert("default".to_string(), TenantTables::with_root());
        SqlLikeMetadataStore { tenants: Mutex::new(tenants), access_stats: Mutex::new(HashMap::new()), primary_available: AtomicBool::new(true) }
    }

    fn require_primary(&self) -> EngineResult<()> {
        if !self.primary_available.load(Ordering::SeqCst) {
            return Err(EngineError::ReadOnly);
        }
        Ok(())
    }

    fn with_tenant<R>(&self, tenant: &str, f: impl FnOnce(&mut TenantTables) -> EngineResult<R>) -> EngineResult<R> {
        let mut tenants = self.tenants.lock().expect("metadata store mutex poisoned");
        let table = tenants.get_mut(tenant).ok_or_else(|| EngineError::NotFound(format!("tenant {tenant} does not exist")))?;
        f(table)
    }
}

impl Default for SqlLikeMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataStore for SqlLikeMetadataStore {
    fn insert_file(&self, tenant: &str, file: File) -> EngineResult<()> {
        self.require_primary()?;
        self.with_tenant(tenant, |t| {
            let clash = t.files.values().any(|f| !f.deleted && f.parent_uid == file.parent_uid && f.name == file.name);
            if clash {
                return Err(EngineError::Conflict(format!("{} already exists under parent {}", file.name, file.parent_uid)));
            }
            t.files.insert(file.uid, file);
            Ok(())
        })
    }

    fn get_by_uid(&self, tenant: &str, uid: Uuid, include_deleted: bool) -> EngineResult<File> {
        self.with_tenant(tenant, |t| {
            t.files
                .get(&uid)
                .filter(|f| include_deleted || !f.deleted)
                .cloned()
                .ok_or_else(|| EngineError::NotFound(uid.to_string()))
        })
    }

    fn get_by_name_and_parent(&self, tenant: &str, parent_uid: Uuid, name: &str, include_deleted: bool) -> EngineResult<Option<File>> {
        self.with_tenant(tenant, |t| {
            Ok(t.files.values().find(|f| f.parent_uid == parent_uid && f.name == name && (include_deleted || !f.deleted)).cloned())
        })
    }

    fn update_name(&self, tenant: &str, uid: Uuid, name: &str) -> EngineResult<()> {
        self.require_primary()?;
        self.with_tenant(tenant, |t| {
            let parent_uid = t.files.get(&uid).ok_or_else(|| EngineError::NotFound(uid.to_string()))?.parent_uid;
            let clash = t.files.values().any(|f| f.uid != uid && !f.deleted && f.parent_uid == parent_uid && f.name == name);
            if clash {
                return Err(EngineError::Conflict(format!("{name} already exists under parent {parent_uid}")));
            }
            let file = t.files.get_mut(&uid).ok_or_else(|| EngineError::NotFound(uid.to_string()))?;
            file.name = name.to_string();
            file.modified_at = Utc::now();
            Ok(())
        })
    }

    fn update_parent(&self, tenant: &str, uid: Uuid, parent_uid: Uuid) -> EngineResult<()> {
        self.require_primary()?;
        self.with_tenant(tenant, |t| {
            let name = t.files.get(&uid).ok_or_else(|| EngineError::NotFound(uid.to_string()))?.name.clone();
            let clash = t.files.values().any(|f| f.uid != uid && !f.deleted && f.parent_uid == parent_uid && f.name == name);
            if clash {
                return Err(EngineError::Conflict(format!("{name} already exists under parent {parent_uid}")));
            }
            let file = t.files.get_mut(&uid).ok_or_else(|| EngineError::NotFound(uid.to_string()))?;
            file.parent_uid = parent_uid;
            file.modified_at = Utc::now();
            Ok(())
        })
    }

    fn update_modified(&self, tenant: &str, uid: Uuid) -> EngineResult<()> {
        self.require_primary()?;
        self.with_tenant(tenant, |t| {
            let file = t.files.get_mut(&uid).ok_or_else(|| EngineError::NotFound(uid.to_string()))?;
            file.modified_at = Utc::now();
            Ok(())
        })
    }

    fn update_current_version(&self, tenant: &str, uid: Uuid, version_ts: &str) -> EngineResult<()> {
        self.require_primary()?;
        self.with_tenant(tenant, |t| {
            if !t.versions.contains_key(&(uid, version_ts.to_string())) {
                return Err(EngineError::NoSuchVersion(uid.to_string(), version_ts.to_string()));
            }
            let file = t.files.get_mut(&uid).ok_or_else(|| EngineError::NotFound(uid.to_string()))?;
            file.current_version = Some(version_ts.to_string());
            file.modified_at = Utc::now();
            Ok(())
        })
    }

    fn soft_delete(&self, tenant: &str, uid: Uuid) -> EngineResult<()> {
        self.require_primary()?;
        self.with_tenant(tenant, |t| {
            let file = t.files.get_mut(&uid).ok_or_else(|| EngineError::NotFound(uid.to_string()))?;
            file.deleted = true;
            file.deleted_at = Some(Utc::now());
            Ok(())
        })
    }

    fn undelete(&self, tenant: &str, uid: Uuid) -> EngineResult<()> {
        self.require_primary()?;
        self.with_tenant(tenant, |t| {
            let (parent_uid, name) = {
                let file = t.files.get(&uid).ok_or_else(|| EngineError::NotFound(uid.to_string()))?;
                (file.parent_uid, file.name.clone())
            };
            let clash = t.files.values().any(|f| f.uid != uid && !f.deleted && f.parent_uid == parent_uid && f.name == name);
            if clash {
                return Err(EngineError::Conflict(format!("{name} already exists under parent {parent_uid}")));
            }
            let file = t.files.get_mut(&uid).ok_or_else(|| EngineError::NotFound(uid.to_string()))?;
            file.deleted = false;
            file.deleted_at = None;
            Ok(())
        })
    }

    fn list_children(&self, tenant: &str, parent_uid: Uuid, include_deleted: bool) -> EngineResult<Vec<File>> {
        self.with_tenant(tenant, |t| Ok(t.files.values().filter(|f| f.parent_uid == parent_uid && f.uid != parent_uid && (include_deleted || !f.deleted)).cloned().collect()))
    }

    fn list_all(&self, tenant: &str) -> EngineResult<Vec<File>> {
        self.with_tenant(tenant, |t| Ok(t.files.values().cloned().collect()))
    }

    fn get_file_size(&self, tenant: &str, uid: Uuid) -> EngineResult<u64> {
        self.with_tenant(tenant, |t| {
            let file = t.files.get(&uid).ok_or_else(|| EngineError::NotFound(uid.to_string()))?;
            let Some(ts) = &file.current_version else { return Ok(0) };
            Ok(t.versions.get(&(uid, ts.clone())).map(|v| v.size).unwrap_or(0))
        })
    }

    fn get_directory_size(&self, tenant: &str, uid: Uuid) -> EngineResult<u64> {
        self.with_tenant(tenant, |t| {
            fn sum(t: &TenantTables, uid: Uuid) -> u64 {
                t.files
                    .values()
                    .filter(|f| f.parent_uid == uid && f.uid != uid && !f.deleted)
                    .map(|f| match f.file_type {
                        FileType::Directory => sum(t, f.uid),
                        _ => f.current_version.as_ref().and_then(|ts| t.versions.get(&(f.uid, ts.clone()))).map(|v| v.size).unwrap_or(0),
                    })
                    .sum()
            }
            Ok(sum(t, uid))
        })
    }

    fn append_version(&self, tenant: &str, file_uid: Uuid, version_ts: &str, size: u64, storage_path: &str) -> EngineResult<()> {
        self.require_primary()?;
        self.with_tenant(tenant, |t| {
            if !t.files.contains_key(&file_uid) {
                return Err(EngineError::NotFound(file_uid.to_string()));
            }
            t.versions.insert(
                (file_uid, version_ts.to_string()),
                Version { file_uid, version_ts: version_ts.to_string(), size, storage_path: storage_path.to_string(), created_at: Utc::now() },
            );
            Ok(())
        })
    }

    fn get_storage_path(&self, tenant: &str, file_uid: Uuid, version_ts: &str) -> EngineResult<String> {
        self.with_tenant(tenant, |t| {
            t.versions
                .get(&(file_uid, version_ts.to_string()))
                .map(|v| v.storage_path.clone())
                .ok_or_else(|| EngineError::NoSuchVersion(file_uid.to_string(), version_ts.to_string()))
        })
    }

    fn list_versions(&self, tenant: &str, file_uid: Uuid) -> EngineResult<Vec<Version>> {
        self.with_tenant(tenant, |t| {
            let mut versions: Vec<Version> = t.versions.values().filter(|v| v.file_uid == file_uid).cloned().collect();
            versions.sort_by(|a, b| b.version_ts.cmp(&a.version_ts));
            Ok(versions)
        })
    }

    fn restore_to_version(&self, tenant: &str, file_uid: Uuid, version_ts: &str, new_version_ts: &str) -> EngineResult<()> {
        self.require_primary()?;
        self.with_tenant(tenant, |t| {
            let restored = t
                .versions
                .get(&(file_uid, version_ts.to_string()))
                .cloned()
                .ok_or_else(|| EngineError::NoSuchVersion(file_uid.to_string(), version_ts.to_string()))?;
            t.versions.insert(
                (file_uid, new_version_ts.to_string()),
                Version { file_uid, version_ts: new_version_ts.to_string(), size: restored.size, storage_path: restored.storage_path, created_at: Utc::now() },
            );
            let file = t.files.get_mut(&file_uid).ok_or_else(|| EngineError::NotFound(file_uid.to_string()))?;
            file.current_version = Some(new_version_ts.to_string());
            file.modified_at = Utc::now();
            Ok(())
        })
    }

    fn set_metadata(&self, tenant: &str, file_uid: Uuid, version_ts: &str, key: &str, value: &str) -> EngineResult<()> {
        self.require_primary()?;
        self.with_tenant(tenant, |t| {
            t.metadata.insert((file_uid, version_ts.to_string(), key.to_string()), value.to_string());
            Ok(())
        })
    }

    fn get_metadata(&self, tenant: &str, file_uid: Uuid, version_ts: &str, key: &str) -> EngineResult<Option<String>> {
        self.with_tenant(tenant, |t| Ok(t.metadata.get(&(file_uid, version_ts.to_string(), key.to_string())).cloned()))
    }

    fn get_all_metadata(&self, tenant: &str, file_uid: Uuid, version_ts: &str) -> EngineResult<Vec<MetadataEntry>> {
        self.with_tenant(tenant, |t| {
            Ok(t.metadata
                .iter()
                .filter(|((uid, ts, _), _)| *uid == file_uid && ts == version_ts)
                .map(|((uid, ts, key), value)| MetadataEntry { file_uid: *uid, version_ts: ts.clone(), key: key.clone(), value: value.clone() })
                .collect())
        })
    }

    fn delete_metadata(&self, tenant: &str, file_uid: Uuid, version_ts: &str, key: &str) -> EngineResult<()> {
        self.require_primary()?;
        self.with_tenant(tenant, |t| {
            t.metadata.remove(&(file_uid, version_ts.to_string(), key.to_string()));
            Ok(())
        })
    }

    fn add_acl(&self, tenant: &str, entry: AclEntry) -> EngineResult<()> {
        self.require_primary()?;
        self.with_tenant(tenant, |t| {
            let key = (entry.resource_uid, entry.principal.clone(), entry.principal_type);
            match t.acls.get_mut(&key) {
                Some(existing) => existing.permissions = crate::acl::merge_grant(Some(existing.permissions), entry.permissions),
                None => {
                    t.acls.insert(key, entry);
                }
            }
            Ok(())
        })
    }

    fn remove_acl(&self, tenant: &str, resource_uid: Uuid, principal: &str, principal_type: PrincipalType, bits: u32) -> EngineResult<()> {
        self.require_primary()?;
        self.with_tenant(tenant, |t| {
            let key = (resource_uid, principal.to_string(), principal_type);
            if let Some(existing) = t.acls.get_mut(&key) {
                let remaining = crate::acl::apply_revoke(existing.permissions, bits);
                if remaining == 0 {
                    t.acls.remove(&key);
                } else {
                    existing.permissions = remaining;
                }
            }
            Ok(())
        })
    }

    fn get_acls_for_resource(&self, tenant: &str, resource_uid: Uuid) -> EngineResult<Vec<AclEntry>> {
        self.with_tenant(tenant, |t| Ok(t.acls.values().filter(|a| a.resource_uid == resource_uid).cloned().collect()))
    }

    fn get_user_acls(&self, tenant: &str, principal: &str) -> EngineResult<Vec<AclEntry>> {
        self.with_tenant(tenant, |t| Ok(t.acls.values().filter(|a| a.principal == principal).cloned().collect()))
    }

    fn touch_access(&self, file_uid: Uuid, host: &str) {
        let mut stats = self.access_stats.lock().expect("access stats mutex poisoned");
        let entry = stats.entry((file_uid, host.to_string())).or_default();
        entry.last_accessed = Utc::now().timestamp();
        entry.access_count += 1;
    }

    fn least_accessed(&self, host: &str, limit: usize) -> Vec<(Uuid, AccessStat)> {
        let stats = self.access_stats.lock().expect("access stats mutex poisoned");
        let mut rows: Vec<(Uuid, AccessStat)> = stats.iter().filter(|((_, h), _)| h == host).map(|((uid, _), s)| (*uid, s.clone())).collect();
        rows.sort_by_key(|(_, s)| s.last_accessed);
        rows.truncate(limit);
        rows
    }

    fn infrequently_accessed(&self, host: &str, older_than_secs: i64) -> Vec<(Uuid, AccessStat)> {
        let cutoff = Utc::now().timestamp() - older_than_secs;
        let stats = self.access_stats.lock().expect("access stats mutex poisoned");
        stats.iter().filter(|((_, h), s)| h == host && s.last_accessed < cutoff).map(|((uid, _), s)| (*uid, s.clone())).collect()
    }

    fn create_tenant_schema(&self, tenant: &str) -> EngineResult<()> {
        let mut tenants = self.tenants.lock().expect("metadata store mutex poisoned");
        tenants.entry(tenant.to_string()).or_insert_with(TenantTables::with_root);
        log::debug!("metadata store: provisioned schema for tenant {tenant}");
        Ok(())
    }

    fn tenant_exists(&self, tenant: &str) -> bool {
        self.tenants.lock().expect("metadata store mutex poisoned").contains_key(tenant)
    }

    fn cleanup_tenant_data(&self, tenant: &str) -> EngineResult<()> {
        self.tenants.lock().expect("metadata store mutex poisoned").remove(tenant);
        log::warn!("metadata store: dropped all data for tenant {tenant}");
        Ok(())
    }

    fn list_tenants(&self) -> Vec<String> {
        self.tenants.lock().expect("metadata store mutex poisoned").keys().cloned().collect()
    }

    fn check_connection(&self) -> bool {
        self.primary_available.load(Ordering::SeqCst)
    }

    fn set_primary_available(&self, available: bool) {
        self.primary_available.store(available, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FileType;

    fn new_file(name: &str, parent_uid: Uuid) -> File {
        let now = Utc::now();
        File {
            uid: Uuid::new_v4(),
            name: name.to_string(),
            parent_uid,
            file_type: FileType::RegularFile,
            owner: "alice".to_string(),
            mode_bits: 0o644,
            current_version: None,
            created_at: now,
            modified_at: now,
            deleted: false,
            deleted_at: None,
        }
    }

    #[test]
    fn duplicate_name_under_same_parent_is_rejected() {
        let store = SqlLikeMetadataStore::new();
        let a = new_file("report.txt", ROOT_UID);
        let mut b = new_file("report.txt", ROOT_UID);
        b.uid = Uuid::new_v4();
        store.insert_file("default", a).unwrap();
        let err = store.insert_file("default", b).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[test]
    fn read_only_mode_rejects_writes_but_not_reads() {
        let store = SqlLikeMetadataStore::new();
        let file = new_file("doc.txt", ROOT_UID);
        let uid = file.uid;
        store.insert_file("default", file).unwrap();

        store.set_primary_available(false);
        let err = store.insert_file("default", new_file("other.txt", ROOT_UID)).unwrap_err();
        assert!(matches!(err, EngineError::ReadOnly));
        assert!(store.get_by_uid("default", uid, false).is_ok());
    }

    #[test]
    fn restore_to_version_preserves_original_row() {
        let store = SqlLikeMetadataStore::new();
        let file = new_file("doc.txt", ROOT_UID);
        let uid = file.uid;
        store.insert_file("default", file).unwrap();
        store.append_version("default", uid, "v1", 10, "path/v1").unwrap();
        store.append_version("default", uid, "v2", 20, "path/v2").unwrap();
        store.update_current_version("default", uid, "v2").unwrap();

        store.restore_to_version("default", uid, "v1", "v3").unwrap();
        let restored = store.get_by_uid("default", uid, false).unwrap();
        assert_eq!(restored.current_version.as_deref(), Some("v3"));
        assert_eq!(store.get_storage_path("default", uid, "v1").unwrap(), "path/v1");
        assert_eq!(store.get_storage_path("default", uid, "v3").unwrap(), "path/v1");
        assert_eq!(store.list_versions("default", uid).unwrap().len(), 3);
    }

    #[test]
    fn directory_size_sums_recursively() {
        let store = SqlLikeMetadataStore::new();
        let mut dir = new_file("sub", ROOT_UID);
        dir.file_type = FileType::Directory;
        let dir_uid = dir.uid;
        store.insert_file("default", dir).unwrap();

        let mut file = new_file("leaf.bin", dir_uid);
        file.current_version = Some("v1".to_string());
        let file_uid = file.uid;
        store.insert_file("default", file).unwrap();
        store.append_version("default", file_uid, "v1", 42, "path/v1").unwrap();

        assert_eq!(store.get_directory_size("default", dir_uid).unwrap(), 42);
    }
}
