//! Tenant Router (component F): resolves a tenant id to an isolated bundle
//! of {local blob store, remote blob store, cache} and lazily provisions
//! new tenants' schemas/prefixes on first use.

use crate::blob_store::{LocalBlobStore, RemoteBlobStore};
use crate::cache::Cache;
use crate::error::{EngineError, EngineResult};
use crate::metadata_store::MetadataStore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Everything a request needs once its tenant has been resolved.
pub struct TenantBundle {
    pub local: Arc<LocalBlobStore>,
    pub remote: Arc<RemoteBlobStore>,
    pub cache: Arc<Cache>,
}

/// Resolves tenant ids to bundles, creating storage roots and metadata
/// schemas on first sight of a tenant. An empty id always means `"default"`.
pub struct TenantRouter {
    storage_base: PathBuf,
    cache_max_bytes: usize,
    cache_threshold: f64,
    metadata: Arc<dyn MetadataStore>,
    bundles: Mutex<HashMap<String, Arc<TenantBundle>>>,
}

const MAX_TENANT_NAME_LEN: usize = 63;

/// Maps an incoming tenant id to its canonical form: `""` becomes
/// `"default"`, hyphens/spaces/dots become underscores, and the result is
/// capped at `MAX_TENANT_NAME_LEN` characters.
fn normalize(tenant: &str) -> String {
    if tenant.is_empty() {
        return "default".to_string();
    }
    tenant.chars().map(|c| if c == '-' || c == ' ' || c == '.' { '_' } else { c }).take(MAX_TENANT_NAME_LEN).collect()
}

fn is_valid_tenant_name(tenant: &str) -> bool {
    !tenant.is_empty() && tenant.len() <= MAX_TENANT_NAME_LEN && tenant.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl TenantRouter {
    pub fn new(storage_base: PathBuf, cache_max_bytes: usize, cache_threshold: f64, metadata: Arc<dyn MetadataStore>) -> Self {
        TenantRouter { storage_base, cache_max_bytes, cache_threshold, metadata, bundles: Mutex::new(HashMap::new()) }
    }

    /// Resolve `tenant_id` to its bundle, provisioning it on first use.
    /// `""` and `"default"` resolve to the same bundle.
    pub fn resolve(&self, tenant_id: &str) -> EngineResult<Arc<TenantBundle>> {
        let tenant = normalize(tenant_id);

        if let Some(bundle) = self.bundles.lock().expect("tenant router mutex poisoned").get(tenant.as_str()) {
            return Ok(bundle.clone());
        }

        if tenant != "default" && !is_valid_tenant_name(&tenant) {
            return Err(EngineError::Internal(format!("invalid tenant id: {tenant}")));
        }

        let mut bundles = self.bundles.lock().expect("tenant router mutex poisoned");
        if let Some(bundle) = bundles.get(tenant.as_str()) {
            return Ok(bundle.clone());
        }

        self.metadata.create_tenant_schema(&tenant)?;

        let local = LocalBlobStore::new(self.storage_base.clone()).map_err(|e| EngineError::Io(e.to_string()))?;
        local.ensure_tenant(&tenant).map_err(|e| EngineError::Io(e.to_string()))?;
        let remote = RemoteBlobStore::new();
        remote.ensure_prefix(&tenant);

        let bundle = Arc::new(TenantBundle {
            local: Arc::new(local),
            remote: Arc::new(remote),
            cache: Arc::new(Cache::new(self.cache_max_bytes, self.cache_threshold)),
        });

        log::info!("tenant router: provisioned tenant {tenant}");
        bundles.insert(tenant, bundle.clone());
        Ok(bundle)
    }

    pub fn exists(&self, tenant_id: &str) -> bool {
        let tenant = normalize(tenant_id);
        self.bundles.lock().expect("tenant router mutex poisoned").contains_key(tenant.as_str()) || self.metadata.tenant_exists(&tenant)
    }

    /// Tear down a tenant's bundle and its metadata-store-side data.
    pub fn remove(&self, tenant_id: &str) -> EngineResult<()> {
        let tenant = normalize(tenant_id);
        if tenant == "default" {
            return Err(EngineError::Internal("the default tenant cannot be removed".to_string()));
        }
        self.metadata.cleanup_tenant_data(&tenant)?;
        self.bundles.lock().expect("tenant router mutex poisoned").remove(tenant.as_str());
        log::warn!("tenant router: removed tenant {tenant}");
        Ok(())
    }

    pub fn list(&self) -> Vec<String> {
        self.metadata.list_tenants()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata_store::SqlLikeMetadataStore;

    fn router() -> (tempfile::TempDir, TenantRouter) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn MetadataStore> = Arc::new(SqlLikeMetadataStore::new());
        let router = TenantRouter::new(dir.path().to_path_buf(), 1 << 20, 1.0, store);
        (dir, router)
    }

    #[test]
    fn empty_and_default_tenant_resolve_to_the_same_bundle() {
        let (_dir, router) = router();
        let a = router.resolve("").unwrap();
        let b = router.resolve("default").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn new_tenant_is_lazily_provisioned_once() {
        let (_dir, router) = router();
        assert!(!router.exists("acme"));
        let a = router.resolve("acme").unwrap();
        let b = router.resolve("acme").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(router.exists("acme"));
    }

    #[test]
    fn hyphens_spaces_and_dots_are_mapped_to_underscores() {
        let (_dir, router) = router();
        let a = router.resolve("has a space").unwrap();
        let b = router.resolve("has_a_space").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(router.exists("has.a-space"));
    }

    #[test]
    fn invalid_tenant_name_is_rejected() {
        let (_dir, router) = router();
        assert!(router.resolve("acme!").is_err());
    }

    #[test]
    fn overlong_tenant_name_is_truncated() {
        let (_dir, router) = router();
        let long_name = "a".repeat(100);
        let bundle = router.resolve(&long_name).unwrap();
        let truncated: String = long_name.chars().take(63).collect();
        assert!(Arc::ptr_eq(&bundle, &router.resolve(&truncated).unwrap()));
    }

    #[test]
    fn default_tenant_cannot_be_removed() {
        let (_dir, router) = router();
        assert!(router.remove("default").is_err());
    }
}
