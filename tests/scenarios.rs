//! Cross-module integration scenarios exercising the full stack (tenant
//! router, metadata store, blob stores, cache, ACL evaluator) through the
//! public `Engine` surface, one tenant per test via a fresh temp dir.

use fileengine::connection_pool::ConnectionPool;
use fileengine::domain::{permission, PrincipalType};
use fileengine::engine::Engine;
use fileengine::error::EngineError;
use fileengine::ids::ROOT_UID;
use fileengine::metadata_store::{MetadataStore, SqlLikeMetadataStore};
use fileengine::tenant::TenantRouter;
use std::sync::Arc;

fn new_engine() -> (tempfile::TempDir, Engine) {
    let dir = tempfile::tempdir().unwrap();
    let metadata: Arc<dyn MetadataStore> = Arc::new(SqlLikeMetadataStore::new());
    let router = TenantRouter::new(dir.path().to_path_buf(), 1 << 20, 1.0, metadata.clone());
    let pool = ConnectionPool::new(4);
    (dir, Engine::new(router, metadata, pool, "host-1"))
}

#[test]
fn scenario_basic_write_read_cycle() {
    let (_dir, engine) = new_engine();
    let roles = vec![];

    let dir_a = engine.mkdir("t1", ROOT_UID, "a", "alice", &roles, 0o755).unwrap();
    let file_f = engine.touch("t1", dir_a, "f.txt", "alice", &roles).unwrap();
    engine.put("t1", file_f, b"hello".to_vec(), "alice", &roles).unwrap();

    let bytes = engine.get("t1", file_f, "alice", &roles).unwrap();
    assert_eq!(bytes.as_slice(), b"hello");

    let info = engine.stat("t1", file_f, "alice", &roles).unwrap();
    assert_eq!(info.size, 5);

    let versions = engine.list_versions("t1", file_f, "alice", &roles).unwrap();
    assert_eq!(versions.len(), 1);
}

#[test]
fn scenario_deletion_recovery() {
    let (_dir, engine) = new_engine();
    let roles = vec![];

    let dir_a = engine.mkdir("t1", ROOT_UID, "a", "alice", &roles, 0o755).unwrap();
    let file_f = engine.touch("t1", dir_a, "f.txt", "alice", &roles).unwrap();
    engine.put("t1", file_f, b"hello".to_vec(), "alice", &roles).unwrap();

    engine.remove("t1", file_f, "alice", &roles).unwrap();
    assert!(matches!(engine.get("t1", file_f, "alice", &roles), Err(EngineError::NotFound(_))));

    let children = engine.listdir("t1", dir_a, "alice", &roles).unwrap();
    assert!(!children.iter().any(|c| c.uid == file_f));

    let children_all = engine.listdir_with_deleted("t1", dir_a, "alice", &roles).unwrap();
    assert!(children_all.iter().any(|c| c.uid == file_f));

    engine.undelete("t1", file_f, "alice", &roles).unwrap();
    let bytes = engine.get("t1", file_f, "alice", &roles).unwrap();
    assert_eq!(bytes.as_slice(), b"hello");
}

#[test]
fn scenario_versioning_and_restore() {
    let (_dir, engine) = new_engine();
    let roles = vec![];

    let file_f = engine.touch("t1", ROOT_UID, "f.txt", "alice", &roles).unwrap();
    let ts1 = engine.put("t1", file_f, b"v1".to_vec(), "alice", &roles).unwrap();
    engine.put("t1", file_f, b"v2".to_vec(), "alice", &roles).unwrap();
    engine.put("t1", file_f, b"v3".to_vec(), "alice", &roles).unwrap();

    let versions = engine.list_versions("t1", file_f, "alice", &roles).unwrap();
    assert_eq!(versions.len(), 3);
    assert_eq!(versions[0].version_ts, versions.iter().map(|v| v.version_ts.clone()).max().unwrap());

    engine.restore_to_version("t1", file_f, &ts1, "alice", &roles).unwrap();
    let bytes = engine.get("t1", file_f, "alice", &roles).unwrap();
    assert_eq!(bytes.as_slice(), b"v1");

    let versions_after = engine.list_versions("t1", file_f, "alice", &roles).unwrap();
    assert_eq!(versions_after.len(), 4);
}

#[test]
fn scenario_acl_matrix() {
    let (_dir, engine) = new_engine();
    let roles = vec![];

    let resource = engine.mkdir("t1", ROOT_UID, "r", "alice", &roles, 0o755).unwrap();
    engine.grant_permission("t1", resource, "users", PrincipalType::Role, permission::READ, "alice", &roles).unwrap();
    engine
        .grant_permission("t1", resource, "contributors", PrincipalType::Role, permission::READ | permission::WRITE, "alice", &roles)
        .unwrap();
    engine
        .grant_permission(
            "t1",
            resource,
            "admins",
            PrincipalType::Role,
            permission::READ | permission::WRITE | permission::DELETE | permission::EXECUTE,
            "alice",
            &roles,
        )
        .unwrap();

    assert!(!engine.check_permission("t1", resource, "u1", &["users".to_string()], permission::WRITE).unwrap());
    assert!(engine.check_permission("t1", resource, "u2", &["contributors".to_string()], permission::WRITE).unwrap());
    assert!(engine.check_permission("t1", resource, "u3", &["admins".to_string()], permission::DELETE).unwrap());
    assert!(engine.check_permission("t1", ROOT_UID, "anyone", &[], permission::READ).unwrap());
}

#[test]
fn scenario_name_conflict() {
    let (_dir, engine) = new_engine();
    let roles = vec![];

    let uid_x = engine.touch("t1", ROOT_UID, "same", "alice", &roles).unwrap();
    assert!(matches!(engine.touch("t1", ROOT_UID, "same", "alice", &roles), Err(EngineError::Conflict(_))));

    engine.remove("t1", uid_x, "alice", &roles).unwrap();
    let uid_y = engine.touch("t1", ROOT_UID, "same", "alice", &roles).unwrap();
    assert_ne!(uid_x, uid_y);

    assert!(matches!(engine.undelete("t1", uid_x, "alice", &roles), Err(EngineError::Conflict(_))));
}

#[test]
fn scenario_read_only_mode() {
    let (_dir, engine) = new_engine();
    let roles = vec![];

    let dir_a = engine.mkdir("t1", ROOT_UID, "a", "alice", &roles, 0o755).unwrap();
    let file_f = engine.touch("t1", dir_a, "f.txt", "alice", &roles).unwrap();
    engine.put("t1", file_f, b"hello".to_vec(), "alice", &roles).unwrap();

    engine.metadata().set_primary_available(false);

    assert!(matches!(engine.put("t1", file_f, b"nope".to_vec(), "alice", &roles), Err(EngineError::ReadOnly)));
    assert!(matches!(engine.mkdir("t1", ROOT_UID, "b", "alice", &roles, 0o755), Err(EngineError::ReadOnly)));
    assert!(matches!(engine.rename("t1", file_f, "g.txt", "alice", &roles), Err(EngineError::ReadOnly)));
    assert!(matches!(
        engine.grant_permission("t1", file_f, "bob", PrincipalType::User, permission::READ, "alice", &roles),
        Err(EngineError::ReadOnly)
    ));

    assert!(engine.get("t1", file_f, "alice", &roles).is_ok());
    assert!(engine.stat("t1", file_f, "alice", &roles).is_ok());
    assert!(engine.listdir("t1", dir_a, "alice", &roles).is_ok());
    assert!(engine.list_versions("t1", file_f, "alice", &roles).is_ok());
}

#[test]
fn purge_old_versions_never_touches_unreplicated_or_current() {
    let (_dir, engine) = new_engine();
    let roles = vec![];

    let file_f = engine.touch("t1", ROOT_UID, "f.bin", "alice", &roles).unwrap();
    engine.put("t1", file_f, vec![1u8; 16], "alice", &roles).unwrap();
    engine.put("t1", file_f, vec![2u8; 16], "alice", &roles).unwrap();
    let current_ts = engine.put("t1", file_f, vec![3u8; 16], "alice", &roles).unwrap();

    // Nothing has been synced to the remote store yet, so every prior
    // version is still its sole copy; purge must be a no-op.
    let purged = engine.purge_old_versions("t1", file_f, 0, "alice", &roles).unwrap();
    assert_eq!(purged, 0);

    let bytes = engine.get("t1", file_f, "alice", &roles).unwrap();
    assert_eq!(bytes.as_slice(), vec![3u8; 16]);
    let versions = engine.list_versions("t1", file_f, "alice", &roles).unwrap();
    assert!(versions.iter().any(|v| v.version_ts == current_ts));
}
