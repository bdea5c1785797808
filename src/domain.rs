//! Data model (§3): the entities every other component operates on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed enumeration of file kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    RegularFile,
    Directory,
    Symlink,
}

/// A namespace row: either a directory or a file. Deletion is a flag flip,
/// never a physical removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub uid: Uuid,
    pub name: String,
    pub parent_uid: Uuid,
    pub file_type: FileType,
    pub owner: String,
    pub mode_bits: u32,
    pub current_version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl File {
    pub fn new_root() -> Self {
        let now = Utc::now();
        File {
            uid: crate::ids::ROOT_UID,
            name: String::new(),
            parent_uid: crate::ids::ROOT_UID,
            file_type: FileType::Directory,
            owner: "root".to_string(),
            mode_bits: 0o755,
            current_version: None,
            created_at: now,
            modified_at: now,
            deleted: false,
            deleted_at: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.uid == crate::ids::ROOT_UID
    }
}

/// One immutable content version of a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub file_uid: Uuid,
    pub version_ts: String,
    pub size: u64,
    pub storage_path: String,
    pub created_at: DateTime<Utc>,
}

/// `(file_uid, version_ts, key)` metadata pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub file_uid: Uuid,
    pub version_ts: String,
    pub key: String,
    pub value: String,
}

/// Closed enumeration of ACL principal kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrincipalType {
    User,
    Group,
    Role,
    Other,
}

/// Permission bitmask. Bit layout chosen to keep compatibility with
/// existing deployed ACL configuration.
pub mod permission {
    pub const READ: u32 = 0x400;
    pub const WRITE: u32 = 0x200;
    pub const DELETE: u32 = 0x100;
    pub const LIST_DELETED: u32 = 0x080;
    pub const UNDELETE: u32 = 0x040;
    pub const VIEW_VERSIONS: u32 = 0x020;
    pub const RETRIEVE_BACK_VERSION: u32 = 0x010;
    pub const RESTORE_TO_VERSION: u32 = 0x008;
    pub const EXECUTE: u32 = 0x001;

    pub const FULL: u32 = READ
        | WRITE
        | DELETE
        | LIST_DELETED
        | UNDELETE
        | VIEW_VERSIONS
        | RETRIEVE_BACK_VERSION
        | RESTORE_TO_VERSION
        | EXECUTE;
}

/// `(resource_uid, principal, principal_type)` ACL row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclEntry {
    pub resource_uid: Uuid,
    pub principal: String,
    pub principal_type: PrincipalType,
    pub permissions: u32,
}

/// `(file_uid, host_id)` access-statistics row, used by the culler.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AccessStat {
    pub last_accessed: i64,
    pub access_count: u64,
}

/// Caller identity carried by every RPC (`{user, roles[], tenant}`).
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: String,
    pub roles: Vec<String>,
    pub tenant: String,
}

impl AuthContext {
    pub fn new(user: impl Into<String>, roles: Vec<String>, tenant: impl Into<String>) -> Self {
        AuthContext { user: user.into(), roles, tenant: tenant.into() }
    }
}

/// `FileInfo` returned by `stat`: a read-only projection of `File` plus the
/// latest version's size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub uid: Uuid,
    pub name: String,
    pub parent_uid: Uuid,
    pub file_type: FileType,
    pub size: u64,
    pub owner: String,
    pub mode_bits: u32,
    pub current_version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub deleted: bool,
}
