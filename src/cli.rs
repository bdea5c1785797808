use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "fileengine")]
#[command(about = "Multi-tenant versioned file service", long_about = None)]
pub struct Cli {
    /// Output results in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Tenant id; empty resolves to "default"
    #[arg(short, long, global = true, default_value = "")]
    pub tenant: String,

    /// Acting user, for ACL checks
    #[arg(short, long, global = true, default_value = "root")]
    pub user: String,

    /// Comma-separated roles the acting user holds
    #[arg(short, long, global = true, default_value = "")]
    pub roles: String,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn role_list(&self) -> Vec<String> {
        self.roles.split(',').map(str::trim).filter(|r| !r.is_empty()).map(str::to_string).collect()
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a directory under `parent`
    Mkdir { parent: Uuid, name: String },

    /// Soft-delete a directory
    Rmdir { uid: Uuid },

    /// List a directory's non-deleted children
    Listdir { uid: Uuid },

    /// List a directory's children, including soft-deleted ones
    ListdirWithDeleted { uid: Uuid },

    /// Create a zero-byte file under `parent`
    Touch { parent: Uuid, name: String },

    /// Soft-delete a file or directory
    Remove { uid: Uuid },

    /// Clear the deleted flag on a file or directory
    Undelete { uid: Uuid },

    /// Write bytes from a local path as a new version
    Put {
        uid: Uuid,
        /// Local path to read bytes from
        path: std::path::PathBuf,
    },

    /// Read the current version's bytes to a local path
    Get {
        uid: Uuid,
        /// Local path to write bytes to
        path: std::path::PathBuf,
    },

    /// Show file/directory metadata and the current version's size
    Stat { uid: Uuid },

    /// Check whether a uid exists
    Exists { uid: Uuid },

    /// Rename a file or directory in place
    Rename { uid: Uuid, new_name: String },

    /// Move a file or directory under a new parent
    Move { src: Uuid, dst_parent: Uuid },

    /// Deep-copy a file or directory under a new parent
    Copy { src: Uuid, dst_parent: Uuid },

    /// List all versions of a file, newest first
    ListVersions { uid: Uuid },

    /// Read a specific version's bytes to a local path
    GetVersion { uid: Uuid, version_ts: String, path: std::path::PathBuf },

    /// Restore a file to a prior version, preserving the original
    RestoreToVersion { uid: Uuid, version_ts: String },

    /// Set a metadata key/value on the current version
    SetMetadata { uid: Uuid, key: String, value: String },

    /// Get a metadata value from the current version
    GetMetadata { uid: Uuid, key: String },

    /// List all metadata key/value pairs on the current version
    GetAllMetadata { uid: Uuid },

    /// Delete a metadata key from the current version
    DeleteMetadata { uid: Uuid, key: String },

    /// Grant a permission bitmask to a principal on a resource
    GrantPermission {
        uid: Uuid,
        principal: String,
        /// user|group|role|other
        principal_type: String,
        /// Hex permission bitmask, e.g. 0x400
        permissions: String,
    },

    /// Revoke a principal's permission bits on a resource
    RevokePermission { uid: Uuid, principal: String, principal_type: String, permissions: String },

    /// Check whether the acting user holds a permission on a resource
    CheckPermission { uid: Uuid, permissions: String },

    /// Administrative: total bytes stored locally and remotely for this tenant
    GetStorageUsage,

    /// Administrative: enqueue all versions of `uid` for remote sync
    TriggerSync { uid: Uuid },

    /// Administrative: purge local copies of versions older than the
    /// `keep_count` newest, once replicated remotely
    PurgeOldVersions { uid: Uuid, keep_count: usize },
}
