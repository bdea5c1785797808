use anyhow::{anyhow, Result};
use clap::Parser;
use fileengine::cli::{Cli, Commands};
use fileengine::config::Config;
use fileengine::connection_pool::ConnectionPool;
use fileengine::domain::{permission, PrincipalType};
use fileengine::engine::Engine;
use fileengine::metadata_store::{MetadataStore, SqlLikeMetadataStore};
use fileengine::tenant::TenantRouter;
use fileengine::workers::culler::CullStrategy;
use fileengine::workers::{WorkerConfig, WorkerSupervisor};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    env_logger::Builder::from_default_env().filter_level(log::LevelFilter::Info).init();

    let config = Config::from_env()?;
    let cli = Cli::parse();
    let roles = cli.role_list();

    let metadata: Arc<dyn MetadataStore> = Arc::new(SqlLikeMetadataStore::new());
    let router = TenantRouter::new(
        PathBuf::from(&config.storage.storage_base),
        config.cache.max_cache_size_mb * 1024 * 1024,
        config.cache.cache_threshold,
        metadata.clone(),
    );
    let pool = ConnectionPool::new(config.metadata.pool_size);
    let host_id = hostname();
    let engine = Arc::new(Engine::new(router, metadata, pool, host_id));

    let worker_config = WorkerConfig {
        sync_retry_interval: Duration::from_secs(config.sync.s3_retry_seconds),
        sync_on_startup: config.sync.s3_sync_on_startup,
        cull_period: Duration::from_secs(config.sync.culler_period_secs),
        cull_strategy: CullStrategy::Lru,
        cull_batch_size: config.sync.culler_batch_size,
        cull_usage_threshold_bytes: config.sync.culler_usage_threshold_mb * 1024 * 1024,
        monitor_interval: Duration::from_secs(config.metadata.health_check_interval_secs),
    };
    let supervisor = WorkerSupervisor::start(engine.clone(), worker_config);

    let result = run_command(&engine, &cli, &roles);

    supervisor.stop_and_join();
    result
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

fn run_command(engine: &Engine, cli: &Cli, roles: &[String]) -> Result<()> {
    let tenant = cli.tenant.as_str();
    let user = cli.user.as_str();

    match &cli.command {
        Commands::Mkdir { parent, name } => {
            let uid = engine.mkdir(tenant, *parent, name, user, roles, 0o755)?;
            println!("{uid}");
        }
        Commands::Rmdir { uid } => engine.rmdir(tenant, *uid, user, roles)?,
        Commands::Listdir { uid } => {
            for child in engine.listdir(tenant, *uid, user, roles)? {
                println!("{}\t{}\t{:?}", child.uid, child.name, child.file_type);
            }
        }
        Commands::ListdirWithDeleted { uid } => {
            for child in engine.listdir_with_deleted(tenant, *uid, user, roles)? {
                println!("{}\t{}\t{:?}\tdeleted={}", child.uid, child.name, child.file_type, child.deleted);
            }
        }
        Commands::Touch { parent, name } => {
            let uid = engine.touch(tenant, *parent, name, user, roles)?;
            println!("{uid}");
        }
        Commands::Remove { uid } => engine.remove(tenant, *uid, user, roles)?,
        Commands::Undelete { uid } => engine.undelete(tenant, *uid, user, roles)?,
        Commands::Put { uid, path } => {
            let bytes = fs::read(path)?;
            let version_ts = engine.put(tenant, *uid, bytes, user, roles)?;
            println!("{version_ts}");
        }
        Commands::Get { uid, path } => {
            let bytes = engine.get(tenant, *uid, user, roles)?;
            fs::write(path, bytes.as_slice())?;
        }
        Commands::Stat { uid } => {
            let info = engine.stat(tenant, *uid, user, roles)?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::Exists { uid } => println!("{}", engine.exists(tenant, *uid)),
        Commands::Rename { uid, new_name } => engine.rename(tenant, *uid, new_name, user, roles)?,
        Commands::Move { src, dst_parent } => engine.move_file(tenant, *src, *dst_parent, user, roles)?,
        Commands::Copy { src, dst_parent } => {
            let uid = engine.copy(tenant, *src, *dst_parent, user, roles)?;
            println!("{uid}");
        }
        Commands::ListVersions { uid } => {
            for version in engine.list_versions(tenant, *uid, user, roles)? {
                println!("{}\t{}", version.version_ts, version.size);
            }
        }
        Commands::GetVersion { uid, version_ts, path } => {
            let bytes = engine.get_version(tenant, *uid, version_ts, user, roles)?;
            fs::write(path, bytes.as_slice())?;
        }
        Commands::RestoreToVersion { uid, version_ts } => {
            let new_ts = engine.restore_to_version(tenant, *uid, version_ts, user, roles)?;
            println!("{new_ts}");
        }
        Commands::SetMetadata { uid, key, value } => engine.set_metadata(tenant, *uid, key, value, user, roles)?,
        Commands::GetMetadata { uid, key } => {
            if let Some(value) = engine.get_metadata(tenant, *uid, key, user, roles)? {
                println!("{value}");
            }
        }
        Commands::GetAllMetadata { uid } => {
            for entry in engine.get_all_metadata(tenant, *uid, user, roles)? {
                println!("{}={}", entry.key, entry.value);
            }
        }
        Commands::DeleteMetadata { uid, key } => engine.delete_metadata(tenant, *uid, key, user, roles)?,
        Commands::GrantPermission { uid, principal, principal_type, permissions } => {
            let ptype = parse_principal_type(principal_type)?;
            let bits = parse_permission_bits(permissions)?;
            engine.grant_permission(tenant, *uid, principal, ptype, bits, user, roles)?;
        }
        Commands::RevokePermission { uid, principal, principal_type, permissions } => {
            let ptype = parse_principal_type(principal_type)?;
            let bits = parse_permission_bits(permissions)?;
            engine.revoke_permission(tenant, *uid, principal, ptype, bits, user, roles)?;
        }
        Commands::CheckPermission { uid, permissions } => {
            let bits = parse_permission_bits(permissions)?;
            println!("{}", engine.check_permission(tenant, *uid, user, roles, bits)?);
        }
        Commands::GetStorageUsage => {
            let bundle = engine.resolve_tenant(tenant)?;
            println!("local_bytes={}", bundle.local.total_bytes());
        }
        Commands::TriggerSync { uid } => {
            let count = engine.backup_to_object_store(tenant, *uid, user, roles)?;
            println!("enqueued {count} version(s) for sync");
        }
        Commands::PurgeOldVersions { uid, keep_count } => {
            let purged = engine.purge_old_versions(tenant, *uid, *keep_count, user, roles)?;
            println!("purged {purged} version(s)");
        }
    }
    Ok(())
}

fn parse_principal_type(s: &str) -> Result<PrincipalType> {
    match s.to_lowercase().as_str() {
        "user" => Ok(PrincipalType::User),
        "group" => Ok(PrincipalType::Group),
        "role" => Ok(PrincipalType::Role),
        "other" => Ok(PrincipalType::Other),
        _ => Err(anyhow!("invalid principal type '{s}', use user|group|role|other")),
    }
}

fn parse_permission_bits(s: &str) -> Result<u32> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).map_err(|e| anyhow!("invalid permission bitmask '{s}': {e}"));
    }
    match s.to_lowercase().as_str() {
        "full" => Ok(permission::FULL),
        "read" => Ok(permission::READ),
        "write" => Ok(permission::WRITE),
        _ => s.parse::<u32>().map_err(|e| anyhow!("invalid permission bitmask '{s}': {e}")),
    }
}
