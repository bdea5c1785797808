use serde::{Deserialize, Serialize};
use std::env;

/// Service configuration with sensible defaults. Precedence when loaded via
/// `Config::from_env` is cmdline > env > file, mirroring what the CLI layer
/// wires up: flags are applied on top of `from_env`'s result, which itself
/// falls back to the defaults below when a variable is unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub metadata: MetadataConfig,
    pub storage: StorageConfig,
    pub remote: RemoteConfig,
    pub cache: CacheConfig,
    pub tenancy: TenancyConfig,
    pub rpc: RpcConfig,
    pub sync: SyncConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    pub pg_host: String,
    pub pg_port: u16,
    pub pg_database: String,
    pub pg_user: String,
    pub pg_password: String,
    pub pool_size: usize,
    pub connect_timeout_ms: u64,
    /// Interval between primary health probes.
    pub health_check_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Filesystem root under which per-tenant blob subtrees are created.
    pub storage_base: String,
    pub encrypt_data: bool,
    pub compress_data: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub s3_endpoint: String,
    pub s3_region: String,
    pub s3_bucket: String,
    pub s3_access_key: String,
    pub s3_secret_key: String,
    pub s3_path_style: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Fraction of `max_cache_size_mb` the cache may actually hold before
    /// evicting (see `Cache::new`'s `threshold` parameter).
    pub cache_threshold: f64,
    pub max_cache_size_mb: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenancyConfig {
    pub multi_tenant_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub grpc_host: String,
    pub grpc_port: u16,
    pub http_thread_pool: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub s3_sync_support: bool,
    pub s3_retry_seconds: u64,
    pub s3_sync_on_startup: bool,
    pub s3_sync_on_demand: bool,
    pub s3_sync_pattern: String,
    pub s3_sync_bidirectional: bool,
    pub culler_period_secs: u64,
    pub culler_batch_size: usize,
    pub culler_usage_threshold_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub log_file_path: Option<String>,
    pub log_to_console: bool,
    pub log_to_file: bool,
    pub log_rotation_size_mb: usize,
    pub log_retention_days: u32,
}

impl Config {
    /// Default configuration for production.
    pub fn production() -> Self {
        Config {
            metadata: MetadataConfig {
                pg_host: "localhost".to_string(),
                pg_port: 5432,
                pg_database: "fileengine".to_string(),
                pg_user: "fileengine".to_string(),
                pg_password: String::new(),
                pool_size: 16,
                connect_timeout_ms: 2_000,
                health_check_interval_secs: 10,
            },
            storage: StorageConfig {
                storage_base: "/var/lib/fileengine/storage".to_string(),
                encrypt_data: false,
                compress_data: false,
            },
            remote: RemoteConfig {
                s3_endpoint: String::new(),
                s3_region: "us-east-1".to_string(),
                s3_bucket: "fileengine".to_string(),
                s3_access_key: String::new(),
                s3_secret_key: String::new(),
                s3_path_style: false,
            },
            cache: CacheConfig { cache_threshold: 0.9, max_cache_size_mb: 512 },
            tenancy: TenancyConfig { multi_tenant_enabled: true },
            rpc: RpcConfig { grpc_host: "0.0.0.0".to_string(), grpc_port: 50051, http_thread_pool: 16 },
            sync: SyncConfig {
                s3_sync_support: true,
                s3_retry_seconds: 30,
                s3_sync_on_startup: true,
                s3_sync_on_demand: true,
                s3_sync_pattern: "*".to_string(),
                s3_sync_bidirectional: false,
                culler_period_secs: 300,
                culler_batch_size: 100,
                culler_usage_threshold_mb: 1024,
            },
            monitoring: MonitoringConfig {
                log_level: "info".to_string(),
                log_file_path: None,
                log_to_console: true,
                log_to_file: false,
                log_rotation_size_mb: 100,
                log_retention_days: 14,
            },
        }
    }

    /// Development configuration.
    pub fn development() -> Self {
        let mut config = Self::production();
        config.storage.storage_base = "./dev-data/storage".to_string();
        config.tenancy.multi_tenant_enabled = true;
        config.monitoring.log_level = "debug".to_string();
        config
    }

    /// Testing configuration.
    pub fn testing() -> Self {
        let mut config = Self::development();
        config.cache.max_cache_size_mb = 4;
        config.sync.culler_period_secs = 5;
        config.metadata.health_check_interval_secs = 1;
        config
    }

    /// Load from environment variables, falling back to `production()`
    /// defaults for anything unset.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::production();

        if let Ok(v) = env::var("PG_HOST") {
            config.metadata.pg_host = v;
        }
        if let Ok(v) = env_parsed::<u16>("PG_PORT")? {
            config.metadata.pg_port = v;
        }
        if let Ok(v) = env::var("PG_DATABASE") {
            config.metadata.pg_database = v;
        }
        if let Ok(v) = env::var("PG_USER") {
            config.metadata.pg_user = v;
        }
        if let Ok(v) = env::var("PG_PASSWORD") {
            config.metadata.pg_password = v;
        }

        if let Ok(v) = env::var("STORAGE_BASE") {
            config.storage.storage_base = v;
        }
        if let Ok(v) = env_parsed::<bool>("ENCRYPT_DATA")? {
            config.storage.encrypt_data = v;
        }
        if let Ok(v) = env_parsed::<bool>("COMPRESS_DATA")? {
            config.storage.compress_data = v;
        }

        if let Ok(v) = env::var("S3_ENDPOINT") {
            config.remote.s3_endpoint = v;
        }
        if let Ok(v) = env::var("S3_REGION") {
            config.remote.s3_region = v;
        }
        if let Ok(v) = env::var("S3_BUCKET") {
            config.remote.s3_bucket = v;
        }
        if let Ok(v) = env::var("S3_ACCESS_KEY") {
            config.remote.s3_access_key = v;
        }
        if let Ok(v) = env::var("S3_SECRET_KEY") {
            config.remote.s3_secret_key = v;
        }
        if let Ok(v) = env_parsed::<bool>("S3_PATH_STYLE")? {
            config.remote.s3_path_style = v;
        }

        if let Ok(v) = env_parsed::<f64>("CACHE_THRESHOLD")? {
            config.cache.cache_threshold = v;
        }
        if let Ok(v) = env_parsed::<usize>("MAX_CACHE_SIZE_MB")? {
            config.cache.max_cache_size_mb = v;
        }

        if let Ok(v) = env_parsed::<bool>("MULTI_TENANT_ENABLED")? {
            config.tenancy.multi_tenant_enabled = v;
        }

        if let Ok(v) = env::var("GRPC_HOST") {
            config.rpc.grpc_host = v;
        }
        if let Ok(v) = env_parsed::<u16>("GRPC_PORT")? {
            config.rpc.grpc_port = v;
        }
        if let Ok(v) = env_parsed::<usize>("HTTP_THREAD_POOL")? {
            config.rpc.http_thread_pool = v;
        }

        if let Ok(v) = env_parsed::<bool>("S3_SYNC_SUPPORT")? {
            config.sync.s3_sync_support = v;
        }
        if let Ok(v) = env_parsed::<u64>("S3_RETRY_SECONDS")? {
            config.sync.s3_retry_seconds = v;
        }
        if let Ok(v) = env_parsed::<bool>("S3_SYNC_ON_STARTUP")? {
            config.sync.s3_sync_on_startup = v;
        }
        if let Ok(v) = env_parsed::<bool>("S3_SYNC_ON_DEMAND")? {
            config.sync.s3_sync_on_demand = v;
        }
        if let Ok(v) = env::var("S3_SYNC_PATTERN") {
            config.sync.s3_sync_pattern = v;
        }
        if let Ok(v) = env_parsed::<bool>("S3_SYNC_BIDIRECTIONAL")? {
            config.sync.s3_sync_bidirectional = v;
        }

        if let Ok(v) = env::var("LOG_LEVEL") {
            config.monitoring.log_level = v;
        }
        if let Ok(v) = env::var("LOG_FILE_PATH") {
            config.monitoring.log_file_path = Some(v);
        }
        if let Ok(v) = env_parsed::<bool>("LOG_TO_CONSOLE")? {
            config.monitoring.log_to_console = v;
        }
        if let Ok(v) = env_parsed::<bool>("LOG_TO_FILE")? {
            config.monitoring.log_to_file = v;
        }
        if let Ok(v) = env_parsed::<usize>("LOG_ROTATION_SIZE_MB")? {
            config.monitoring.log_rotation_size_mb = v;
        }
        if let Ok(v) = env_parsed::<u32>("LOG_RETENTION_DAYS")? {
            config.monitoring.log_retention_days = v;
        }

        config.validate().map_err(|errors| anyhow::anyhow!("configuration validation failed: {}", errors.join("; ")))?;
        Ok(config)
    }

    /// Load from a JSON file on disk, as a lower-precedence layer beneath
    /// environment variables.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.metadata.pool_size == 0 {
            errors.push("metadata.pool_size must be > 0".to_string());
        }
        if self.cache.max_cache_size_mb == 0 {
            errors.push("cache.max_cache_size_mb must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.cache.cache_threshold) {
            errors.push("cache.cache_threshold must be between 0.0 and 1.0".to_string());
        }
        if self.rpc.http_thread_pool == 0 {
            errors.push("rpc.http_thread_pool must be > 0".to_string());
        }
        if self.sync.s3_retry_seconds == 0 {
            errors.push("sync.s3_retry_seconds must be > 0".to_string());
        }
        if self.storage.storage_base.is_empty() {
            errors.push("storage.storage_base must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::production()
    }
}

/// Parse an environment variable if present, surfacing a descriptive error
/// on a malformed value rather than silently falling back to the default.
fn env_parsed<T: std::str::FromStr>(key: &str) -> anyhow::Result<Result<T, env::VarError>>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse::<T>().map(Ok).map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}")),
        Err(e) => Ok(Err(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_defaults_validate() {
        assert!(Config::production().validate().is_ok());
    }

    #[test]
    fn zero_thread_pool_fails_validation() {
        let mut config = Config::production();
        config.rpc.http_thread_pool = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_cache_threshold_fails_validation() {
        let mut config = Config::production();
        config.cache.cache_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn json_round_trip_preserves_fields() {
        let config = Config::testing();
        let json = config.to_json();
        let parsed = Config::from_json(&json).unwrap();
        assert_eq!(parsed.cache.max_cache_size_mb, config.cache.max_cache_size_mb);
        assert_eq!(parsed.sync.culler_period_secs, config.sync.culler_period_secs);
    }
}
