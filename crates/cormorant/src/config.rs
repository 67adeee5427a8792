//! Process configuration, read from the environment at startup.
//!
//! Every key is prefixed `CORMORANT_`; unknown variables are ignored.
//! Values that fail to parse fall back to their defaults with a warning,
//! except the admin key, which has no safe default in production and is
//! only defaulted for local runs.

use std::path::PathBuf;

use tracing::warn;

/// Runtime configuration shared process-wide, read-only after startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Storage root for project directories and the catalog.
    pub data_dir: PathBuf,
    /// Snapshot root.
    pub snapshots_dir: PathBuf,
    /// Files root (staged uploads + permanent files).
    pub files_dir: PathBuf,
    /// Process-wide admin secret; the only credential allowed to create
    /// projects and run backend administration.
    pub admin_key: String,
    /// HTTP bind address.
    pub host: String,
    pub port: u16,
    /// Engine worker thread hint.
    pub engine_threads: Option<i64>,
    /// Engine memory limit hint, e.g. "4GB".
    pub engine_memory_limit: Option<String>,
    /// Overall timeout for a mutating operation, seconds.
    pub operation_timeout_seconds: u64,
    /// Engine connect timeout, seconds.
    pub connection_timeout_seconds: u64,
    /// Idempotency replay TTL, seconds.
    pub idempotency_ttl_seconds: i64,
    /// Maximum accepted staged-file size in bytes.
    pub max_file_size_bytes: i64,
    /// Staged upload session TTL, hours.
    pub staging_ttl_hours: i64,
    /// Wire sessions allowed per workspace.
    pub pgwire_max_connections_per_workspace: i64,
    /// Idle threshold for the stale-session sweep, seconds.
    pub pgwire_idle_timeout_seconds: i64,
    /// Per-session memory limit handed to the wire server.
    pub pgwire_session_memory_limit: String,
    /// Per-query timeout handed to the wire server, seconds.
    pub pgwire_query_timeout_seconds: u64,
    /// S3-compat credentials.
    pub s3_access_key_id: String,
    pub s3_secret_access_key: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/data/cormorant"),
            snapshots_dir: PathBuf::from("/data/cormorant/snapshots"),
            files_dir: PathBuf::from("/data/cormorant/files"),
            admin_key: "cormorant-admin-dev".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            engine_threads: Some(4),
            engine_memory_limit: Some("4GB".to_string()),
            operation_timeout_seconds: 240,
            connection_timeout_seconds: 10,
            idempotency_ttl_seconds: 600,
            max_file_size_bytes: 10 * 1024 * 1024 * 1024,
            staging_ttl_hours: 24,
            pgwire_max_connections_per_workspace: 5,
            pgwire_idle_timeout_seconds: 3600,
            pgwire_session_memory_limit: "1GB".to_string(),
            pgwire_query_timeout_seconds: 120,
            s3_access_key_id: "cormorant".to_string(),
            s3_secret_access_key: "cormorant-secret".to_string(),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env_string(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "unparseable configuration value, using default");
            default
        }),
    }
}

impl Config {
    /// Load configuration from `CORMORANT_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let data_dir = env_string("CORMORANT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        // Snapshot and files roots default under the data root.
        let snapshots_dir = env_string("CORMORANT_SNAPSHOTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("snapshots"));
        let files_dir = env_string("CORMORANT_FILES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("files"));

        Self {
            admin_key: env_string("CORMORANT_ADMIN_KEY").unwrap_or(defaults.admin_key),
            host: env_string("CORMORANT_HOST").unwrap_or(defaults.host),
            port: env_parse("CORMORANT_PORT", defaults.port),
            engine_threads: env_string("CORMORANT_ENGINE_THREADS")
                .and_then(|v| v.parse().ok())
                .or(defaults.engine_threads),
            engine_memory_limit: env_string("CORMORANT_ENGINE_MEMORY_LIMIT")
                .or(defaults.engine_memory_limit),
            operation_timeout_seconds: env_parse(
                "CORMORANT_OPERATION_TIMEOUT",
                defaults.operation_timeout_seconds,
            ),
            connection_timeout_seconds: env_parse(
                "CORMORANT_CONNECTION_TIMEOUT",
                defaults.connection_timeout_seconds,
            ),
            idempotency_ttl_seconds: env_parse(
                "CORMORANT_IDEMPOTENCY_TTL",
                defaults.idempotency_ttl_seconds,
            ),
            max_file_size_bytes: env_parse(
                "CORMORANT_MAX_FILE_SIZE",
                defaults.max_file_size_bytes,
            ),
            staging_ttl_hours: env_parse("CORMORANT_STAGING_TTL_HOURS", defaults.staging_ttl_hours),
            pgwire_max_connections_per_workspace: env_parse(
                "CORMORANT_PGWIRE_MAX_CONNECTIONS",
                defaults.pgwire_max_connections_per_workspace,
            ),
            pgwire_idle_timeout_seconds: env_parse(
                "CORMORANT_PGWIRE_IDLE_TIMEOUT",
                defaults.pgwire_idle_timeout_seconds,
            ),
            pgwire_session_memory_limit: env_string("CORMORANT_PGWIRE_MEMORY_LIMIT")
                .unwrap_or(defaults.pgwire_session_memory_limit),
            pgwire_query_timeout_seconds: env_parse(
                "CORMORANT_PGWIRE_QUERY_TIMEOUT",
                defaults.pgwire_query_timeout_seconds,
            ),
            s3_access_key_id: env_string("CORMORANT_S3_ACCESS_KEY_ID")
                .unwrap_or(defaults.s3_access_key_id),
            s3_secret_access_key: env_string("CORMORANT_S3_SECRET_ACCESS_KEY")
                .unwrap_or(defaults.s3_secret_access_key),
            data_dir,
            snapshots_dir,
            files_dir,
        }
    }

    /// Engine tuning derived from configuration.
    pub fn engine_options(&self) -> cormorant_db::EngineOptions {
        cormorant_db::EngineOptions {
            threads: self.engine_threads,
            memory_limit: self.engine_memory_limit.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.operation_timeout_seconds, 240);
        assert_eq!(config.idempotency_ttl_seconds, 600);
        assert_eq!(config.port, 8000);
    }

    #[test]
    fn test_engine_options() {
        let config = Config::default();
        let options = config.engine_options();
        assert_eq!(options.threads, Some(4));
        assert_eq!(options.memory_limit.as_deref(), Some("4GB"));
    }
}
