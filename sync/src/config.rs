//! Engine configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::EngineError;
use crate::logging::LogFormat;

/// Configuration for the sync engine.
///
/// Can be loaded from a TOML file via [`SyncConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Data directory: the KV store and the sidecar state file live here.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Total staging budget for unconfirmed chunk data, in MiB.
    #[serde(default = "default_max_disk_pool_buffer_mb")]
    pub max_disk_pool_buffer_mb: u64,

    /// Per-data-root staging budget, in MiB.
    #[serde(default = "default_max_disk_pool_data_root_buffer_mb")]
    pub max_disk_pool_data_root_buffer_mb: u64,

    /// How long an unconfirmed data root may sit in the disk pool, seconds.
    #[serde(default = "default_data_root_expiration_secs")]
    pub disk_pool_data_root_expiration_secs: u64,

    /// Free disk space floor in bytes; below it, sync pauses and new chunks
    /// are refused unless the caller opts out.
    #[serde(default = "default_disk_data_buffer_size")]
    pub disk_data_buffer_size: u64,

    /// Period of the free-space check that drives the sync loop, ms.
    #[serde(default = "default_disk_space_check_frequency_ms")]
    pub disk_space_check_frequency_ms: u64,

    /// Period of the disk-pool scan, ms.
    #[serde(default = "default_disk_pool_scan_frequency_ms")]
    pub disk_pool_scan_frequency_ms: u64,

    /// Period of the expired-data-root sweep, ms.
    #[serde(default = "default_remove_expired_frequency_ms")]
    pub remove_expired_data_roots_frequency_ms: u64,

    /// Period of the peer sync-record refresh, ms.
    #[serde(default = "default_peer_sync_records_frequency_ms")]
    pub peer_sync_records_frequency_ms: u64,

    /// Delay before a failed migration step is retried, ms.
    #[serde(default = "default_migration_retry_delay_ms")]
    pub migration_retry_delay_ms: u64,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log filter directive (e.g. "info", "warn,loom_sync=debug").
    /// Empty means the built-in default; `RUST_LOG` overrides either.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_data_dir() -> PathBuf {
    PathBuf::from("./loom_data")
}

fn default_max_disk_pool_buffer_mb() -> u64 {
    2048
}

fn default_max_disk_pool_data_root_buffer_mb() -> u64 {
    512
}

fn default_data_root_expiration_secs() -> u64 {
    2 * 60 * 60
}

fn default_disk_data_buffer_size() -> u64 {
    20 * (1 << 30)
}

fn default_disk_space_check_frequency_ms() -> u64 {
    30_000
}

fn default_disk_pool_scan_frequency_ms() -> u64 {
    10_000
}

fn default_remove_expired_frequency_ms() -> u64 {
    60_000
}

fn default_peer_sync_records_frequency_ms() -> u64 {
    120_000
}

fn default_migration_retry_delay_ms() -> u64 {
    10_000
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl SyncConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Persistence(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, EngineError> {
        toml::from_str(s).map_err(|e| EngineError::Persistence(e.to_string()))
    }

    /// Total disk-pool budget in bytes.
    pub fn max_disk_pool_bytes(&self) -> u64 {
        self.max_disk_pool_buffer_mb * (1 << 20)
    }

    /// Per-root disk-pool budget in bytes.
    pub fn max_disk_pool_data_root_bytes(&self) -> u64 {
        self.max_disk_pool_data_root_buffer_mb * (1 << 20)
    }

    /// Data-root expiration in microseconds.
    pub fn data_root_expiration_micros(&self) -> u64 {
        self.disk_pool_data_root_expiration_secs * 1_000_000
    }

    /// Initialise the global tracing subscriber as configured. Call once
    /// at process start, before spawning the engine.
    pub fn init_logging(&self) {
        crate::logging::init_logging(LogFormat::parse(&self.log_format), &self.log_level);
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_disk_pool_buffer_mb: default_max_disk_pool_buffer_mb(),
            max_disk_pool_data_root_buffer_mb: default_max_disk_pool_data_root_buffer_mb(),
            disk_pool_data_root_expiration_secs: default_data_root_expiration_secs(),
            disk_data_buffer_size: default_disk_data_buffer_size(),
            disk_space_check_frequency_ms: default_disk_space_check_frequency_ms(),
            disk_pool_scan_frequency_ms: default_disk_pool_scan_frequency_ms(),
            remove_expired_data_roots_frequency_ms: default_remove_expired_frequency_ms(),
            peer_sync_records_frequency_ms: default_peer_sync_records_frequency_ms(),
            migration_retry_delay_ms: default_migration_retry_delay_ms(),
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}

/// Source of the free-space figure consulted before write-enabling paths.
/// Injected so tests can simulate a full disk.
pub trait DiskSpace: Send + Sync {
    fn free_bytes(&self) -> u64;
}

/// Reports unlimited free space — for deployments where an outer layer
/// already watches the disk.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnlimitedDiskSpace;

impl DiskSpace for UnlimitedDiskSpace {
    fn free_bytes(&self) -> u64 {
        u64::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = SyncConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.max_disk_pool_buffer_mb, 2048);
        assert_eq!(config.disk_pool_scan_frequency_ms, 10_000);
        assert_eq!(config.log_format, "human");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn partial_toml_overrides() {
        let toml = r#"
            max_disk_pool_buffer_mb = 16
            disk_pool_data_root_expiration_secs = 60
        "#;
        let config = SyncConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.max_disk_pool_buffer_mb, 16);
        assert_eq!(config.data_root_expiration_micros(), 60_000_000);
        assert_eq!(config.max_disk_pool_data_root_buffer_mb, 512); // default
    }

    #[test]
    fn missing_file_returns_error() {
        assert!(SyncConfig::from_toml_file("/nonexistent/loom.toml").is_err());
    }

    #[test]
    fn budget_conversions() {
        let config = SyncConfig {
            max_disk_pool_buffer_mb: 1,
            ..Default::default()
        };
        assert_eq!(config.max_disk_pool_bytes(), 1 << 20);
    }
}
