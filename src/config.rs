//! Application configuration, loaded once at process start from YAML with
//! per-field environment overrides (the same convention as the teacher's
//! `PG_POOL_SIZE` override in its database layer).

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    /// One of "never", "hourly", "daily".
    #[serde(default = "default_rotation")]
    pub rotation: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub use_json: bool,
    #[serde(default = "default_true")]
    pub enable_tracing: bool,
}

fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_log_file() -> String {
    "portfolio_accounting.log".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

fn default_max_batch_size() -> usize {
    1000
}
fn default_page_size() -> usize {
    50
}
fn default_max_page_size() -> usize {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvConfig {
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_sort_threshold_bytes")]
    pub sort_threshold_bytes: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_max_errors_per_file")]
    pub max_errors_per_file: usize,
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
}

fn default_max_file_size_bytes() -> u64 {
    1024 * 1024 * 1024
}
fn default_sort_threshold_bytes() -> u64 {
    50 * 1024 * 1024
}
fn default_chunk_size() -> usize {
    10_000
}
fn default_max_errors_per_file() -> usize {
    10_000
}
fn default_working_dir() -> String {
    std::env::temp_dir().to_string_lossy().into_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_optimistic_lock_retry_bound")]
    pub optimistic_lock_retry_bound: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_optimistic_lock_retry_bound() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_backoff_ms")]
    pub retry_base_backoff_ms: u64,
    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,
    #[serde(default = "default_circuit_cooldown_secs")]
    pub circuit_cooldown_secs: u64,
    #[serde(default = "default_circuit_success_threshold")]
    pub circuit_success_threshold: u32,
}

fn default_retry_max_attempts() -> u32 {
    5
}
fn default_retry_base_backoff_ms() -> u64 {
    50
}
fn default_circuit_failure_threshold() -> u32 {
    5
}
fn default_circuit_cooldown_secs() -> u64 {
    30
}
fn default_circuit_success_threshold() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub csv: CsvConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            log_file: default_log_file(),
            rotation: default_rotation(),
            log_level: default_log_level(),
            use_json: false,
            enable_tracing: true,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_addr: default_bind_addr(), port: default_port() }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size_bytes(),
            sort_threshold_bytes: default_sort_threshold_bytes(),
            chunk_size: default_chunk_size(),
            max_errors_per_file: default_max_errors_per_file(),
            working_dir: default_working_dir(),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            optimistic_lock_retry_bound: default_optimistic_lock_retry_bound(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_backoff_ms: default_retry_base_backoff_ms(),
            circuit_failure_threshold: default_circuit_failure_threshold(),
            circuit_cooldown_secs: default_circuit_cooldown_secs(),
            circuit_success_threshold: default_circuit_success_threshold(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a YAML file, then applies a small set of
    /// environment overrides (`DATABASE_URL`, `PG_POOL_SIZE`) on top, mirroring
    /// the teacher's env-override convention for database settings.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.as_ref().display()))?;
        let mut config: AppConfig = serde_yaml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.as_ref().display()))?;

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(size) = std::env::var("PG_POOL_SIZE") {
            if let Ok(size) = size.parse() {
                config.database.max_connections = size;
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_yaml() {
        let yaml = "database:\n  url: postgres://localhost/test\n";
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.batch.max_batch_size, 1000);
        assert_eq!(config.csv.chunk_size, 10_000);
    }
}
