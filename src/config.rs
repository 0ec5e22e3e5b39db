//! Configuration Management
//!
//! Provides functionality for:
//! - Loading/saving conductor configuration (YAML)
//! - Configuration validation
//! - A shared handle so periodic tasks pick up changes once per cycle

use crate::error::{ConductorError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How a disagreement between the record and the BMC is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncPolicy {
    /// Hardware is truth: overwrite the recorded state
    #[default]
    ForceDatabase,
    /// The record is truth: command the BMC back to it
    ForceHardware,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory for the rotating JSON log; console only when unset
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_prefix")]
    pub file_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConductorConfig {
    /// Identity of this conductor process
    #[serde(default = "default_conductor_id")]
    pub conductor_id: String,
    /// Nodes are only ever owned by conductors of the same group
    #[serde(default)]
    pub conductor_group: String,

    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    /// Width of the per-cycle worker pool
    #[serde(default = "default_sync_workers")]
    pub sync_workers: usize,
    #[serde(default)]
    pub sync_policy: SyncPolicy,
    /// Consecutive failed cycles before a node is put into power-failure maintenance
    #[serde(default = "default_power_failure_threshold")]
    pub power_failure_threshold: u32,
    #[serde(default = "default_fault_recovery_interval_secs")]
    pub fault_recovery_interval_secs: u64,
    /// Age after which a node lock is presumed abandoned
    #[serde(default = "default_lock_stale_after_secs")]
    pub lock_stale_after_secs: u64,
    #[serde(default = "default_hardware_call_timeout_secs")]
    pub hardware_call_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
    /// Scheduler endpoint receiving power events; no delivery when unset
    #[serde(default)]
    pub notification_webhook: Option<String>,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    /// Virtual nodes per conductor on the hash ring
    #[serde(default = "default_hash_replicas")]
    pub hash_replicas: u32,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
            file_prefix: default_log_prefix(),
        }
    }
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            conductor_id: default_conductor_id(),
            conductor_group: String::new(),
            sync_interval_secs: default_sync_interval_secs(),
            sync_workers: default_sync_workers(),
            sync_policy: SyncPolicy::default(),
            power_failure_threshold: default_power_failure_threshold(),
            fault_recovery_interval_secs: default_fault_recovery_interval_secs(),
            lock_stale_after_secs: default_lock_stale_after_secs(),
            hardware_call_timeout_secs: default_hardware_call_timeout_secs(),
            notifications_enabled: default_true(),
            notification_webhook: None,
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            hash_replicas: default_hash_replicas(),
            logging: LoggingConfig::default(),
        }
    }
}

// Default value functions
fn default_conductor_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
fn default_sync_interval_secs() -> u64 { 60 }
fn default_sync_workers() -> usize { (num_cpus::get() * 2).clamp(2, 16) }
fn default_power_failure_threshold() -> u32 { 3 }
fn default_fault_recovery_interval_secs() -> u64 { 300 }
fn default_lock_stale_after_secs() -> u64 { 600 }
fn default_hardware_call_timeout_secs() -> u64 { 30 }
fn default_heartbeat_interval_secs() -> u64 { 10 }
fn default_heartbeat_timeout_secs() -> u64 { 60 }
fn default_hash_replicas() -> u32 { 64 }
fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_log_prefix() -> String { "power-conductor".to_string() }

impl ConductorConfig {
    /// Load configuration from the first well-known location that exists,
    /// writing a default file to `path` when none does.
    pub fn load(path: &Path) -> Result<Self> {
        let config_paths = [
            path.to_path_buf(),
            PathBuf::from("conductor.yml"),
            PathBuf::from("/etc/power-conductor/conductor.yml"),
        ];

        for candidate in &config_paths {
            if candidate.exists() {
                return Self::load_from_file(candidate);
            }
        }

        debug!("Configuration file not found at {:?}, creating default", path);
        let config = Self::default();
        config.save(path)?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConductorError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| ConductorError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| ConductorError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    ConductorError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        // Write atomically using a temporary file
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, yaml)
            .map_err(|e| ConductorError::Config(format!("Failed to write config: {}", e)))?;
        fs::rename(&temp_path, path)
            .map_err(|e| ConductorError::Config(format!("Failed to save config: {}", e)))?;

        Ok(())
    }

    /// Get the per-user configuration file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("power-conductor")
            .join("conductor.yml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.conductor_id.trim().is_empty() {
            return Err(ConductorError::config("conductor_id must not be empty"));
        }
        if self.sync_workers == 0 {
            return Err(ConductorError::config("sync_workers must be at least 1"));
        }
        if self.power_failure_threshold == 0 {
            return Err(ConductorError::config("power_failure_threshold must be at least 1"));
        }
        if self.sync_interval_secs == 0 || self.fault_recovery_interval_secs == 0 {
            return Err(ConductorError::config("sync and recovery intervals must be non-zero"));
        }
        if self.heartbeat_interval_secs == 0 || self.heartbeat_timeout_secs < self.heartbeat_interval_secs {
            return Err(ConductorError::config(
                "heartbeat_timeout_secs must be at least heartbeat_interval_secs",
            ));
        }
        if self.hash_replicas == 0 {
            return Err(ConductorError::config("hash_replicas must be at least 1"));
        }
        if self.hardware_call_timeout_secs == 0 {
            return Err(ConductorError::config("hardware_call_timeout_secs must be non-zero"));
        }
        // A forced correction holds the lock across a get and a set
        let longest_hold = self.hardware_call_timeout_secs.saturating_mul(2);
        if self.lock_stale_after_secs <= longest_hold {
            return Err(ConductorError::config(format!(
                "lock_stale_after_secs ({}) must exceed {}s, twice hardware_call_timeout_secs",
                self.lock_stale_after_secs, longest_hold
            )));
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn fault_recovery_interval(&self) -> Duration {
        Duration::from_secs(self.fault_recovery_interval_secs)
    }

    pub fn lock_stale_after(&self) -> Duration {
        Duration::from_secs(self.lock_stale_after_secs)
    }

    pub fn hardware_call_timeout(&self) -> Duration {
        Duration::from_secs(self.hardware_call_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

/// Shared, hot-swappable configuration.
///
/// Periodic tasks take one [`snapshot`](ConfigHandle::snapshot) at the start
/// of each cycle and use it for the whole cycle.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<ConductorConfig>>,
}

impl ConfigHandle {
    pub fn new(config: ConductorConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn snapshot(&self) -> ConductorConfig {
        self.inner.read().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut ConductorConfig)) {
        let mut config = self.inner.write();
        f(&mut config);
    }
}
