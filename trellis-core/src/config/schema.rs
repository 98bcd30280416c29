//! Configuration schema for the plugin host.
//!
//! Layered resolution: built-in defaults, then a TOML file, then `TRELLIS_`
//! environment overrides. Validation runs once at load time.

use crate::plugin::health::HealthThresholds;
use crate::plugin::sandbox::{ByteSize, ResourceLimits};
use crate::types::HostInfo;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

/// Root configuration of the plugin host.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HostConfig {
    /// Directory scanned for plugin subdirectories
    pub plugins_root: PathBuf,

    /// Directory holding the installation ledger and persisted config values
    pub state_dir: PathBuf,

    /// Identity reported to plugins for requirement checks
    pub host: HostInfo,

    /// Discovery scanner settings
    #[validate(nested)]
    pub discovery: DiscoverySettings,

    /// Sandbox enforcement settings
    #[validate(nested)]
    pub sandbox: SandboxSettings,

    /// Health monitor settings
    #[validate(nested)]
    pub health: HealthSettings,

    /// Lifecycle policy settings
    pub lifecycle: LifecycleSettings,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            plugins_root: PathBuf::from("plugins"),
            state_dir: PathBuf::from("state"),
            host: HostInfo::new(
                "trellis",
                Version::parse(env!("CARGO_PKG_VERSION"))
                    .unwrap_or_else(|_| Version::new(0, 1, 0)),
            ),
            discovery: DiscoverySettings::default(),
            sandbox: SandboxSettings::default(),
            health: HealthSettings::default(),
            lifecycle: LifecycleSettings::default(),
        }
    }
}

/// Discovery scanner settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DiscoverySettings {
    /// How long a scanned catalog stays fresh before cached reads re-walk
    /// the filesystem
    #[validate(range(max = 3600))]
    pub catalog_ttl_secs: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self { catalog_ttl_secs: 30 }
    }
}

impl DiscoverySettings {
    /// Catalog TTL as a duration.
    pub fn catalog_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_ttl_secs)
    }
}

/// Sandbox enforcement settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SandboxSettings {
    /// Wall-clock deadline per plugin execution, seconds
    #[validate(range(min = 1, max = 600))]
    pub execution_timeout_secs: u64,

    /// Deadline per load-class attempt, seconds
    #[validate(range(min = 1, max = 600))]
    pub load_timeout_secs: u64,

    /// Soft memory ceiling per execution, mebibytes
    #[validate(range(min = 1, max = 4096))]
    pub memory_limit_mib: u64,

    /// Attempts for load-class operations on transient failure
    #[validate(range(max = 10))]
    pub max_retry_attempts: u32,

    /// Concurrent plugin executions across the host
    #[validate(range(min = 1, max = 1024))]
    pub max_concurrent: usize,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            execution_timeout_secs: 30,
            load_timeout_secs: 10,
            memory_limit_mib: 32,
            max_retry_attempts: 3,
            max_concurrent: 16,
        }
    }
}

impl SandboxSettings {
    /// Convert to the enforcer's resource limits.
    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            execution_timeout: Duration::from_secs(self.execution_timeout_secs),
            load_timeout: Duration::from_secs(self.load_timeout_secs),
            memory_limit: ByteSize::mib(self.memory_limit_mib),
            max_retry_attempts: self.max_retry_attempts,
            max_concurrent: self.max_concurrent,
        }
    }
}

/// Health monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HealthSettings {
    /// Errors within one window before a plugin is unhealthy
    #[validate(range(min = 1))]
    pub max_errors_per_plugin: u64,

    /// Fleet-wide unhealthy ratio above which auto-disable is suppressed
    #[validate(range(min = 0.0, max = 1.0))]
    pub max_unhealthy_ratio: f64,

    /// How long a computed verdict stays cached, seconds
    #[validate(range(min = 1, max = 86400))]
    pub cache_ttl_secs: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self { max_errors_per_plugin: 10, max_unhealthy_ratio: 0.5, cache_ttl_secs: 60 }
    }
}

impl HealthSettings {
    /// Convert to the monitor's thresholds.
    pub fn thresholds(&self) -> HealthThresholds {
        HealthThresholds {
            max_errors_per_plugin: self.max_errors_per_plugin,
            max_unhealthy_ratio: self.max_unhealthy_ratio,
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
        }
    }
}

/// Lifecycle policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    /// Whether persisted config values survive an uninstall for a future
    /// re-install
    pub keep_data_on_uninstall: bool,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self { keep_data_on_uninstall: true }
    }
}
