//! Installation ledger: persisted per-plugin lifecycle state.
//!
//! One record per plugin name. Records are created on first install and
//! updated in place on every transition; they are never removed, so the
//! ledger doubles as audit history. The `enabled => installed` invariant is
//! enforced here, not by callers.

use crate::plugin::error::LedgerError;
use crate::plugin::lifecycle::PluginState;
use crate::types::Timestamp;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Why a plugin was disabled, kept for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisableReason {
    /// An operator disabled the plugin through the admin surface
    Manual,
    /// The health monitor forced the plugin off
    HealthAutoDisable,
}

/// Persisted lifecycle state of one plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallationRecord {
    /// Plugin name (unique key)
    pub plugin: String,

    /// Manifest version at install time
    pub version: String,

    /// Whether the plugin is currently installed
    pub installed: bool,

    /// Whether the plugin is currently enabled
    pub enabled: bool,

    /// When the plugin was last installed
    pub installed_at: Option<Timestamp>,

    /// When the plugin was last uninstalled
    pub uninstalled_at: Option<Timestamp>,

    /// When the plugin was last enabled
    pub enabled_at: Option<Timestamp>,

    /// When the plugin was last disabled
    pub disabled_at: Option<Timestamp>,

    /// Reason for the most recent disable, if any
    #[serde(default)]
    pub last_disable_reason: Option<DisableReason>,
}

impl InstallationRecord {
    fn new(plugin: &str, version: &str) -> Self {
        Self {
            plugin: plugin.to_string(),
            version: version.to_string(),
            installed: true,
            enabled: false,
            installed_at: Some(Utc::now()),
            uninstalled_at: None,
            enabled_at: None,
            disabled_at: None,
            last_disable_reason: None,
        }
    }

    /// Derive the lifecycle state from the record's flags.
    pub fn state(&self) -> PluginState {
        match (self.installed, self.enabled) {
            (true, true) => PluginState::Enabled,
            (true, false) if self.disabled_at.is_some() => PluginState::Disabled,
            (true, false) => PluginState::Installed,
            (false, _) if self.uninstalled_at.is_some() => PluginState::Uninstalled,
            (false, _) => PluginState::Unknown,
        }
    }
}

/// Concurrent store of installation records with JSON file persistence.
///
/// Writes go through a temp file and an atomic rename so a crash mid-write
/// never corrupts the ledger.
pub struct InstallationLedger {
    path: Option<PathBuf>,
    records: DashMap<String, InstallationRecord>,
}

impl InstallationLedger {
    /// Open a ledger backed by the given JSON file, loading it if present.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let records = DashMap::new();
        if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| LedgerError::Load { reason: e.to_string() })?;
            let loaded: BTreeMap<String, InstallationRecord> = serde_json::from_str(&text)
                .map_err(|e| LedgerError::Load { reason: e.to_string() })?;
            for (name, record) in loaded {
                records.insert(name, record);
            }
        }
        Ok(Self { path: Some(path), records })
    }

    /// Ledger without file persistence. Tests and embedded use.
    pub fn in_memory() -> Self {
        Self { path: None, records: DashMap::new() }
    }

    /// Fetch a copy of a plugin's record.
    pub fn record(&self, plugin: &str) -> Option<InstallationRecord> {
        self.records.get(plugin).map(|r| r.clone())
    }

    /// Lifecycle state of a plugin, `Unknown` when no record exists.
    pub fn state(&self, plugin: &str) -> PluginState {
        self.records.get(plugin).map_or(PluginState::Unknown, |r| r.state())
    }

    /// Whether the plugin is currently installed.
    pub fn is_installed(&self, plugin: &str) -> bool {
        self.records.get(plugin).is_some_and(|r| r.installed)
    }

    /// Whether the plugin is currently enabled.
    pub fn is_enabled(&self, plugin: &str) -> bool {
        self.records.get(plugin).is_some_and(|r| r.enabled)
    }

    /// All records for currently installed plugins.
    pub fn installed(&self) -> Vec<InstallationRecord> {
        self.records.iter().filter(|r| r.installed).map(|r| r.clone()).collect()
    }

    /// Names of currently enabled plugins.
    pub fn enabled_plugins(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.enabled)
            .map(|r| r.key().clone())
            .collect()
    }

    /// Record a successful install.
    ///
    /// Idempotent: an already-installed plugin is left untouched, existing
    /// timestamps included.
    pub fn mark_installed(
        &self,
        plugin: &str,
        version: &str,
    ) -> Result<InstallationRecord, LedgerError> {
        let record = {
            let mut entry = self
                .records
                .entry(plugin.to_string())
                .or_insert_with(|| InstallationRecord::new(plugin, version));
            if !entry.installed {
                // Re-install of a previously uninstalled plugin.
                entry.installed = true;
                entry.enabled = false;
                entry.version = version.to_string();
                entry.installed_at = Some(Utc::now());
            }
            entry.clone()
        };
        self.persist()?;
        Ok(record)
    }

    /// Record a successful enable. Fails when the plugin is not installed.
    pub fn mark_enabled(&self, plugin: &str) -> Result<InstallationRecord, LedgerError> {
        let record = {
            let mut entry = self
                .records
                .get_mut(plugin)
                .ok_or_else(|| LedgerError::NotInstalled { plugin: plugin.to_string() })?;
            if !entry.installed {
                return Err(LedgerError::NotInstalled { plugin: plugin.to_string() });
            }
            if !entry.enabled {
                entry.enabled = true;
                entry.enabled_at = Some(Utc::now());
            }
            entry.clone()
        };
        self.persist()?;
        Ok(record)
    }

    /// Record a successful disable with its reason.
    pub fn mark_disabled(
        &self,
        plugin: &str,
        reason: DisableReason,
    ) -> Result<InstallationRecord, LedgerError> {
        let record = {
            let mut entry = self
                .records
                .get_mut(plugin)
                .ok_or_else(|| LedgerError::NotInstalled { plugin: plugin.to_string() })?;
            if entry.enabled {
                entry.enabled = false;
                entry.disabled_at = Some(Utc::now());
                entry.last_disable_reason = Some(reason);
            }
            entry.clone()
        };
        self.persist()?;
        Ok(record)
    }

    /// Record a successful uninstall. The record is retained for history.
    pub fn mark_uninstalled(&self, plugin: &str) -> Result<InstallationRecord, LedgerError> {
        let record = {
            let mut entry = self
                .records
                .get_mut(plugin)
                .ok_or_else(|| LedgerError::NotInstalled { plugin: plugin.to_string() })?;
            if entry.installed {
                entry.installed = false;
                entry.enabled = false;
                entry.uninstalled_at = Some(Utc::now());
            }
            entry.clone()
        };
        self.persist()?;
        Ok(record)
    }

    fn persist(&self) -> Result<(), LedgerError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot: BTreeMap<String, InstallationRecord> =
            self.records.iter().map(|r| (r.key().clone(), r.clone())).collect();
        let text = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| LedgerError::Persist { reason: e.to_string() })?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(|e| LedgerError::Persist { reason: e.to_string() })?;
        std::fs::rename(&tmp, path).map_err(|e| LedgerError::Persist { reason: e.to_string() })?;
        Ok(())
    }
}
