//! Lifecycle orchestrator tying discovery, ledger, configuration, sandbox,
//! and health together.
//!
//! The host holds explicit references to every subsystem and hands narrow
//! context views into plugin hooks; plugins never reach into ambient global
//! state. Transitions on the same plugin name are serialized by a per-name
//! lock; different names proceed concurrently.

use crate::config::HostConfig;
use crate::plugin::discovery::DiscoveryScanner;
use crate::plugin::error::{
    ConfigError, DiscoveryError, DiscoveryErrorKind, PluginError, PluginResult,
};
use crate::plugin::health::{HealthMonitor, HealthStatus};
use crate::plugin::hooks::HookRegistry;
use crate::plugin::ledger::{DisableReason, InstallationLedger, InstallationRecord};
use crate::plugin::lifecycle::PluginState;
use crate::plugin::sandbox::SandboxEnforcer;
use crate::plugin::security::SecurityPolicy;
use crate::plugin::settings::{FieldType, ResolvedItem, SettingsEngine};
use crate::plugin::traits::{Plugin, PluginRegistry};
use crate::types::HostInfo;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Lifecycle operation kinds for structured outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Install a plugin
    Install,
    /// Enable a plugin
    Enable,
    /// Disable a plugin
    Disable,
    /// Uninstall a plugin
    Uninstall,
}

/// Structured result of a lifecycle operation.
///
/// Idempotent repeats (installing an installed plugin, disabling a disabled
/// one) are successes with `changed = false`, not errors.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    /// Plugin the operation targeted
    pub plugin: String,
    /// Which operation ran
    pub operation: Operation,
    /// Whether any state changed
    pub changed: bool,
    /// Human-readable summary
    pub message: String,
}

impl Outcome {
    fn changed(plugin: &str, operation: Operation, message: impl Into<String>) -> Self {
        Self { plugin: plugin.to_string(), operation, changed: true, message: message.into() }
    }

    fn noop(plugin: &str, operation: Operation, message: impl Into<String>) -> Self {
        Self { plugin: plugin.to_string(), operation, changed: false, message: message.into() }
    }
}

/// Result of a discovery pass, including entry-point cross-checks.
#[derive(Debug)]
pub struct DiscoveryReport {
    /// Number of manifests in the published catalog
    pub plugins: usize,
    /// Per-directory failures plus manifests lacking a registered entry point
    pub errors: Vec<DiscoveryError>,
}

/// Result of fanning one event out to subscribed listeners.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    /// Event name
    pub event: String,
    /// Listeners that completed successfully
    pub delivered: usize,
    /// Listeners that failed; failures never propagate to the publisher
    pub failed: usize,
}

/// One row of the admin listing.
#[derive(Debug, Clone, Serialize)]
pub struct PluginListing {
    /// Plugin name
    pub plugin: String,
    /// Version from the catalog, if the plugin is currently on disk
    pub version: Option<String>,
    /// Lifecycle state from the ledger
    pub state: PluginState,
    /// Current health verdict
    pub health: HealthStatus,
}

/// The lifecycle orchestrator.
///
/// Owns the discovery scanner, installation ledger, configuration engine,
/// sandbox enforcer, health monitor, and extension-point registry, and
/// exposes the install/enable/disable/uninstall surface consumed by the
/// external admin layer.
pub struct PluginHost {
    host: HostInfo,
    keep_data_on_uninstall: bool,
    registry: PluginRegistry,
    scanner: DiscoveryScanner,
    ledger: InstallationLedger,
    settings: SettingsEngine,
    sandbox: SandboxEnforcer,
    health: Arc<HealthMonitor>,
    hooks: HookRegistry,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PluginHost {
    /// Build a host from configuration with the default security policy.
    pub fn new(config: HostConfig, registry: PluginRegistry) -> crate::Result<Self> {
        Self::with_policy(config, registry, SecurityPolicy::default())
    }

    /// Build a host with an explicit security policy.
    pub fn with_policy(
        config: HostConfig,
        registry: PluginRegistry,
        policy: SecurityPolicy,
    ) -> crate::Result<Self> {
        std::fs::create_dir_all(&config.state_dir)?;

        let scanner =
            DiscoveryScanner::new(&config.plugins_root, config.discovery.catalog_ttl());
        let ledger = InstallationLedger::open(config.state_dir.join("ledger.json"))
            .map_err(PluginError::from)?;
        let settings = SettingsEngine::open(config.state_dir.join("settings.json"))
            .map_err(PluginError::from)?;
        let health = Arc::new(HealthMonitor::new(config.health.thresholds()));
        let sandbox = SandboxEnforcer::new(config.sandbox.limits(), policy, health.clone());
        let hooks = HookRegistry::new();

        let host = Self {
            host: config.host,
            keep_data_on_uninstall: config.lifecycle.keep_data_on_uninstall,
            registry,
            scanner,
            ledger,
            settings,
            sandbox,
            health,
            hooks,
            locks: DashMap::new(),
        };
        host.resume();
        Ok(host)
    }

    /// Re-register state for plugins that were installed before a restart.
    ///
    /// Schemas come back for every installed plugin; extension points and
    /// health tracking come back for enabled ones. Lifecycle hooks do not
    /// re-run.
    fn resume(&self) {
        for record in self.ledger.installed() {
            let Some(plugin) = self.registry.get(&record.plugin) else {
                tracing::warn!(plugin = %record.plugin, "installed plugin has no registered entry point");
                continue;
            };
            self.settings.register_schema(&record.plugin, plugin.config_schema());
            if record.enabled {
                self.hooks.register_plugin(
                    &record.plugin,
                    plugin.routes(),
                    plugin.listeners(),
                    plugin.bindings(),
                );
                self.health.track(&record.plugin);
                tracing::info!(plugin = %record.plugin, "resumed enabled plugin");
            }
        }
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn plugin_for(&self, name: &str) -> PluginResult<Arc<dyn Plugin>> {
        self.registry
            .get(name)
            .ok_or_else(|| PluginError::NotRegistered { plugin: name.to_string() })
    }

    /// Run a discovery pass and cross-check entry-point registration.
    pub fn discover(&self) -> DiscoveryReport {
        let catalog = self.scanner.scan();
        let mut errors = catalog.errors().to_vec();
        for manifest in catalog.manifests() {
            if !self.registry.contains(&manifest.name) {
                errors.push(DiscoveryError {
                    directory: manifest.name.clone(),
                    kind: DiscoveryErrorKind::NoRegisteredEntryPoint,
                    reason: format!(
                        "manifest {:?} has no registered Plugin implementation",
                        manifest.name
                    ),
                });
            }
        }
        DiscoveryReport { plugins: catalog.len(), errors }
    }

    /// Install a plugin.
    ///
    /// Requires a discovered manifest and all declared dependencies to be
    /// installed already. The install hook runs sandboxed under the load
    /// retry policy. Installing an installed plugin is a no-op success.
    pub async fn install(&self, name: &str) -> PluginResult<Outcome> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        if self.ledger.is_installed(name) {
            return Ok(Outcome::noop(name, Operation::Install, "already installed"));
        }

        let catalog = self.scanner.cached();
        let manifest = catalog
            .manifest(name)
            .ok_or_else(|| PluginError::UnknownPlugin { plugin: name.to_string() })?
            .clone();
        let plugin = self.plugin_for(name)?;

        for dependency in &manifest.dependencies {
            if !self.ledger.is_installed(dependency) {
                return Err(PluginError::DependencyMissing {
                    plugin: name.to_string(),
                    dependency: dependency.clone(),
                });
            }
        }

        let ctx = Arc::new(self.sandbox.context(&manifest));
        {
            let plugin = plugin.clone();
            self.sandbox
                .execute_with_retry(name, "install", move || {
                    let plugin = plugin.clone();
                    let ctx = ctx.clone();
                    async move { plugin.on_install(&ctx).await }
                })
                .await?;
        }

        self.settings.register_schema(name, plugin.config_schema());
        self.ledger.mark_installed(name, &manifest.version.to_string())?;
        tracing::info!(plugin = %name, version = %manifest.version, "plugin installed");
        Ok(Outcome::changed(name, Operation::Install, "installed"))
    }

    /// Enable a plugin.
    ///
    /// Requires installation, a satisfied host-version requirement, and all
    /// required config keys resolving to values. On success the plugin's
    /// routes, listeners, and bindings are registered and health tracking
    /// starts. Enabling an enabled plugin is a no-op success.
    pub async fn enable(&self, name: &str) -> PluginResult<Outcome> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let record = self.ledger.record(name);
        let installed = record.as_ref().is_some_and(|r| r.installed);
        if !installed {
            return Err(PluginError::NotInstalled { plugin: name.to_string() });
        }
        if record.is_some_and(|r| r.enabled) {
            return Ok(Outcome::noop(name, Operation::Enable, "already enabled"));
        }

        let catalog = self.scanner.cached();
        let manifest = catalog
            .manifest(name)
            .ok_or_else(|| PluginError::UnknownPlugin { plugin: name.to_string() })?
            .clone();
        let plugin = self.plugin_for(name)?;

        let requirement = &manifest.requirements.min_host_version;
        if !requirement.matches(&self.host.version) {
            return Err(PluginError::RequirementNotMet {
                plugin: name.to_string(),
                required: requirement.to_string(),
                host: self.host.version.to_string(),
            });
        }

        if let Some(key) = self.settings.missing_required(name).into_iter().next() {
            return Err(ConfigError::RequiredValue { plugin: name.to_string(), key }.into());
        }

        let ctx = Arc::new(self.sandbox.context(&manifest));
        {
            let plugin = plugin.clone();
            let ctx = ctx.clone();
            self.sandbox
                .execute(name, "enable", async move { plugin.on_enable(&ctx).await })
                .await?;
        }

        self.hooks.register_plugin(name, plugin.routes(), plugin.listeners(), plugin.bindings());
        self.health.track(name);
        self.ledger.mark_enabled(name)?;
        tracing::info!(plugin = %name, "plugin enabled");
        Ok(Outcome::changed(name, Operation::Enable, "enabled"))
    }

    /// Disable a plugin, recording why.
    ///
    /// Deregisters extension points and freezes health intake; historical
    /// health counts are retained. Disabling a disabled plugin is a no-op
    /// success.
    pub async fn disable(&self, name: &str, reason: DisableReason) -> PluginResult<Outcome> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let record = self
            .ledger
            .record(name)
            .filter(|r| r.installed)
            .ok_or_else(|| PluginError::NotInstalled { plugin: name.to_string() })?;
        if !record.enabled {
            return Ok(Outcome::noop(name, Operation::Disable, "already disabled"));
        }

        let plugin = self.plugin_for(name)?;
        let catalog = self.scanner.cached();
        let ctx = Arc::new(match catalog.manifest(name) {
            Some(manifest) => self.sandbox.context(manifest),
            // Directory removed from disk while enabled; run the hook with
            // no grants.
            None => self.sandbox.context_named(name),
        });
        {
            let plugin = plugin.clone();
            let ctx = ctx.clone();
            self.sandbox
                .execute(name, "disable", async move { plugin.on_disable(&ctx).await })
                .await?;
        }

        self.hooks.deregister_plugin(name);
        self.health.stop_tracking(name);
        self.ledger.mark_disabled(name, reason)?;
        tracing::info!(plugin = %name, reason = ?reason, "plugin disabled");
        Ok(Outcome::changed(name, Operation::Disable, "disabled"))
    }

    /// Uninstall a plugin.
    ///
    /// Requires the plugin to be disabled first. Persisted config values are
    /// deleted or retained per the `keep_data_on_uninstall` policy; the
    /// installation record itself is always retained as history.
    pub async fn uninstall(&self, name: &str) -> PluginResult<Outcome> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let Some(record) = self.ledger.record(name).filter(|r| r.installed) else {
            return Ok(Outcome::noop(name, Operation::Uninstall, "not installed"));
        };
        if record.enabled {
            return Err(PluginError::StillEnabled { plugin: name.to_string() });
        }

        let plugin = self.plugin_for(name)?;
        let catalog = self.scanner.cached();
        let ctx = Arc::new(match catalog.manifest(name) {
            Some(manifest) => self.sandbox.context(manifest),
            None => self.sandbox.context_named(name),
        });
        {
            let plugin = plugin.clone();
            let ctx = ctx.clone();
            self.sandbox
                .execute(name, "uninstall", async move { plugin.on_uninstall(&ctx).await })
                .await?;
        }

        if !self.keep_data_on_uninstall {
            self.settings.delete_plugin_values(name).map_err(PluginError::from)?;
        }
        self.settings.unregister_schema(name);
        self.health.forget(name);
        self.ledger.mark_uninstalled(name)?;
        tracing::info!(plugin = %name, kept_data = self.keep_data_on_uninstall, "plugin uninstalled");
        Ok(Outcome::changed(name, Operation::Uninstall, "uninstalled"))
    }

    /// Invoke a button-type config action through the sandbox.
    pub async fn invoke_action(
        &self,
        name: &str,
        key: &str,
        params: Value,
    ) -> PluginResult<Value> {
        if !self.ledger.is_enabled(name) {
            return Err(PluginError::NotEnabled { plugin: name.to_string() });
        }
        let field = self.settings.field(name, key).ok_or_else(|| ConfigError::UnknownKey {
            plugin: name.to_string(),
            key: key.to_string(),
        })?;
        if field.field_type != FieldType::Button {
            return Err(ConfigError::ValidationFailed {
                plugin: name.to_string(),
                key: key.to_string(),
                reason: "not a button field".to_string(),
            }
            .into());
        }
        let action =
            field.button.map(|b| b.action).unwrap_or_else(|| key.to_string());

        let plugin = self.plugin_for(name)?;
        let catalog = self.scanner.cached();
        let ctx = Arc::new(match catalog.manifest(name) {
            Some(manifest) => self.sandbox.context(manifest),
            None => self.sandbox.context_named(name),
        });
        self.sandbox
            .execute(name, "action", async move {
                plugin.invoke_action(&action, params, &ctx).await
            })
            .await
    }

    /// Evaluate health verdicts and auto-disable unhealthy plugins.
    ///
    /// Each plugin is disabled at most once per verdict window. When the
    /// fleet-wide unhealthy ratio exceeds the configured maximum the whole
    /// sweep is suppressed to avoid cascading disablement during a
    /// host-wide incident.
    pub async fn run_health_sweep(&self) -> Vec<Outcome> {
        let fleet = self.health.fleet();
        if fleet.degraded {
            tracing::warn!(
                unhealthy = fleet.unhealthy,
                tracked = fleet.tracked,
                "fleet degraded; auto-disable suppressed"
            );
            return Vec::new();
        }

        let mut outcomes = Vec::new();
        for name in self.ledger.enabled_plugins() {
            if self.health.status(&name) != HealthStatus::Unhealthy {
                continue;
            }
            if !self.health.claim_auto_disable(&name) {
                continue;
            }
            match self.disable(&name, DisableReason::HealthAutoDisable).await {
                Ok(outcome) => {
                    tracing::warn!(plugin = %name, "plugin auto-disabled by health monitor");
                    outcomes.push(outcome);
                },
                Err(e) => {
                    tracing::error!(plugin = %name, error = %e, "auto-disable failed");
                },
            }
        }
        outcomes
    }

    /// Installed and enabled plugins whose manifest carries the tag.
    ///
    /// The single coupling point peer subsystems use to find providers
    /// (e.g. an SMS dispatcher filtering for its channel marker).
    pub fn providers(&self, tag: &str) -> Vec<Arc<dyn Plugin>> {
        let catalog = self.scanner.cached();
        catalog
            .tagged(tag)
            .into_iter()
            .filter(|manifest| self.ledger.is_enabled(&manifest.name))
            .filter_map(|manifest| self.registry.get(&manifest.name))
            .collect()
    }

    /// Fan an event out to all subscribed listeners, each through the
    /// sandbox. Listener failures are logged and counted against the owning
    /// plugin's health; the publisher never sees them.
    pub async fn dispatch_event(&self, event: &str, payload: Value) -> DispatchReport {
        let listeners = self.hooks.listeners_for(event);
        let mut delivered = 0;
        let mut failed = 0;
        for (plugin_name, listener) in listeners {
            let event_name = event.to_string();
            let event_payload = payload.clone();
            let result = self
                .sandbox
                .execute(&plugin_name, "listener", async move {
                    listener.handle(&event_name, &event_payload).await
                })
                .await;
            match result {
                Ok(()) => delivered += 1,
                Err(_) => failed += 1,
            }
        }
        DispatchReport { event: event.to_string(), delivered, failed }
    }

    /// Admin listing: ledger records joined with catalog versions and
    /// health verdicts.
    pub fn list(&self) -> Vec<PluginListing> {
        let catalog = self.scanner.cached();
        let mut listings: Vec<PluginListing> = catalog
            .manifests()
            .map(|manifest| PluginListing {
                plugin: manifest.name.clone(),
                version: Some(manifest.version.to_string()),
                state: self.ledger.state(&manifest.name),
                health: self.health.status(&manifest.name),
            })
            .collect();
        // Installed plugins whose directory vanished still show up.
        for record in self.ledger.installed() {
            if catalog.manifest(&record.plugin).is_none() {
                listings.push(PluginListing {
                    plugin: record.plugin.clone(),
                    version: None,
                    state: record.state(),
                    health: self.health.status(&record.plugin),
                });
            }
        }
        listings.sort_by(|a, b| a.plugin.cmp(&b.plugin));
        listings
    }

    /// Lifecycle state of one plugin.
    pub fn state(&self, name: &str) -> PluginState {
        self.ledger.state(name)
    }

    /// Installation record of one plugin.
    pub fn record(&self, name: &str) -> Option<InstallationRecord> {
        self.ledger.record(name)
    }

    /// Health verdict of one plugin.
    pub fn health_status(&self, name: &str) -> HealthStatus {
        self.health.status(name)
    }

    /// Shared handle to the health monitor.
    pub fn health_monitor(&self) -> Arc<HealthMonitor> {
        self.health.clone()
    }

    /// Resolved configuration of one plugin, ordered by `(group, order)`.
    pub fn resolve_config(&self, name: &str) -> Vec<ResolvedItem> {
        self.settings.resolve(name)
    }

    /// Validate and persist one config value.
    pub fn set_config(&self, name: &str, key: &str, value: Value) -> PluginResult<()> {
        self.settings.set(name, key, value).map_err(PluginError::from)
    }

    /// Effective value of one config key.
    pub fn get_config(&self, name: &str, key: &str) -> PluginResult<Option<Value>> {
        self.settings.get(name, key).map_err(PluginError::from)
    }

    /// The extension-point registry, for the routing and event
    /// collaborators.
    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// The configuration engine.
    pub fn settings(&self) -> &SettingsEngine {
        &self.settings
    }

    /// Identity reported to plugins.
    pub fn host_info(&self) -> &HostInfo {
        &self.host
    }
}
