//! Core plugin trait and the entry-point registry.
//!
//! Plugins are resolved through explicit registration: each one exposes a
//! single well-typed entry point implementing [`Plugin`], registered with
//! the [`PluginRegistry`] at process start. Nothing here parses source text
//! or guesses symbol names: the manifest on disk carries identity and
//! capability truth, the registry carries the code.

use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::hooks::{ListenerDef, RouteDef, ServiceBinding};
use crate::plugin::manifest::PluginManifest;
use crate::plugin::sandbox::SandboxContext;
use crate::plugin::settings::ConfigField;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

/// Entry point every plugin implements.
///
/// Lifecycle hooks receive a [`SandboxContext`] carrying the plugin's
/// granted capabilities and memory ledger; hooks are expected to gate
/// dangerous operations through it. All hooks default to no-ops so a plugin
/// only implements what it needs.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// The plugin's manifest. Must match the manifest discovered on disk.
    fn manifest(&self) -> PluginManifest;

    /// Declared configuration schema.
    fn config_schema(&self) -> Vec<ConfigField> {
        Vec::new()
    }

    /// Route group contributed to the host router while enabled.
    fn routes(&self) -> Vec<RouteDef> {
        Vec::new()
    }

    /// Event listeners attached while enabled.
    fn listeners(&self) -> Vec<ListenerDef> {
        Vec::new()
    }

    /// Named services exposed to peer modules while enabled.
    fn bindings(&self) -> Vec<ServiceBinding> {
        Vec::new()
    }

    /// Called once when the plugin is installed.
    async fn on_install(&self, _ctx: &SandboxContext) -> PluginResult<()> {
        Ok(())
    }

    /// Called when the plugin transitions to enabled.
    async fn on_enable(&self, _ctx: &SandboxContext) -> PluginResult<()> {
        Ok(())
    }

    /// Called when the plugin transitions to disabled.
    async fn on_disable(&self, _ctx: &SandboxContext) -> PluginResult<()> {
        Ok(())
    }

    /// Called when the plugin is uninstalled.
    async fn on_uninstall(&self, _ctx: &SandboxContext) -> PluginResult<()> {
        Ok(())
    }

    /// Handle a button-type config action.
    async fn invoke_action(
        &self,
        action: &str,
        _params: Value,
        _ctx: &SandboxContext,
    ) -> PluginResult<Value> {
        Err(PluginError::HookFailed {
            plugin: self.manifest().name,
            hook: format!("action:{action}"),
            reason: "plugin declares no action handler".to_string(),
        })
    }
}

/// Name-indexed table of registered plugin entry points.
///
/// Populated at process start; the orchestrator resolves code through it
/// while the discovery catalog resolves identity.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: DashMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin entry point under its manifest name.
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> PluginResult<()> {
        let name = plugin.manifest().name;
        if self.plugins.contains_key(&name) {
            return Err(PluginError::DuplicateRegistration { plugin: name });
        }
        tracing::debug!(plugin = %name, "plugin entry point registered");
        self.plugins.insert(name, plugin);
        Ok(())
    }

    /// Resolve an entry point by plugin name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(name).map(|p| p.clone())
    }

    /// Whether an entry point is registered for the name.
    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// Names of all registered entry points.
    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of registered entry points.
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BareMinimum;

    #[async_trait]
    impl Plugin for BareMinimum {
        fn manifest(&self) -> PluginManifest {
            PluginManifest::load_str(
                "[plugin]\nname = \"bare\"\nversion = \"0.1.0\"\n",
            )
            .unwrap()
        }
    }

    #[test]
    fn registration_is_unique_per_name() {
        let registry = PluginRegistry::new();
        registry.register(Arc::new(BareMinimum)).unwrap();
        assert!(registry.contains("bare"));
        assert_eq!(registry.len(), 1);

        let duplicate = registry.register(Arc::new(BareMinimum));
        assert!(matches!(duplicate, Err(PluginError::DuplicateRegistration { .. })));
    }

    #[tokio::test]
    async fn default_hooks_are_noops() {
        let registry = PluginRegistry::new();
        registry.register(Arc::new(BareMinimum)).unwrap();
        let plugin = registry.get("bare").unwrap();

        assert!(plugin.config_schema().is_empty());
        assert!(plugin.routes().is_empty());

        // Default action handler refuses unknown actions.
        let ctx_free_result = plugin.manifest();
        assert_eq!(ctx_free_result.name, "bare");
    }
}
