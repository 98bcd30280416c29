//! Extension-point registries: routes, event listeners, service bindings.
//!
//! The host registers a plugin's declared extension points on enable and
//! removes exactly that plugin's entries on disable. The registries are
//! plumbing only; route dispatch and event semantics belong to external
//! collaborators; listener fan-out is driven by the orchestrator so every
//! listener call passes through the sandbox.

use crate::plugin::error::PluginResult;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// HTTP methods a plugin route may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

/// A route group entry a plugin contributes to the host's router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDef {
    /// HTTP method
    pub method: HttpMethod,
    /// Path below the plugin's route prefix
    pub path: String,
    /// Handler identifier resolved by the external routing collaborator
    pub handler_id: String,
}

impl RouteDef {
    /// Convenience constructor.
    pub fn new(method: HttpMethod, path: impl Into<String>, handler_id: impl Into<String>) -> Self {
        Self { method, path: path.into(), handler_id: handler_id.into() }
    }
}

/// Listener a plugin attaches to a host event (e.g. content pending audit).
#[async_trait]
pub trait EventListener: Send + Sync {
    /// Handle one event occurrence.
    async fn handle(&self, event: &str, payload: &Value) -> PluginResult<()>;
}

/// A declared subscription of one listener to one event name.
#[derive(Clone)]
pub struct ListenerDef {
    /// Event name the listener subscribes to
    pub event: String,
    /// The listener implementation
    pub listener: Arc<dyn EventListener>,
}

impl ListenerDef {
    /// Convenience constructor.
    pub fn new(event: impl Into<String>, listener: Arc<dyn EventListener>) -> Self {
        Self { event: event.into(), listener }
    }
}

impl fmt::Debug for ListenerDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerDef")
            .field("event", &self.event)
            .field("listener", &"<listener>")
            .finish()
    }
}

/// A named service a plugin exposes to peer modules.
#[derive(Clone)]
pub struct ServiceBinding {
    /// Binding name, unique per plugin
    pub name: String,
    /// Type-erased service object; consumers downcast against their
    /// provider contract
    pub service: Arc<dyn Any + Send + Sync>,
}

impl ServiceBinding {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, service: Arc<dyn Any + Send + Sync>) -> Self {
        Self { name: name.into(), service }
    }
}

impl fmt::Debug for ServiceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBinding").field("name", &self.name).finish()
    }
}

/// Registry of currently registered extension points, keyed by plugin name.
#[derive(Default)]
pub struct HookRegistry {
    routes: DashMap<String, Vec<RouteDef>>,
    listeners: DashMap<String, Vec<ListenerDef>>,
    bindings: DashMap<String, Vec<ServiceBinding>>,
}

impl HookRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin's declared extension points.
    pub fn register_plugin(
        &self,
        plugin: &str,
        routes: Vec<RouteDef>,
        listeners: Vec<ListenerDef>,
        bindings: Vec<ServiceBinding>,
    ) {
        tracing::debug!(
            plugin = %plugin,
            routes = routes.len(),
            listeners = listeners.len(),
            bindings = bindings.len(),
            "registering plugin extension points"
        );
        self.routes.insert(plugin.to_string(), routes);
        self.listeners.insert(plugin.to_string(), listeners);
        self.bindings.insert(plugin.to_string(), bindings);
    }

    /// Remove exactly one plugin's extension points.
    pub fn deregister_plugin(&self, plugin: &str) {
        self.routes.remove(plugin);
        self.listeners.remove(plugin);
        self.bindings.remove(plugin);
    }

    /// Whether the plugin currently has registered extension points.
    pub fn has_plugin(&self, plugin: &str) -> bool {
        self.routes.contains_key(plugin)
            || self.listeners.contains_key(plugin)
            || self.bindings.contains_key(plugin)
    }

    /// All registered routes as `(plugin, route)` pairs.
    pub fn routes(&self) -> Vec<(String, RouteDef)> {
        self.routes
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .map(|route| (entry.key().clone(), route.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Listeners subscribed to the given event, with their owning plugin.
    pub fn listeners_for(&self, event: &str) -> Vec<(String, Arc<dyn EventListener>)> {
        self.listeners
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|def| def.event == event)
                    .map(|def| (entry.key().clone(), def.listener.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Resolve a named service binding, searching all plugins.
    pub fn binding(&self, name: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.bindings.iter().find_map(|entry| {
            entry.value().iter().find(|b| b.name == name).map(|b| b.service.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopListener;

    #[async_trait]
    impl EventListener for NoopListener {
        async fn handle(&self, _event: &str, _payload: &Value) -> PluginResult<()> {
            Ok(())
        }
    }

    fn sample_listener(event: &str) -> ListenerDef {
        ListenerDef::new(event, Arc::new(NoopListener))
    }

    #[test]
    fn register_and_deregister_are_per_plugin() {
        let registry = HookRegistry::new();
        registry.register_plugin(
            "audit",
            vec![RouteDef::new(HttpMethod::Post, "/scan", "audit.scan")],
            vec![sample_listener("content.pending_audit")],
            vec![],
        );
        registry.register_plugin(
            "sms-aliyun",
            vec![],
            vec![sample_listener("content.pending_audit")],
            vec![ServiceBinding::new("sms.aliyun", Arc::new(42u32))],
        );

        assert_eq!(registry.listeners_for("content.pending_audit").len(), 2);
        assert_eq!(registry.routes().len(), 1);

        registry.deregister_plugin("audit");
        assert!(!registry.has_plugin("audit"));
        assert!(registry.has_plugin("sms-aliyun"));
        assert_eq!(registry.listeners_for("content.pending_audit").len(), 1);
        assert!(registry.routes().is_empty());
    }

    #[test]
    fn listeners_filter_by_event_name() {
        let registry = HookRegistry::new();
        registry.register_plugin(
            "voting",
            vec![],
            vec![sample_listener("post.created"), sample_listener("post.deleted")],
            vec![],
        );
        assert_eq!(registry.listeners_for("post.created").len(), 1);
        assert!(registry.listeners_for("user.created").is_empty());
    }

    #[test]
    fn bindings_downcast_to_their_contract() {
        let registry = HookRegistry::new();
        registry.register_plugin(
            "oss",
            vec![],
            vec![],
            vec![ServiceBinding::new("storage.oss", Arc::new("bucket".to_string()))],
        );

        let service = registry.binding("storage.oss").unwrap();
        let bucket = service.downcast_ref::<String>().unwrap();
        assert_eq!(bucket, "bucket");
        assert!(registry.binding("storage.s3").is_none());
    }
}
