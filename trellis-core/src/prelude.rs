//! # Prelude
//!
//! Convenient access to the commonly used types of the Trellis core.

pub use crate::{
    config::{ConfigLoader, HostConfig},
    error::{Error, Result},
    plugin::{
        Capability, ConfigField, DisableReason, EventListener, FieldType, HealthStatus,
        ListenerDef, Outcome, Plugin, PluginError, PluginHost, PluginManifest, PluginRegistry,
        PluginResult, PluginState, RouteDef, SandboxContext, SecurityPolicy, ServiceBinding,
    },
    types::{HostInfo, Timestamp},
};

// Re-export commonly used companion crates
pub use async_trait::async_trait;
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use serde_json::Value;
