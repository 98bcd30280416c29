//! Error types for the plugin system.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sandbox enforcement errors.
///
/// Every variant maps to one enforcement boundary: the wall-clock deadline,
/// the memory ceiling, or the forbidden-operation gate.
#[derive(Error, Debug, Clone)]
pub enum SandboxError {
    /// Plugin code exceeded the wall-clock deadline and was cancelled
    #[error("Plugin execution timed out: {plugin}, limit: {limit_ms}ms")]
    Timeout {
        /// Plugin name
        plugin: String,
        /// Deadline that was exceeded, in milliseconds
        limit_ms: u64,
    },

    /// Plugin code asked for more memory than its ceiling allows
    #[error("Plugin memory ceiling exceeded: {plugin}, requested {requested} bytes over a {limit} byte limit")]
    MemoryExceeded {
        /// Plugin name
        plugin: String,
        /// Bytes the plugin attempted to reserve
        requested: u64,
        /// Configured ceiling in bytes
        limit: u64,
    },

    /// Plugin code attempted a blocked host operation
    #[error("Forbidden operation: {plugin} attempted {operation}")]
    ForbiddenOperation {
        /// Plugin name
        plugin: String,
        /// The operation that was denied
        operation: String,
    },

    /// The sandbox worker pool has been shut down
    #[error("Sandbox worker pool is closed")]
    PoolClosed,
}

/// Configuration engine errors.
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// The key is not declared in the plugin's config schema
    #[error("Unknown config key: {plugin}.{key}")]
    UnknownKey {
        /// Plugin name
        plugin: String,
        /// Config key
        key: String,
    },

    /// The value failed type or rule validation
    #[error("Config validation failed for {plugin}.{key}: {reason}")]
    ValidationFailed {
        /// Plugin name
        plugin: String,
        /// Config key
        key: String,
        /// Why validation rejected the value
        reason: String,
    },

    /// The key is an action trigger and carries no storable value
    #[error("Config key is not configurable: {plugin}.{key}")]
    NotConfigurable {
        /// Plugin name
        plugin: String,
        /// Config key
        key: String,
    },

    /// A required key cannot be cleared or left without a value
    #[error("Required config key has no value: {plugin}.{key}")]
    RequiredValue {
        /// Plugin name
        plugin: String,
        /// Config key
        key: String,
    },

    /// Persisting config values to disk failed
    #[error("Failed to persist config values: {reason}")]
    Persist {
        /// Underlying failure description
        reason: String,
    },
}

/// Installation ledger errors.
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    /// A transition was requested for a plugin that is not installed
    #[error("Plugin is not installed: {plugin}")]
    NotInstalled {
        /// Plugin name
        plugin: String,
    },

    /// Writing the ledger file failed
    #[error("Failed to persist installation ledger: {reason}")]
    Persist {
        /// Underlying failure description
        reason: String,
    },

    /// Reading or parsing an existing ledger file failed
    #[error("Failed to load installation ledger: {reason}")]
    Load {
        /// Underlying failure description
        reason: String,
    },
}

/// Classification of a single plugin directory's discovery failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryErrorKind {
    /// No manifest file in the plugin directory
    MissingManifest,
    /// The manifest file could not be read
    UnreadableManifest,
    /// The manifest file was read but failed to parse or validate
    InvalidManifest,
    /// Another directory already claimed this plugin name
    DuplicateName,
    /// The manifest is valid but no entry point is registered for its name
    NoRegisteredEntryPoint,
}

/// A per-directory discovery failure.
///
/// One broken plugin never aborts the scan of the rest; failures are
/// collected into the catalog instead.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[error("Plugin discovery failed in {directory:?}: {reason}")]
pub struct DiscoveryError {
    /// Directory name under the plugins root
    pub directory: String,
    /// Failure classification
    pub kind: DiscoveryErrorKind,
    /// Human-readable failure description
    pub reason: String,
}

/// Plugin system error types.
#[derive(Error, Debug, Clone)]
pub enum PluginError {
    /// The plugin name is not present in the discovery catalog
    #[error("Plugin not present in catalog: {plugin}")]
    UnknownPlugin {
        /// Plugin name
        plugin: String,
    },

    /// No entry point implementation is registered for the plugin name
    #[error("No registered entry point for plugin: {plugin}")]
    NotRegistered {
        /// Plugin name
        plugin: String,
    },

    /// An entry point was registered twice under the same name
    #[error("Plugin entry point already registered: {plugin}")]
    DuplicateRegistration {
        /// Plugin name
        plugin: String,
    },

    /// The operation requires the plugin to be installed
    #[error("Plugin is not installed: {plugin}")]
    NotInstalled {
        /// Plugin name
        plugin: String,
    },

    /// The operation requires the plugin to be enabled
    #[error("Plugin is not enabled: {plugin}")]
    NotEnabled {
        /// Plugin name
        plugin: String,
    },

    /// Uninstall was requested while the plugin is still enabled
    #[error("Plugin must be disabled before uninstall: {plugin}")]
    StillEnabled {
        /// Plugin name
        plugin: String,
    },

    /// A declared dependency is not installed; dependencies are never
    /// auto-installed
    #[error("Missing dependency: {plugin} requires {dependency} to be installed first")]
    DependencyMissing {
        /// Plugin name
        plugin: String,
        /// The dependency that is not installed
        dependency: String,
    },

    /// The host version does not satisfy the manifest's requirement
    #[error("Host requirement not met: {plugin} requires host {required}, host is {host}")]
    RequirementNotMet {
        /// Plugin name
        plugin: String,
        /// Version requirement from the manifest
        required: String,
        /// Actual host version
        host: String,
    },

    /// A lifecycle hook raised an error or panicked; the transition it
    /// belonged to was aborted with prior state intact
    #[error("Plugin hook failed: {plugin}.{hook}: {reason}")]
    HookFailed {
        /// Plugin name
        plugin: String,
        /// Hook name (install/enable/disable/uninstall/action)
        hook: String,
        /// Failure description
        reason: String,
    },

    /// Sandbox enforcement errors
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// Configuration engine errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Installation ledger errors
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Type alias for plugin system results.
pub type PluginResult<T> = Result<T, PluginError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_plugin() {
        let err = PluginError::DependencyMissing {
            plugin: "forum-votes".into(),
            dependency: "wallet".into(),
        };
        let text = err.to_string();
        assert!(text.contains("forum-votes"));
        assert!(text.contains("wallet"));
    }

    #[test]
    fn sandbox_errors_convert_into_plugin_errors() {
        let err: PluginError =
            SandboxError::Timeout { plugin: "audit".into(), limit_ms: 30_000 }.into();
        assert!(matches!(err, PluginError::Sandbox(SandboxError::Timeout { .. })));
    }
}
