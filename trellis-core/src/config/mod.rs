//! Host configuration: schema, loading, and validation.
//!
//! Layered resolution: built-in defaults, then a TOML file, then `TRELLIS_`
//! environment overrides. Validation runs once at load time.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{
    DiscoverySettings, HealthSettings, HostConfig, LifecycleSettings, SandboxSettings,
};

use crate::error::Result;
use std::path::Path;

/// Load configuration from the default search paths.
pub fn load_default() -> Result<HostConfig> {
    ConfigLoader::new().load()
}

/// Load configuration from a specific file.
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<HostConfig> {
    ConfigLoader::with_path(path.as_ref()).load()
}
