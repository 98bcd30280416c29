//! Configuration loading: defaults → TOML file → environment overrides.

use crate::config::schema::HostConfig;
use crate::error::{Error, Result};
use std::env;
use std::path::{Path, PathBuf};
use validator::Validate;

/// Default file names probed when no explicit path is given.
const DEFAULT_SEARCH_PATHS: &[&str] = &["trellis.toml", "config/trellis.toml"];

/// Environment variable prefix for overrides.
const ENV_PREFIX: &str = "TRELLIS_";

/// Loads and validates the host configuration.
///
/// Resolution order: built-in defaults, then the TOML file (explicit path or
/// the first match of the search paths), then `TRELLIS_`-prefixed
/// environment variables. `TRELLIS_SANDBOX_EXECUTION_TIMEOUT_SECS=5`
/// overrides `[sandbox] execution_timeout_secs`.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Loader using the default search paths.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader reading a specific config file.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: Some(path.into()) }
    }

    /// Load, merge, and validate the configuration.
    pub fn load(&self) -> Result<HostConfig> {
        let mut merged = toml::Value::try_from(HostConfig::default())
            .map_err(|e| Error::Configuration { message: e.to_string() })?;

        if let Some(file_value) = self.load_file_value()? {
            merged = merge(merged, file_value);
        }

        if let toml::Value::Table(table) = &mut merged {
            apply_env_overrides(table);
        }

        let config: HostConfig = merged
            .try_into()
            .map_err(|e: toml::de::Error| Error::Configuration { message: e.to_string() })?;
        config
            .validate()
            .map_err(|e| Error::Configuration { message: e.to_string() })?;
        Ok(config)
    }

    fn load_file_value(&self) -> Result<Option<toml::Value>> {
        let path = match &self.path {
            Some(path) => {
                if !path.is_file() {
                    return Err(Error::Configuration {
                        message: format!("config file not found: {}", path.display()),
                    });
                }
                Some(path.clone())
            },
            None => DEFAULT_SEARCH_PATHS.iter().map(Path::new).find(|p| p.is_file()).map(Path::to_path_buf),
        };

        let Some(path) = path else {
            return Ok(None);
        };
        let text = std::fs::read_to_string(&path)?;
        let value = text
            .parse::<toml::Value>()
            .map_err(|e| Error::Configuration { message: format!("{}: {e}", path.display()) })?;
        tracing::info!(path = %path.display(), "loaded host configuration file");
        Ok(Some(value))
    }
}

/// Deep-merge two TOML values; `overlay` wins on conflicts.
fn merge(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_value) in overlay_table {
                match base_table.remove(&key) {
                    Some(base_value) => {
                        base_table.insert(key, merge(base_value, overlay_value));
                    },
                    None => {
                        base_table.insert(key, overlay_value);
                    },
                }
            }
            toml::Value::Table(base_table)
        },
        (_, overlay) => overlay,
    }
}

/// Apply `TRELLIS_*` environment variables onto the merged table.
fn apply_env_overrides(table: &mut toml::value::Table) {
    let mut overrides: Vec<(String, String)> = env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(ENV_PREFIX).map(|rest| (rest.to_ascii_lowercase(), value))
        })
        .collect();
    overrides.sort();

    for (key, value) in overrides {
        if !apply_one_override(table, &key, &value) {
            tracing::warn!(key = %key, "ignoring unknown configuration override");
        }
    }
}

/// Resolve a lowercased env key against the table structure.
///
/// Field names contain underscores themselves, so the key is matched
/// greedily: an exact scalar match at the current level wins, otherwise the
/// longest prefix naming a nested table is descended into.
fn apply_one_override(table: &mut toml::value::Table, key: &str, value: &str) -> bool {
    if let Some(existing) = table.get(key) {
        if !existing.is_table() {
            table.insert(key.to_string(), parse_env_value(value));
            return true;
        }
    }

    let split_points: Vec<usize> = key.match_indices('_').map(|(i, _)| i).collect();
    for i in split_points.into_iter().rev() {
        let (head, tail) = (&key[..i], &key[i + 1..]);
        if let Some(toml::Value::Table(inner)) = table.get_mut(head) {
            if apply_one_override(inner, tail, value) {
                return true;
            }
        }
    }
    false
}

/// Parse an environment value into the closest TOML type.
fn parse_env_value(value: &str) -> toml::Value {
    if let Ok(b) = value.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    if let Ok(i) = value.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    if let Ok(f) = value.parse::<f64>() {
        return toml::Value::Float(f);
    }
    toml::Value::String(value.to_string())
}
