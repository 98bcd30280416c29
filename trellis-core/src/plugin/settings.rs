//! Plugin configuration schema model and the configuration engine.
//!
//! Plugins declare their configuration as a list of typed fields; the engine
//! is the sole authority for resolving effective values (persisted value if
//! present and still valid, declared default otherwise) and for validating
//! writes before anything is persisted. Button fields carry no storable
//! value; they are action triggers invoked through the orchestrator.

use crate::plugin::error::ConfigError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use validator::{ValidateEmail, ValidateUrl};

/// Declared type of a configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Single-line text
    Text,
    /// Masked text
    Password,
    /// One value out of the declared options
    Select,
    /// Boolean toggle
    Checkbox,
    /// Multi-line text
    Textarea,
    /// Numeric value, integer or float
    Number,
    /// Email address
    Email,
    /// URL
    Url,
    /// Action trigger; carries no storable value
    Button,
    /// Tabular data; value must be a JSON array
    DataTable,
}

/// One choice of a select field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    /// Stored value
    pub value: String,
    /// Display label
    pub label: String,
}

impl SelectOption {
    /// Convenience constructor.
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self { value: value.into(), label: label.into() }
    }
}

/// Validation rule attached to a field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    /// Minimum numeric value (Number fields)
    #[serde(default)]
    pub min: Option<f64>,
    /// Maximum numeric value (Number fields)
    #[serde(default)]
    pub max: Option<f64>,
    /// Minimum string length (text-like fields)
    #[serde(default)]
    pub min_len: Option<usize>,
    /// Maximum string length (text-like fields)
    #[serde(default)]
    pub max_len: Option<usize>,
    /// Whether a Number field must be an integer
    #[serde(default)]
    pub integer: bool,
}

/// Action payload of a Button field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonSpec {
    /// Action key passed to the plugin's action handler
    pub action: String,
    /// Optional UI variant hint
    #[serde(default)]
    pub variant: Option<String>,
    /// Optional confirmation prompt shown before invoking
    #[serde(default)]
    pub confirm: Option<String>,
}

/// Presentation descriptors of a DataTable field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataTableSpec {
    /// Column keys in display order
    #[serde(default)]
    pub columns: Vec<String>,
    /// Per-row action keys
    #[serde(default)]
    pub row_actions: Vec<String>,
    /// Whether the table offers client-side filtering
    #[serde(default)]
    pub filterable: bool,
    /// Rows per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page_size() -> u32 {
    20
}

/// Declared configuration field of a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    /// Key, unique within the plugin
    pub key: String,
    /// Display label
    pub label: String,
    /// Field type
    pub field_type: FieldType,
    /// Declared default value
    #[serde(default)]
    pub default: Option<Value>,
    /// Options for Select fields
    #[serde(default)]
    pub options: Vec<SelectOption>,
    /// Help text
    #[serde(default)]
    pub description: String,
    /// Presentation group
    #[serde(default)]
    pub group: String,
    /// Order within the group
    #[serde(default)]
    pub order: i32,
    /// Whether the field must resolve to a value for the plugin to run
    #[serde(default)]
    pub required: bool,
    /// Validation rule
    #[serde(default)]
    pub rule: Option<FieldRule>,
    /// Button payload (Button fields only)
    #[serde(default)]
    pub button: Option<ButtonSpec>,
    /// Table payload (DataTable fields only)
    #[serde(default)]
    pub data_table: Option<DataTableSpec>,
}

impl ConfigField {
    /// Start a field of the given type.
    pub fn new(key: impl Into<String>, label: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            field_type,
            default: None,
            options: Vec::new(),
            description: String::new(),
            group: String::new(),
            order: 0,
            required: false,
            rule: None,
            button: None,
            data_table: None,
        }
    }

    /// Shorthand for a Text field.
    pub fn text(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(key, label, FieldType::Text)
    }

    /// Shorthand for a Number field.
    pub fn number(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(key, label, FieldType::Number)
    }

    /// Shorthand for a Checkbox field.
    pub fn checkbox(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(key, label, FieldType::Checkbox)
    }

    /// Shorthand for a Select field with options.
    pub fn select(
        key: impl Into<String>,
        label: impl Into<String>,
        options: Vec<SelectOption>,
    ) -> Self {
        let mut field = Self::new(key, label, FieldType::Select);
        field.options = options;
        field
    }

    /// Shorthand for a Button field.
    pub fn button(key: impl Into<String>, label: impl Into<String>, action: impl Into<String>) -> Self {
        let mut field = Self::new(key, label, FieldType::Button);
        field.button = Some(ButtonSpec { action: action.into(), variant: None, confirm: None });
        field
    }

    /// Set the declared default.
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Mark the field required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Place the field in a presentation group at the given order.
    pub fn in_group(mut self, group: impl Into<String>, order: i32) -> Self {
        self.group = group.into();
        self.order = order;
        self
    }

    /// Attach a validation rule.
    pub fn with_rule(mut self, rule: FieldRule) -> Self {
        self.rule = Some(rule);
        self
    }
}

/// A field paired with its effective value.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedItem {
    /// The declared field
    pub field: ConfigField,
    /// Effective value: persisted if valid, else the declared default
    pub value: Option<Value>,
    /// Whether the value came from the declared default
    pub from_default: bool,
}

/// Configuration engine: schema registry plus persisted values.
pub struct SettingsEngine {
    path: Option<PathBuf>,
    schemas: DashMap<String, Vec<ConfigField>>,
    values: DashMap<String, BTreeMap<String, Value>>,
}

impl SettingsEngine {
    /// Engine backed by a JSON values file, loading it if present.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let values = DashMap::new();
        if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::Persist { reason: e.to_string() })?;
            let loaded: BTreeMap<String, BTreeMap<String, Value>> = serde_json::from_str(&text)
                .map_err(|e| ConfigError::Persist { reason: e.to_string() })?;
            for (plugin, map) in loaded {
                values.insert(plugin, map);
            }
        }
        Ok(Self { path: Some(path), schemas: DashMap::new(), values })
    }

    /// Engine without file persistence. Tests and embedded use.
    pub fn in_memory() -> Self {
        Self { path: None, schemas: DashMap::new(), values: DashMap::new() }
    }

    /// Register (or replace) a plugin's declared schema.
    pub fn register_schema(&self, plugin: &str, fields: Vec<ConfigField>) {
        self.schemas.insert(plugin.to_string(), fields);
    }

    /// Remove a plugin's schema. Persisted values are untouched.
    pub fn unregister_schema(&self, plugin: &str) {
        self.schemas.remove(plugin);
    }

    /// Look up a single declared field.
    pub fn field(&self, plugin: &str, key: &str) -> Option<ConfigField> {
        self.schemas.get(plugin)?.iter().find(|f| f.key == key).cloned()
    }

    /// Resolve all of a plugin's fields, ordered by `(group, order, key)`.
    pub fn resolve(&self, plugin: &str) -> Vec<ResolvedItem> {
        let Some(fields) = self.schemas.get(plugin).map(|f| f.clone()) else {
            return Vec::new();
        };
        let stored = self.values.get(plugin).map(|v| v.clone()).unwrap_or_default();

        let mut items: Vec<ResolvedItem> = fields
            .into_iter()
            .map(|field| {
                let persisted = stored
                    .get(&field.key)
                    .filter(|raw| coerce(plugin, &field, (*raw).clone()).is_ok())
                    .cloned();
                match persisted {
                    Some(value) => {
                        ResolvedItem { value: Some(value), from_default: false, field }
                    },
                    None => ResolvedItem {
                        value: field.default.clone(),
                        from_default: true,
                        field,
                    },
                }
            })
            .collect();
        items.sort_by(|a, b| {
            (&a.field.group, a.field.order, &a.field.key)
                .cmp(&(&b.field.group, b.field.order, &b.field.key))
        });
        items
    }

    /// Effective value of one key.
    pub fn get(&self, plugin: &str, key: &str) -> Result<Option<Value>, ConfigError> {
        let field = self.field(plugin, key).ok_or_else(|| ConfigError::UnknownKey {
            plugin: plugin.to_string(),
            key: key.to_string(),
        })?;
        let stored = self
            .values
            .get(plugin)
            .and_then(|v| v.get(key).cloned())
            .filter(|raw| coerce(plugin, &field, raw.clone()).is_ok());
        Ok(stored.or_else(|| field.default.clone()))
    }

    /// Validate and persist one value.
    ///
    /// `Value::Null` clears the persisted value (falling back to the
    /// default), which is refused for required fields.
    pub fn set(&self, plugin: &str, key: &str, raw: Value) -> Result<(), ConfigError> {
        let field = self.field(plugin, key).ok_or_else(|| ConfigError::UnknownKey {
            plugin: plugin.to_string(),
            key: key.to_string(),
        })?;

        if field.field_type == FieldType::Button {
            return Err(ConfigError::NotConfigurable {
                plugin: plugin.to_string(),
                key: key.to_string(),
            });
        }

        if raw.is_null() {
            if field.required {
                return Err(ConfigError::RequiredValue {
                    plugin: plugin.to_string(),
                    key: key.to_string(),
                });
            }
            if let Some(mut map) = self.values.get_mut(plugin) {
                map.remove(key);
            }
            return self.persist();
        }

        let value = coerce(plugin, &field, raw)?;
        self.values.entry(plugin.to_string()).or_default().insert(key.to_string(), value);
        self.persist()
    }

    /// Required keys that currently resolve to no value.
    pub fn missing_required(&self, plugin: &str) -> Vec<String> {
        self.resolve(plugin)
            .into_iter()
            .filter(|item| item.field.required && item.value.is_none())
            .map(|item| item.field.key)
            .collect()
    }

    /// Drop all persisted values of a plugin (uninstall with
    /// `keep_data_on_uninstall = false`).
    pub fn delete_plugin_values(&self, plugin: &str) -> Result<(), ConfigError> {
        self.values.remove(plugin);
        self.persist()
    }

    /// Whether any values are persisted for the plugin.
    pub fn has_values(&self, plugin: &str) -> bool {
        self.values.get(plugin).is_some_and(|v| !v.is_empty())
    }

    fn persist(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot: BTreeMap<String, BTreeMap<String, Value>> =
            self.values.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        let text = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| ConfigError::Persist { reason: e.to_string() })?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(|e| ConfigError::Persist { reason: e.to_string() })?;
        std::fs::rename(&tmp, path).map_err(|e| ConfigError::Persist { reason: e.to_string() })?;
        Ok(())
    }
}

/// Validate a raw value against a field, returning the canonical value.
fn coerce(plugin: &str, field: &ConfigField, raw: Value) -> Result<Value, ConfigError> {
    let fail = |reason: String| ConfigError::ValidationFailed {
        plugin: plugin.to_string(),
        key: field.key.clone(),
        reason,
    };

    match field.field_type {
        FieldType::Button => Err(ConfigError::NotConfigurable {
            plugin: plugin.to_string(),
            key: field.key.clone(),
        }),

        FieldType::Checkbox => coerce_bool(&raw)
            .map(Value::Bool)
            .ok_or_else(|| fail(format!("expected a boolean, got {raw}"))),

        FieldType::Number => {
            let number = coerce_number(&raw).ok_or_else(|| fail(format!("expected a number, got {raw}")))?;
            let rule = field.rule.clone().unwrap_or_default();
            if rule.integer && number.fract() != 0.0 {
                return Err(fail(format!("expected an integer, got {number}")));
            }
            if let Some(min) = rule.min {
                if number < min {
                    return Err(fail(format!("{number} is below the minimum of {min}")));
                }
            }
            if let Some(max) = rule.max {
                if number > max {
                    return Err(fail(format!("{number} is above the maximum of {max}")));
                }
            }
            // Preserve integer representation where possible.
            if number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
                Ok(Value::from(number as i64))
            } else {
                Ok(Value::from(number))
            }
        },

        FieldType::Select => {
            let text = raw.as_str().ok_or_else(|| fail("expected a string".into()))?;
            if field.options.iter().any(|o| o.value == text) {
                Ok(Value::String(text.to_string()))
            } else {
                Err(fail(format!("{text:?} is not one of the declared options")))
            }
        },

        FieldType::Text | FieldType::Password | FieldType::Textarea => {
            let text = raw.as_str().ok_or_else(|| fail("expected a string".into()))?;
            let rule = field.rule.clone().unwrap_or_default();
            if let Some(min_len) = rule.min_len {
                if text.chars().count() < min_len {
                    return Err(fail(format!("shorter than the minimum length of {min_len}")));
                }
            }
            if let Some(max_len) = rule.max_len {
                if text.chars().count() > max_len {
                    return Err(fail(format!("longer than the maximum length of {max_len}")));
                }
            }
            Ok(Value::String(text.to_string()))
        },

        FieldType::Email => {
            let text = raw.as_str().ok_or_else(|| fail("expected a string".into()))?;
            if text.validate_email() {
                Ok(Value::String(text.to_string()))
            } else {
                Err(fail(format!("{text:?} is not a valid email address")))
            }
        },

        FieldType::Url => {
            let text = raw.as_str().ok_or_else(|| fail("expected a string".into()))?;
            if text.validate_url() {
                Ok(Value::String(text.to_string()))
            } else {
                Err(fail(format!("{text:?} is not a valid URL")))
            }
        },

        FieldType::DataTable => {
            if raw.is_array() {
                Ok(raw)
            } else {
                Err(fail("expected a JSON array".into()))
            }
        },
    }
}

fn coerce_bool(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "1" | "true" | "on" | "yes" => Some(true),
            "0" | "false" | "off" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_number(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine_with_schema() -> SettingsEngine {
        let engine = SettingsEngine::in_memory();
        engine.register_schema(
            "smtp",
            vec![
                ConfigField::text("host", "SMTP host")
                    .required()
                    .in_group("connection", 0),
                ConfigField::number("port", "SMTP port")
                    .with_rule(FieldRule {
                        min: Some(6.0),
                        max: Some(128.0),
                        integer: true,
                        ..Default::default()
                    })
                    .with_default(json!(25))
                    .in_group("connection", 1),
                ConfigField::checkbox("tls", "Use TLS")
                    .with_default(json!(true))
                    .in_group("connection", 2),
                ConfigField::select(
                    "auth",
                    "Auth mode",
                    vec![SelectOption::new("plain", "Plain"), SelectOption::new("login", "Login")],
                )
                .in_group("auth", 0),
                ConfigField::new("reply_to", "Reply-to address", FieldType::Email)
                    .in_group("auth", 1),
                ConfigField::new("webhook", "Webhook URL", FieldType::Url).in_group("auth", 2),
                ConfigField::button("test", "Send test mail", "send_test").in_group("actions", 0),
                ConfigField::new("routes", "Routing table", FieldType::DataTable)
                    .in_group("actions", 1),
            ],
        );
        engine
    }

    #[test]
    fn number_rule_bounds() {
        let engine = engine_with_schema();
        assert!(engine.set("smtp", "port", json!(3)).is_err());
        assert!(engine.set("smtp", "port", json!(200)).is_err());
        assert!(engine.set("smtp", "port", json!(64)).is_ok());
        assert_eq!(engine.get("smtp", "port").unwrap(), Some(json!(64)));
    }

    #[test]
    fn number_accepts_parseable_strings() {
        let engine = engine_with_schema();
        assert!(engine.set("smtp", "port", json!("42")).is_ok());
        assert_eq!(engine.get("smtp", "port").unwrap(), Some(json!(42)));
        assert!(engine.set("smtp", "port", json!("not a number")).is_err());
        assert!(engine.set("smtp", "port", json!(12.5)).is_err());
    }

    #[test]
    fn button_is_never_configurable() {
        let engine = engine_with_schema();
        for value in [json!("anything"), json!(1), json!(null), json!(true)] {
            let result = engine.set("smtp", "test", value);
            assert!(matches!(result, Err(ConfigError::NotConfigurable { .. })));
        }
    }

    #[test]
    fn checkbox_token_coercion() {
        let engine = engine_with_schema();
        for truthy in [json!(true), json!("on"), json!("1"), json!("Yes"), json!(1)] {
            engine.set("smtp", "tls", truthy).unwrap();
            assert_eq!(engine.get("smtp", "tls").unwrap(), Some(json!(true)));
        }
        for falsy in [json!(false), json!("off"), json!("0"), json!("no"), json!(0)] {
            engine.set("smtp", "tls", falsy).unwrap();
            assert_eq!(engine.get("smtp", "tls").unwrap(), Some(json!(false)));
        }
        assert!(engine.set("smtp", "tls", json!("maybe")).is_err());
    }

    #[test]
    fn select_must_match_an_option() {
        let engine = engine_with_schema();
        assert!(engine.set("smtp", "auth", json!("plain")).is_ok());
        assert!(engine.set("smtp", "auth", json!("oauth2")).is_err());
    }

    #[test]
    fn email_and_url_validation() {
        let engine = engine_with_schema();
        assert!(engine.set("smtp", "reply_to", json!("ops@example.com")).is_ok());
        assert!(engine.set("smtp", "reply_to", json!("not-an-email")).is_err());
        assert!(engine.set("smtp", "webhook", json!("https://example.com/hook")).is_ok());
        assert!(engine.set("smtp", "webhook", json!("::nope::")).is_err());
    }

    #[test]
    fn data_table_requires_an_array() {
        let engine = engine_with_schema();
        assert!(engine.set("smtp", "routes", json!([{"match": "*", "relay": "a"}])).is_ok());
        assert!(engine.set("smtp", "routes", json!({"match": "*"})).is_err());
    }

    #[test]
    fn null_clears_optional_but_not_required() {
        let engine = engine_with_schema();
        engine.set("smtp", "port", json!(42)).unwrap();
        engine.set("smtp", "port", json!(null)).unwrap();
        // Cleared value falls back to the declared default.
        assert_eq!(engine.get("smtp", "port").unwrap(), Some(json!(25)));

        let result = engine.set("smtp", "host", json!(null));
        assert!(matches!(result, Err(ConfigError::RequiredValue { .. })));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let engine = engine_with_schema();
        assert!(matches!(
            engine.set("smtp", "nope", json!(1)),
            Err(ConfigError::UnknownKey { .. })
        ));
        assert!(matches!(engine.get("smtp", "nope"), Err(ConfigError::UnknownKey { .. })));
    }

    #[test]
    fn resolve_orders_by_group_then_order() {
        let engine = engine_with_schema();
        let keys: Vec<String> =
            engine.resolve("smtp").into_iter().map(|item| item.field.key).collect();
        assert_eq!(keys, vec!["test", "routes", "auth", "reply_to", "webhook", "host", "port", "tls"]);
    }

    #[test]
    fn missing_required_reports_unset_keys() {
        let engine = engine_with_schema();
        assert_eq!(engine.missing_required("smtp"), vec!["host".to_string()]);
        engine.set("smtp", "host", json!("mail.example.com")).unwrap();
        assert!(engine.missing_required("smtp").is_empty());
    }

    #[test]
    fn invalid_persisted_value_falls_back_to_default() {
        let engine = engine_with_schema();
        engine.set("smtp", "port", json!(64)).unwrap();
        // Schema tightens afterwards; the stored 64 no longer validates.
        engine.register_schema(
            "smtp",
            vec![ConfigField::number("port", "SMTP port")
                .with_rule(FieldRule { min: Some(1.0), max: Some(10.0), ..Default::default() })
                .with_default(json!(7))],
        );
        assert_eq!(engine.get("smtp", "port").unwrap(), Some(json!(7)));
    }

    #[test]
    fn delete_plugin_values_and_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        {
            let engine = SettingsEngine::open(&path).unwrap();
            engine.register_schema("wallet", vec![ConfigField::text("currency", "Currency")]);
            engine.set("wallet", "currency", json!("CNY")).unwrap();
        }

        let engine = SettingsEngine::open(&path).unwrap();
        engine.register_schema("wallet", vec![ConfigField::text("currency", "Currency")]);
        assert_eq!(engine.get("wallet", "currency").unwrap(), Some(json!("CNY")));
        assert!(engine.has_values("wallet"));

        engine.delete_plugin_values("wallet").unwrap();
        assert!(!engine.has_values("wallet"));
        assert_eq!(engine.get("wallet", "currency").unwrap(), None);
    }
}
