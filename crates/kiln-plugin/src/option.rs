//! Option schema normalization.
//!
//! Plugins declare their configurable options as loosely-typed JSON
//! records. This module turns them into [`CompileOption`] values with all
//! defaults filled in. Option kinds this host does not know are skipped so
//! that newer plugins keep loading on older hosts.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PluginError;
use crate::manifest::one_or_many;

/// One entry of a drop-down list option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropItem {
    pub value: String,
    pub text: String,
}

/// A normalized, user-configurable compiler option.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CompileOption {
    Checkbox {
        name: String,
        display: String,
        default: bool,
    },
    Droplist {
        name: String,
        display: String,
        items: Vec<DropItem>,
        default: String,
    },
    Text {
        name: String,
        display: String,
        default: String,
        placeholder: String,
        /// Options whose truthy state gates the visibility of this one.
        depend: Vec<String>,
    },
    /// Non-configurable label. Contributes no settings key.
    Description { display: String },
}

impl CompileOption {
    /// Settings key of the option, `None` for descriptions.
    pub fn name(&self) -> Option<&str> {
        match self {
            CompileOption::Checkbox { name, .. }
            | CompileOption::Droplist { name, .. }
            | CompileOption::Text { name, .. } => Some(name),
            CompileOption::Description { .. } => None,
        }
    }

    pub fn display(&self) -> &str {
        match self {
            CompileOption::Checkbox { display, .. }
            | CompileOption::Droplist { display, .. }
            | CompileOption::Text { display, .. }
            | CompileOption::Description { display } => display,
        }
    }

    /// Default value as it appears in a settings map.
    pub fn default_value(&self) -> Option<Value> {
        match self {
            CompileOption::Checkbox { default, .. } => Some(Value::Bool(*default)),
            CompileOption::Droplist { default, .. } | CompileOption::Text { default, .. } => {
                Some(Value::String(default.clone()))
            }
            CompileOption::Description { .. } => None,
        }
    }
}

/// The fields any known option kind may carry.
#[derive(Debug, Deserialize)]
struct RawOption {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display: Option<String>,
    #[serde(default)]
    default: Option<Value>,
    #[serde(default, deserialize_with = "one_or_many")]
    items: Vec<Value>,
    #[serde(default)]
    placeholder: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    depend: Vec<String>,
}

/// Loose truthiness used for manifest defaults (`0`, `""`, `false` and
/// `null` are falsy).
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// The explicit default of a record, if it is present and truthy.
fn explicit_default(raw: &RawOption) -> Option<&Value> {
    raw.default.as_ref().filter(|v| truthy(v))
}

fn require_name(raw: &RawOption, kind: &str) -> Result<String, PluginError> {
    raw.name
        .clone()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| PluginError::Config(format!("{kind} option is missing 'name'")))
}

fn normalize_items(raw_items: &[Value]) -> Vec<DropItem> {
    let mut items = Vec::with_capacity(raw_items.len());
    for item in raw_items {
        match item {
            Value::Object(obj) => {
                let Some(value) = obj.get("value").and_then(scalar_to_string) else {
                    tracing::warn!(item = %item, "droplist item without a value, ignoring");
                    continue;
                };
                let text = obj
                    .get("text")
                    .and_then(scalar_to_string)
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| value.clone());
                items.push(DropItem { value, text });
            }
            Value::String(s) => items.push(DropItem {
                value: s.clone(),
                text: s.clone(),
            }),
            _ => {}
        }
    }
    items
}

fn normalize_one(kind: &str, record: &Value) -> Result<Option<CompileOption>, PluginError> {
    if !matches!(kind, "checkbox" | "droplist" | "text" | "description") {
        return Ok(None);
    }
    let raw: RawOption = serde_json::from_value(record.clone())
        .map_err(|e| PluginError::Config(format!("malformed {kind} option: {e}")))?;

    let option = match kind {
        "checkbox" => {
            let name = require_name(&raw, kind)?;
            CompileOption::Checkbox {
                display: raw.display.clone().unwrap_or_else(|| name.clone()),
                default: raw.default.as_ref().is_some_and(truthy),
                name,
            }
        }
        "droplist" => {
            let name = require_name(&raw, kind)?;
            let items = normalize_items(&raw.items);
            let first = items.first().map(|item| item.value.clone()).ok_or_else(|| {
                PluginError::Config(format!("droplist option '{name}' has no items"))
            })?;
            let default = match explicit_default(&raw).and_then(scalar_to_string) {
                Some(value) if items.iter().any(|item| item.value == value) => value,
                Some(value) => {
                    tracing::warn!(
                        option = %name,
                        default = %value,
                        "droplist default is not one of its items, using the first item"
                    );
                    first
                }
                None => first,
            };
            CompileOption::Droplist {
                display: raw.display.clone().unwrap_or_else(|| name.clone()),
                items,
                default,
                name,
            }
        }
        "text" => {
            let name = require_name(&raw, kind)?;
            CompileOption::Text {
                display: raw.display.clone().unwrap_or_else(|| name.clone()),
                default: explicit_default(&raw)
                    .and_then(scalar_to_string)
                    .unwrap_or_default(),
                placeholder: raw.placeholder.clone().unwrap_or_default(),
                depend: raw.depend.clone(),
                name,
            }
        }
        _ => CompileOption::Description {
            display: raw.display.clone().unwrap_or_default(),
        },
    };
    Ok(Some(option))
}

/// Normalize a plugin's raw option records.
///
/// Records with an unrecognized `type` produce nothing. A malformed record
/// of a known type fails the whole schema with [`PluginError::Config`].
pub fn normalize(raw_options: &[Value]) -> Result<Vec<CompileOption>, PluginError> {
    let mut options = Vec::with_capacity(raw_options.len());
    for record in raw_options {
        let kind = record.get("type").and_then(Value::as_str).unwrap_or_default();
        match normalize_one(kind, record)? {
            Some(option) => options.push(option),
            None => tracing::debug!(kind = %kind, "ignoring unknown option type"),
        }
    }
    Ok(options)
}

/// Settings map made of each option's default. Descriptions are skipped.
pub fn default_settings(options: &[CompileOption]) -> Map<String, Value> {
    options
        .iter()
        .filter_map(|option| Some((option.name()?.to_string(), option.default_value()?)))
        .collect()
}

// ─── Tests ──────────────────────────────────────────────────────────
