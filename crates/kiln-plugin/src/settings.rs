//! Compile settings and the configuration store.
//!
//! The store is read from a `kiln.toml` file:
//!
//! ```toml
//! [app]
//! language = "en_us"
//!
//! [compilers.less.options]
//! compress = true
//!
//! [compilers.less.advanced]
//! useCommand = true
//! commandPath = "/usr/local/bin/lessc"
//!
//! [projects.site]
//! src = "/home/me/site"
//! ```
//!
//! Every accessor hands out an owned copy; callers can never mutate the
//! stored configuration through a returned value.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PluginError;

/// Settings of one compile: regular options and advanced options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompileSettings {
    #[serde(default)]
    pub options: Map<String, Value>,
    #[serde(default)]
    pub advanced: Map<String, Value>,
}

fn flag(map: &Map<String, Value>, key: &str) -> bool {
    match map.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.as_str(), "true" | "1" | "yes" | "on"),
        Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
        _ => false,
    }
}

impl CompileSettings {
    /// Overlay `other` on top of `self`, key by key.
    pub fn merge(&mut self, other: &CompileSettings) {
        for (key, value) in &other.options {
            self.options.insert(key.clone(), value.clone());
        }
        for (key, value) in &other.advanced {
            self.advanced.insert(key.clone(), value.clone());
        }
    }

    pub fn merged(mut self, other: &CompileSettings) -> Self {
        self.merge(other);
        self
    }

    pub fn option_flag(&self, key: &str) -> bool {
        flag(&self.options, key)
    }

    pub fn advanced_flag(&self, key: &str) -> bool {
        flag(&self.advanced, key)
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    /// A non-empty string from the advanced settings.
    pub fn advanced_str(&self, key: &str) -> Option<&str> {
        self.advanced
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

/// Read access to persisted host configuration.
pub trait SettingsProvider: Send + Sync {
    /// Stored overrides of a compiler's global settings (empty if none).
    fn global_settings_of(&self, compiler: &str) -> CompileSettings;

    /// A snapshot of the application configuration.
    fn app_config(&self) -> Value;

    /// A snapshot of a project's stored data.
    fn project_by_id(&self, id: &str) -> Option<Value>;
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    app: Map<String, Value>,
    #[serde(default)]
    compilers: HashMap<String, CompileSettings>,
    #[serde(default)]
    projects: HashMap<String, Value>,
}

/// TOML-backed [`SettingsProvider`].
#[derive(Debug, Default)]
pub struct SettingsStore {
    inner: RwLock<SettingsFile>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse settings from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, PluginError> {
        let file: SettingsFile = toml::from_str(text)?;
        Ok(Self {
            inner: RwLock::new(file),
        })
    }

    /// Load settings from `path`. A missing file yields empty settings.
    pub async fn load(path: &Path) -> Result<Self, PluginError> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no settings file, using defaults");
                Ok(Self::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the stored overrides of one compiler.
    pub fn set_compiler_settings(&self, compiler: &str, settings: CompileSettings) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .compilers
            .insert(compiler.to_string(), settings);
    }

    pub fn set_project(&self, id: &str, data: Value) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .projects
            .insert(id.to_string(), data);
    }
}

impl SettingsProvider for SettingsStore {
    fn global_settings_of(&self, compiler: &str) -> CompileSettings {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .compilers
            .get(compiler)
            .cloned()
            .unwrap_or_default()
    }

    fn app_config(&self) -> Value {
        Value::Object(self.inner.read().unwrap_or_else(PoisonError::into_inner).app.clone())
    }

    fn project_by_id(&self, id: &str) -> Option<Value> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .projects
            .get(id)
            .cloned()
    }
}
