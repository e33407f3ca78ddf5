//! Compiler manifest parsing and validation.
//!
//! A compiler plugin is described by a `package.json` file. Built-in
//! compilers are listed together in one JSON array; user-installed
//! compilers ship one manifest per plugin directory.

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::PluginError;
use crate::file_type::FileTypeConfig;

/// File name of a per-plugin manifest.
pub const MANIFEST_FILE: &str = "package.json";

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

/// Accept either a single value or a list of values; `null` becomes empty.
pub(crate) fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        Some(OneOrMany::Many(items)) => items,
        Some(OneOrMany::One(item)) => vec![item],
        None => Vec::new(),
    })
}

/// External command declaration for plugins that compile by running a tool.
///
/// `args` entries are templates: `{src}`, `{output}`, `{srcDir}`,
/// `{basename}`, `{options.NAME}` and `{advanced.NAME}` are substituted per job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDeclaration {
    pub default: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub args: Vec<String>,
}

/// Compiler manifest.
///
/// Unknown fields are ignored so that manifests written for newer hosts
/// still load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompilerManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, rename = "minHostVersion", alias = "koalaVersion")]
    pub min_host_version: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub maintainers: Vec<Value>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub file_types: Vec<FileTypeConfig>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub options: Vec<Value>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub advanced: Vec<Value>,
    #[serde(default)]
    pub project_settings: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub libs: Vec<String>,
    #[serde(default)]
    pub main: Option<String>,
    #[serde(default)]
    pub command: Option<CommandDeclaration>,
    /// Repository advertising newer versions of this compiler.
    #[serde(default)]
    pub repository: Option<String>,
}

fn require<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, PluginError> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| PluginError::InvalidManifest(format!("missing required field '{field}'")))
}

/// Parse a version the way update checks compare them: missing minor or
/// patch components count as zero.
pub fn parse_lenient_version(value: &str) -> Result<semver::Version, PluginError> {
    let trimmed = value.trim().trim_start_matches('v');
    if let Ok(version) = semver::Version::parse(trimmed) {
        return Ok(version);
    }
    let mut components = [0u64; 3];
    for (slot, part) in components.iter_mut().zip(trimmed.split('.')) {
        *slot = part
            .parse()
            .map_err(|_| PluginError::InvalidManifest(format!("'{value}' is not a version")))?;
    }
    let [major, minor, patch] = components;
    Ok(semver::Version::new(major, minor, patch))
}

impl CompilerManifest {
    /// Parse a single manifest from JSON text.
    pub fn parse(json: &str) -> Result<Self, PluginError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse a single manifest from an already decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, PluginError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Parse the built-in manifest: an ordered JSON array of manifests.
    ///
    /// Entries that fail to decode are returned as errors in place so the
    /// caller can skip them without losing the rest of the list.
    pub fn parse_list(json: &str) -> Result<Vec<Result<Self, PluginError>>, PluginError> {
        let entries: Vec<Value> = serde_json::from_str(json)?;
        Ok(entries.into_iter().map(Self::from_value).collect())
    }

    /// Read and parse a manifest file.
    pub async fn read(path: &Path) -> Result<Self, PluginError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// The registry key of this compiler.
    pub fn require_name(&self) -> Result<&str, PluginError> {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| PluginError::Config("compiler manifest must contain 'name'".into()))
    }

    /// Validate the fields a user-installed plugin must declare.
    pub fn validate_user(&self) -> Result<(), PluginError> {
        let name = require(&self.name, "name")?;
        require(&self.main, "main")?;
        require(&self.version, "version")?;
        require(&self.min_host_version, "minHostVersion")?;
        if self.file_types.is_empty() {
            return Err(PluginError::InvalidManifest(
                "missing required field 'file_types'".into(),
            ));
        }

        // The name doubles as the install directory name.
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(PluginError::InvalidManifest(format!(
                "compiler name '{name}' is not a valid directory name"
            )));
        }
        Ok(())
    }

    /// Check the declared host requirement against the running host.
    ///
    /// A bare version (`"2.0.0"`) is a minimum; anything else is read as a
    /// semver requirement (`"*"`, `">=2.1, <3"`). An absent requirement
    /// accepts every host.
    pub fn check_host_version(&self, host: &semver::Version) -> Result<(), PluginError> {
        let Some(required) = self.min_host_version.as_deref().map(str::trim) else {
            return Ok(());
        };
        if required.is_empty() || required == "*" {
            return Ok(());
        }

        let satisfied = match semver::Version::parse(required) {
            Ok(minimum) => *host >= minimum,
            Err(_) => semver::VersionReq::parse(required)?.matches(host),
        };
        if satisfied {
            Ok(())
        } else {
            Err(PluginError::Config(format!(
                "compiler '{}' requires host version {required}, running {host}",
                self.name.as_deref().unwrap_or("?")
            )))
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
