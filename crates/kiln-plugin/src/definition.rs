//! Compiler definitions.
//!
//! A [`CompilerDefinition`] is the loaded form of a manifest: identity,
//! the file types it owns, its normalized option schema and the
//! [`CompilerPlugin`] that implements its compile contract.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use crate::error::PluginError;
use crate::file_type::{FileType, FileTypeRegistry};
use crate::manifest::CompilerManifest;
use crate::option::{self, CompileOption};
use crate::plugin::CompilerPlugin;
use crate::settings::CompileSettings;

#[derive(Clone)]
pub struct CompilerDefinition {
    pub name: String,
    pub display: String,
    pub description: String,
    pub version: Option<String>,
    pub min_host_version: Option<String>,
    pub maintainers: Vec<Value>,
    pub file_types: Vec<FileType>,
    pub options: Vec<CompileOption>,
    pub advanced: Vec<CompileOption>,
    pub libraries: Vec<String>,
    pub is_built_in: bool,
    pub project_settings_path: Option<PathBuf>,
    /// Plugin directory; `None` for built-ins.
    pub base_dir: Option<PathBuf>,
    pub repository: Option<String>,
    plugin: Arc<dyn CompilerPlugin>,
}

impl std::fmt::Debug for CompilerDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerDefinition")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("file_types", &self.file_types)
            .field("is_built_in", &self.is_built_in)
            .field("base_dir", &self.base_dir)
            .finish_non_exhaustive()
    }
}

impl CompilerDefinition {
    /// Load a definition and register its file types into `file_types`.
    ///
    /// A definition without `base_dir` is built-in. Option schemas are
    /// normalized before any file type is registered.
    pub fn load(
        manifest: &CompilerManifest,
        base_dir: Option<&Path>,
        plugin: Arc<dyn CompilerPlugin>,
        file_types: &mut FileTypeRegistry,
    ) -> Result<Self, PluginError> {
        let name = manifest.require_name()?.to_string();

        let options = option::normalize(&manifest.options)
            .map_err(|e| PluginError::Config(format!("compiler '{name}' options: {e}")))?;
        let advanced = option::normalize(&manifest.advanced)
            .map_err(|e| PluginError::Config(format!("compiler '{name}' advanced options: {e}")))?;

        let resource_dir = base_dir.unwrap_or_else(|| Path::new(""));
        let registered = manifest
            .file_types
            .iter()
            .map(|config| file_types.register(config, resource_dir, &name))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            display: manifest.display.clone().unwrap_or_else(|| name.clone()),
            description: manifest.description.clone().unwrap_or_default(),
            version: manifest.version.clone(),
            min_host_version: manifest.min_host_version.clone(),
            maintainers: manifest.maintainers.clone(),
            file_types: registered,
            options,
            advanced,
            libraries: manifest.libs.clone(),
            is_built_in: base_dir.is_none(),
            project_settings_path: manifest
                .project_settings
                .as_ref()
                .map(|path| resource_dir.join(path)),
            base_dir: base_dir.map(Path::to_path_buf),
            repository: manifest.repository.clone(),
            plugin,
            name,
        })
    }

    pub fn plugin(&self) -> &Arc<dyn CompilerPlugin> {
        &self.plugin
    }

    /// Whether any of this compiler's file types claims `ext`.
    pub fn accepts(&self, ext: &str) -> bool {
        self.file_types.iter().any(|ft| ft.matches_extension(ext))
    }

    pub fn file_type(&self, type_name: &str) -> Option<&FileType> {
        self.file_types.iter().find(|ft| ft.name == type_name)
    }

    pub fn output_extension(&self, type_name: &str) -> Option<&str> {
        self.file_type(type_name)?.output_extension.as_deref()
    }

    /// Settings made of every option's default value.
    pub fn default_settings(&self) -> CompileSettings {
        CompileSettings {
            options: option::default_settings(&self.options),
            advanced: option::default_settings(&self.advanced),
        }
    }

    pub fn has_options(&self) -> bool {
        self.options.iter().chain(&self.advanced).any(|o| o.name().is_some())
    }
}
