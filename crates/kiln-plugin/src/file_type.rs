//! File type registry.
//!
//! Maps a file type name to the [`FileType`] that declares it. Each file
//! type names its owning compiler by key only, so dropping a compiler never
//! leaves a dangling owner behind.
//!
//! When two compilers declare the same type name the later registration
//! owns it. The earlier compiler keeps the type in its own definition, and
//! [`FileTypeRegistry::reclaim`] hands the name back to it once the newer
//! owner is unregistered.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PluginError;
use crate::manifest::one_or_many;

/// A file type as declared in a compiler manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileTypeConfig {
    /// Type name; defaults to the first extension.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "extension", deserialize_with = "one_or_many")]
    pub extensions: Vec<String>,
    /// Extension of the compiled output (`"css"` for `less`).
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    /// Plugin-supplied metadata the host does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A registered file type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileType {
    pub name: String,
    pub extensions: Vec<String>,
    /// Name of the owning compiler definition.
    pub compiler: String,
    pub output_extension: Option<String>,
    pub icon: Option<PathBuf>,
    pub metadata: Map<String, Value>,
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

impl FileType {
    /// Build a file type owned by `compiler`, resolving the icon against
    /// `base_dir`.
    pub fn from_config(
        config: &FileTypeConfig,
        base_dir: &Path,
        compiler: &str,
    ) -> Result<Self, PluginError> {
        let extensions: Vec<String> = config
            .extensions
            .iter()
            .map(|ext| normalize_extension(ext))
            .filter(|ext| !ext.is_empty())
            .collect();

        let name = config
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| extensions.first().cloned())
            .ok_or_else(|| {
                PluginError::Config(format!(
                    "compiler '{compiler}' declares a file type with neither name nor extensions"
                ))
            })?;

        Ok(Self {
            name,
            extensions,
            compiler: compiler.to_string(),
            output_extension: config.output.as_deref().map(normalize_extension),
            icon: config.icon.as_ref().map(|icon| base_dir.join(icon)),
            metadata: config.extra.clone(),
        })
    }

    /// Whether `ext` (with or without the leading dot) is one of this
    /// type's extensions.
    pub fn matches_extension(&self, ext: &str) -> bool {
        let ext = normalize_extension(ext);
        self.extensions.iter().any(|known| *known == ext)
    }
}

/// Registry of all file types, keyed by type name.
#[derive(Debug, Clone, Default)]
pub struct FileTypeRegistry {
    types: HashMap<String, FileType>,
}

impl FileTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file type declared by `compiler`.
    ///
    /// A later registration under an existing name replaces the earlier one.
    pub fn register(
        &mut self,
        config: &FileTypeConfig,
        base_dir: &Path,
        compiler: &str,
    ) -> Result<FileType, PluginError> {
        let file_type = FileType::from_config(config, base_dir, compiler)?;
        if let Some(previous) = self.types.get(&file_type.name) {
            if previous.compiler != compiler {
                tracing::warn!(
                    file_type = %file_type.name,
                    previous = %previous.compiler,
                    compiler = %compiler,
                    "file type taken over by another compiler"
                );
            }
        }
        self.types.insert(file_type.name.clone(), file_type.clone());
        Ok(file_type)
    }

    /// Look up a file type by name.
    pub fn resolve(&self, type_name: &str) -> Result<&FileType, PluginError> {
        self.types
            .get(type_name)
            .ok_or_else(|| PluginError::NotFound(format!("file type '{type_name}'")))
    }

    /// Drop every file type owned by `compiler`. Returns how many were removed.
    pub fn unregister_all_for_compiler(&mut self, compiler: &str) -> usize {
        let before = self.types.len();
        self.types.retain(|_, file_type| file_type.compiler != compiler);
        before - self.types.len()
    }

    /// Register `file_type` again if its name is unclaimed. Returns whether
    /// it was inserted.
    pub fn reclaim(&mut self, file_type: &FileType) -> bool {
        if self.types.contains_key(&file_type.name) {
            return false;
        }
        tracing::info!(
            file_type = %file_type.name,
            compiler = %file_type.compiler,
            "file type returned to earlier compiler"
        );
        self.types.insert(file_type.name.clone(), file_type.clone());
        true
    }

    /// The file type claiming `ext`. When several do, the one with the
    /// smallest name wins so the answer does not depend on insertion order.
    pub fn for_extension(&self, ext: &str) -> Option<&FileType> {
        self.types
            .values()
            .filter(|file_type| file_type.matches_extension(ext))
            .min_by(|a, b| a.name.cmp(&b.name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileType> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
