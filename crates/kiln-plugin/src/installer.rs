//! Compiler installer.
//!
//! Installs a compiler from an unpacked plugin directory into the user
//! plugin directory and registers it, and uninstalls user compilers.
//! Fetching and unpacking archives is left to the caller.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;

use crate::definition::CompilerDefinition;
use crate::error::PluginError;
use crate::manifest::{parse_lenient_version, CompilerManifest, MANIFEST_FILE};
use crate::registry::CompilerRegistry;

/// Recursively copy a directory and its contents.
async fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<(), PluginError> {
    tokio::fs::create_dir_all(dest).await.map_err(|e| {
        PluginError::Installation(format!("failed to create dir {}: {e}", dest.display()))
    })?;

    let mut entries = tokio::fs::read_dir(src).await.map_err(|e| {
        PluginError::Installation(format!("failed to read dir {}: {e}", src.display()))
    })?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PluginError::Installation(format!("failed to read dir entry: {e}")))?
    {
        let entry_path = entry.path();
        let dest_path = dest.join(entry.file_name());
        let file_type = entry.file_type().await?;

        if file_type.is_dir() {
            Box::pin(copy_dir_recursive(&entry_path, &dest_path)).await?;
        } else if file_type.is_file() {
            tokio::fs::copy(&entry_path, &dest_path).await.map_err(|e| {
                PluginError::Installation(format!("failed to copy {}: {e}", entry_path.display()))
            })?;
        } else {
            tracing::debug!(path = %entry_path.display(), "skipping non-regular file");
        }
    }

    Ok(())
}

/// Drop a partial install and put the previous one, if any, back in place.
async fn restore_previous(install_dir: &Path, backup: Option<&Path>, name: &str) {
    if install_dir.exists() {
        if let Err(e) = tokio::fs::remove_dir_all(install_dir).await {
            tracing::warn!(compiler = %name, "failed to clean up after failed install: {e}");
        }
    }
    if let Some(aside) = backup {
        if let Err(e) = tokio::fs::rename(aside, install_dir).await {
            tracing::error!(compiler = %name, dir = %aside.display(), "failed to restore previous install: {e}");
        }
    }
}

/// Whether `latest` is newer than `current`. Missing components count as
/// zero, so `"1.2"` equals `"1.2.0"`.
pub fn update_available(current: &str, latest: &str) -> Result<bool, PluginError> {
    Ok(parse_lenient_version(latest)? > parse_lenient_version(current)?)
}

#[derive(Debug, Clone)]
pub struct PluginInstaller {
    plugin_dir: PathBuf,
}

impl PluginInstaller {
    pub fn new(plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
        }
    }

    /// Installer writing to the registry's configured plugin directory.
    pub fn for_registry(registry: &CompilerRegistry) -> Self {
        Self::new(registry.config().plugin_dir.clone())
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    /// Install the compiler unpacked in `source_dir` and register it.
    ///
    /// An installed compiler of the same name is replaced.
    pub async fn install_from_dir(
        &self,
        registry: &CompilerRegistry,
        source_dir: &Path,
    ) -> Result<Arc<CompilerDefinition>, PluginError> {
        tracing::info!(source = %source_dir.display(), "installing compiler");

        let manifest_path = source_dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Err(PluginError::Installation(format!(
                "{MANIFEST_FILE} not found in {}",
                source_dir.display()
            )));
        }
        let manifest = CompilerManifest::read(&manifest_path).await?;
        manifest.validate_user()?;
        manifest.check_host_version(&registry.config().host_version)?;
        let name = manifest.require_name()?.to_string();

        let install_dir = self.plugin_dir.join(&name);
        let same_dir = match (source_dir.canonicalize(), install_dir.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };

        // A previous install is moved aside and restored if the new one fails.
        let mut backup = None;
        if !same_dir {
            if install_dir.exists() {
                let aside = self.plugin_dir.join(format!(".{name}.previous-{}", Uuid::new_v4()));
                tokio::fs::rename(&install_dir, &aside).await.map_err(|e| {
                    PluginError::Installation(format!("failed to move previous install aside: {e}"))
                })?;
                backup = Some(aside);
            }
            if let Err(e) = copy_dir_recursive(source_dir, &install_dir).await {
                restore_previous(&install_dir, backup.as_deref(), &name).await;
                return Err(e);
            }
        }

        let definition = match registry.add_definition(manifest, Some(&install_dir)).await {
            Ok(definition) => definition,
            Err(e) => {
                if !same_dir {
                    restore_previous(&install_dir, backup.as_deref(), &name).await;
                }
                return Err(e);
            }
        };

        if let Some(aside) = backup {
            if let Err(e) = tokio::fs::remove_dir_all(&aside).await {
                tracing::warn!(compiler = %name, dir = %aside.display(), "failed to remove previous install: {e}");
            }
        }

        tracing::info!(
            compiler = %name,
            version = definition.version.as_deref().unwrap_or("-"),
            dir = %install_dir.display(),
            "compiler installed"
        );
        Ok(definition)
    }

    /// Unregister a user compiler and delete its files. Built-ins are refused.
    pub async fn uninstall(&self, registry: &CompilerRegistry, name: &str) -> Result<(), PluginError> {
        let removed = registry.remove_definition(name).await?;

        if let Some(dir) = &removed.base_dir {
            if dir.exists() {
                tokio::fs::remove_dir_all(dir).await.map_err(|e| {
                    PluginError::Installation(format!("failed to remove compiler files: {e}"))
                })?;
            }
        }

        tracing::info!(compiler = %name, "compiler uninstalled");
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────
