//! Host services available to a compiler while it compiles.
//!
//! A [`CompilerContext`] is built by the registry for every job. It carries
//! a snapshot of the registered definitions taken when the job was
//! dispatched, so lookups stay valid even if a plugin is uninstalled while
//! the job runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::definition::CompilerDefinition;
use crate::notify::{Notifier, TracingNotifier};
use crate::settings::{CompileSettings, SettingsProvider, SettingsStore};
use crate::watch::{self, ImportGraph, ImportWatcher};

/// Snapshot of the registry's name → definition map.
pub type DefinitionSnapshot = Arc<HashMap<String, Arc<CompilerDefinition>>>;

/// Default hard timeout of an external compile command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Clone)]
pub struct CompilerContext {
    compiler: String,
    definitions: DefinitionSnapshot,
    settings: Arc<dyn SettingsProvider>,
    notifier: Arc<dyn Notifier>,
    watcher: Arc<dyn ImportWatcher>,
    command_timeout: Duration,
}

impl std::fmt::Debug for CompilerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerContext")
            .field("compiler", &self.compiler)
            .field("definitions", &self.definitions.len())
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

impl CompilerContext {
    pub fn new(
        compiler: impl Into<String>,
        definitions: DefinitionSnapshot,
        settings: Arc<dyn SettingsProvider>,
        notifier: Arc<dyn Notifier>,
        watcher: Arc<dyn ImportWatcher>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            compiler: compiler.into(),
            definitions,
            settings,
            notifier,
            watcher,
            command_timeout,
        }
    }

    /// A context with no registered definitions and empty settings, for
    /// running a plugin outside a registry.
    pub fn standalone(compiler: impl Into<String>) -> Self {
        Self::new(
            compiler,
            Arc::default(),
            Arc::new(SettingsStore::new()),
            Arc::new(TracingNotifier),
            Arc::new(ImportGraph::new()),
            DEFAULT_COMMAND_TIMEOUT,
        )
    }

    pub fn with_settings(mut self, settings: Arc<dyn SettingsProvider>) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Name of the compiler this context was built for.
    pub fn compiler_name(&self) -> &str {
        &self.compiler
    }

    /// Global settings of this compiler.
    pub fn global_settings(&self) -> CompileSettings {
        self.global_settings_of(&self.compiler)
    }

    /// Global settings of `compiler`: its option defaults overlaid with
    /// the stored overrides.
    pub fn global_settings_of(&self, compiler: &str) -> CompileSettings {
        let stored = self.settings.global_settings_of(compiler);
        match self.definitions.get(compiler) {
            Some(definition) => definition.default_settings().merged(&stored),
            None => stored,
        }
    }

    pub fn app_config(&self) -> Value {
        self.settings.app_config()
    }

    pub fn project_by_id(&self, id: &str) -> Option<Value> {
        self.settings.project_by_id(id)
    }

    /// Show a compile error to the user, attached to `path`.
    pub fn report_error(&self, message: &str, path: &Path) {
        self.notifier.report_error(message, path);
    }

    /// Publish the imports of `source` to the file watcher.
    pub fn watch_imports(&self, imports: &[PathBuf], source: &Path) {
        watch::register_imports(self.watcher.as_ref(), imports, source);
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }
}
