//! Import-watch bridge.
//!
//! After a successful compile the registry forwards the file's imports to
//! the file watcher, so that editing an import rebuilds the files that
//! depend on it.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// The file-watching collaborator.
pub trait ImportWatcher: Send + Sync {
    /// Record that `source` depends on every path in `imports`, replacing
    /// what was previously recorded for `source`.
    fn add_imports(&self, imports: &[PathBuf], source: &Path);
}

/// Forward `imports` of `for_source` to the watcher.
pub fn register_imports(watcher: &dyn ImportWatcher, imports: &[PathBuf], for_source: &Path) {
    tracing::debug!(
        source = %for_source.display(),
        count = imports.len(),
        "registering imports"
    );
    watcher.add_imports(imports, for_source);
}

#[derive(Debug, Default)]
struct Graph {
    /// source → imports
    imports: HashMap<PathBuf, BTreeSet<PathBuf>>,
    /// import → dependent sources
    dependents: HashMap<PathBuf, BTreeSet<PathBuf>>,
}

/// In-memory dependency graph usable as an [`ImportWatcher`].
#[derive(Debug, Default)]
pub struct ImportGraph {
    inner: Mutex<Graph>,
}

impl ImportGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sources that must be rebuilt when `import` changes.
    pub fn dependents_of(&self, import: &Path) -> Vec<PathBuf> {
        let graph = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        graph
            .dependents
            .get(import)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn imports_of(&self, source: &Path) -> Vec<PathBuf> {
        let graph = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        graph
            .imports
            .get(source)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl ImportWatcher for ImportGraph {
    fn add_imports(&self, imports: &[PathBuf], source: &Path) {
        let mut graph = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(previous) = graph.imports.remove(source) {
            for import in previous {
                if let Some(dependents) = graph.dependents.get_mut(&import) {
                    dependents.remove(source);
                    if dependents.is_empty() {
                        graph.dependents.remove(&import);
                    }
                }
            }
        }

        if imports.is_empty() {
            return;
        }

        for import in imports {
            graph
                .dependents
                .entry(import.clone())
                .or_default()
                .insert(source.to_path_buf());
        }
        graph
            .imports
            .insert(source.to_path_buf(), imports.iter().cloned().collect());
    }
}
