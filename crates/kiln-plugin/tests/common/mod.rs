// Shared test utilities for integration tests
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kiln_plugin::events::CompileEvent;
use kiln_plugin::{
    CompilerRegistry, ImplementationTable, Notifier, RegistryConfig,
};
use tokio::sync::broadcast;

/// Notifier that remembers every reported error.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    reports: Mutex<Vec<(String, PathBuf)>>,
}

impl RecordingNotifier {
    pub fn reports(&self) -> Vec<(String, PathBuf)> {
        self.reports.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn report_error(&self, message: &str, path: &Path) {
        self.reports
            .lock()
            .unwrap()
            .push((message.to_string(), path.to_path_buf()));
    }
}

pub fn test_config(plugin_dir: &Path) -> RegistryConfig {
    RegistryConfig {
        plugin_dir: plugin_dir.to_path_buf(),
        max_jobs: 4,
        command_timeout: Duration::from_secs(5),
        ..RegistryConfig::default()
    }
}

/// A registry over `plugin_dir` reporting into the returned notifier.
pub fn test_registry(
    plugin_dir: &Path,
    table: ImplementationTable,
) -> (CompilerRegistry, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let registry = CompilerRegistry::new(test_config(plugin_dir), table).with_notifier(notifier.clone());
    (registry, notifier)
}

/// Write `manifest` as `<plugin_dir>/<name>/package.json`.
pub fn write_plugin(plugin_dir: &Path, name: &str, manifest: serde_json::Value) -> PathBuf {
    let dir = plugin_dir.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("package.json"), manifest.to_string()).unwrap();
    dir
}

/// Every event already sitting in the channel.
pub fn drain(rx: &mut broadcast::Receiver<CompileEvent>) -> Vec<CompileEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
