//! Compile requests and their results.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::settings::CompileSettings;

/// A request to compile one source file into one output file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileJob {
    #[serde(rename = "src")]
    pub source: PathBuf,
    pub output: PathBuf,
    /// Name of the registered file type that selects the compiler.
    #[serde(rename = "type")]
    pub file_type: String,
    #[serde(default)]
    pub settings: CompileSettings,
}

impl CompileJob {
    pub fn new(
        source: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        file_type: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            output: output.into(),
            file_type: file_type.into(),
            settings: CompileSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: CompileSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Source file name without its extension.
    pub fn base_name(&self) -> String {
        self.source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Directory the source file lives in.
    pub fn source_dir(&self) -> &Path {
        self.source
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }
}

/// Summary of a successful compile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompileReport {
    pub job_id: Uuid,
    pub compiler: String,
    pub source: PathBuf,
    pub output: PathBuf,
    pub imports: Vec<PathBuf>,
    pub elapsed: Duration,
}
