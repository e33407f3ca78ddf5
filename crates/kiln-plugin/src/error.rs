//! Compiler plugin error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("installation error: {0}")]
    Installation(String),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("semver error: {0}")]
    Semver(#[from] semver::Error),
}

impl PluginError {
    /// Load-time errors that skip a single plugin instead of aborting the load.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            PluginError::Config(_)
                | PluginError::InvalidManifest(_)
                | PluginError::Serialization(_)
                | PluginError::Semver(_)
        )
    }
}

/// Failure of a single compile job.
///
/// Every variant carries the source path of the job so that the
/// notification layer can attach the message to the right file.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{message}")]
    Transform { path: PathBuf, message: String },

    #[error("failed to write {}: {source}", .output.display())]
    Write {
        path: PathBuf,
        output: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start {program}: {source}")]
    Spawn {
        path: PathBuf,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{stderr}")]
    Exited {
        path: PathBuf,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} did not finish within {timeout_ms} ms")]
    TimedOut {
        path: PathBuf,
        program: String,
        timeout_ms: u64,
    },

    #[error("compile of {} was cancelled", .path.display())]
    Cancelled { path: PathBuf },
}

impl CompileError {
    /// Build a transform failure for `path`.
    pub fn transform(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        CompileError::Transform {
            path: path.into(),
            message: message.into(),
        }
    }

    /// The source file the failed job was compiling.
    pub fn source_path(&self) -> &Path {
        match self {
            CompileError::Read { path, .. }
            | CompileError::Transform { path, .. }
            | CompileError::Write { path, .. }
            | CompileError::Spawn { path, .. }
            | CompileError::Exited { path, .. }
            | CompileError::TimedOut { path, .. }
            | CompileError::Cancelled { path } => path,
        }
    }

    /// Whether the external command was killed by the compile timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CompileError::TimedOut { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    // ── Display messages ──────────────────────────────────────────────

    #[test]
    fn test_display_config() {
        let err = PluginError::Config("missing name".into());
        assert_eq!(err.to_string(), "config error: missing name");
    }

    #[test]
    fn test_display_not_found() {
        let err = PluginError::NotFound("file type 'sass'".into());
        assert_eq!(err.to_string(), "not found: file type 'sass'");
    }

    #[test]
    fn test_display_compile_is_transparent() {
        let err: PluginError = CompileError::transform("a.less", "unexpected token").into();
        assert_eq!(err.to_string(), "unexpected token");
    }

    #[test]
    fn test_display_exited_is_stderr() {
        let err = CompileError::Exited {
            path: "a.less".into(),
            code: Some(1),
            stderr: "ParseError: missing }".into(),
        };
        assert_eq!(err.to_string(), "ParseError: missing }");
    }

    #[test]
    fn test_display_timed_out() {
        let err = CompileError::TimedOut {
            path: "a.less".into(),
            program: "lessc".into(),
            timeout_ms: 5000,
        };
        assert_eq!(err.to_string(), "lessc did not finish within 5000 ms");
        assert!(err.is_timeout());
    }

    // ── Accessors ─────────────────────────────────────────────────────

    #[test]
    fn test_source_path_every_variant() {
        let io_err = || io::Error::new(io::ErrorKind::Other, "boom");
        let errors = vec![
            CompileError::Read { path: "s.x".into(), source: io_err() },
            CompileError::transform("s.x", "bad"),
            CompileError::Write { path: "s.x".into(), output: "o.y".into(), source: io_err() },
            CompileError::Spawn { path: "s.x".into(), program: "p".into(), source: io_err() },
            CompileError::Exited { path: "s.x".into(), code: None, stderr: String::new() },
            CompileError::Cancelled { path: "s.x".into() },
        ];
        for err in errors {
            assert_eq!(err.source_path(), Path::new("s.x"));
            assert!(!err.is_timeout());
        }
    }

    #[test]
    fn test_is_config_classification() {
        assert!(PluginError::Config("x".into()).is_config());
        assert!(PluginError::InvalidManifest("x".into()).is_config());
        assert!(!PluginError::NotFound("x".into()).is_config());
        assert!(!PluginError::Io(io::Error::new(io::ErrorKind::Other, "x")).is_config());
    }

    // ── From conversions ──────────────────────────────────────────────

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file missing");
        let err: PluginError = io_err.into();
        assert!(matches!(err, PluginError::Io(_)));
        assert!(err.to_string().contains("file missing"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("bad json{{{").unwrap_err();
        let err: PluginError = json_err.into();
        assert!(matches!(err, PluginError::Serialization(_)));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= bad").unwrap_err();
        let err: PluginError = toml_err.into();
        assert!(matches!(err, PluginError::TomlParse(_)));
    }

    #[test]
    fn test_from_semver_error() {
        let sv_err = "not.a.version".parse::<semver::Version>().unwrap_err();
        let err: PluginError = sv_err.into();
        assert!(matches!(err, PluginError::Semver(_)));
    }

    // ── Error trait source chain ──────────────────────────────────────

    #[test]
    fn test_error_source_read() {
        use std::error::Error;
        let err = CompileError::Read {
            path: "a".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.source().is_some());
    }

    #[test]
    fn test_error_source_string_variants() {
        use std::error::Error;
        let err = CompileError::transform("a", "bad");
        assert!(err.source().is_none());
    }
}
