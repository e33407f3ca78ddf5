//! External compiler invocation.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::context::DEFAULT_COMMAND_TIMEOUT;
use crate::error::CompileError;
use crate::executor::COMMAND_PATH;
use crate::settings::CompileSettings;

/// One invocation of an external compiler.
///
/// Arguments are handed to the process as-is; no shell is involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: PathBuf,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            current_dir: PathBuf::from("."),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = dir.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The command as a user would type it, for logs and error messages.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(quote_arg)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Quote `arg` for display if it contains whitespace.
pub fn quote_arg(arg: &str) -> Cow<'_, str> {
    if arg.is_empty() || arg.chars().any(char::is_whitespace) {
        Cow::Owned(format!("\"{}\"", arg.replace('"', "\\\"")))
    } else {
        Cow::Borrowed(arg)
    }
}

/// The executable to run: `commandPath` from the global advanced settings,
/// else `default`.
pub fn command_path(global: &CompileSettings, default: &str) -> String {
    global
        .advanced_str(COMMAND_PATH)
        .unwrap_or(default)
        .to_string()
}

fn failure_message(stderr: &[u8], stdout: &[u8], status: std::process::ExitStatus) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    if !stderr.trim().is_empty() {
        return stderr.trim().to_string();
    }
    let stdout = String::from_utf8_lossy(stdout);
    if !stdout.trim().is_empty() {
        return stdout.trim().to_string();
    }
    format!("compiler exited with {status}")
}

/// Run `spec` for the job compiling `source`.
///
/// The child is killed when the timeout elapses or `cancel` fires.
pub async fn run(
    spec: &CommandSpec,
    source: &Path,
    cancel: &CancellationToken,
) -> Result<(), CompileError> {
    let command_line = spec.command_line();
    tracing::debug!(
        source = %source.display(),
        command = %command_line,
        cwd = %spec.current_dir.display(),
        "running compile command"
    );

    let spawn_error = |e: std::io::Error| CompileError::Spawn {
        path: source.to_path_buf(),
        program: spec.program.clone(),
        source: e,
    };

    let child = Command::new(&spec.program)
        .args(&spec.args)
        .current_dir(&spec.current_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(spawn_error)?;

    // Dropping the wait future drops the child, which kills it.
    let output = tokio::select! {
        result = tokio::time::timeout(spec.timeout, child.wait_with_output()) => match result {
            Ok(output) => output.map_err(spawn_error)?,
            Err(_) => {
                tracing::warn!(
                    source = %source.display(),
                    command = %command_line,
                    timeout_ms = spec.timeout.as_millis() as u64,
                    "compile command timed out, killed"
                );
                return Err(CompileError::TimedOut {
                    path: source.to_path_buf(),
                    program: spec.program.clone(),
                    timeout_ms: spec.timeout.as_millis() as u64,
                });
            }
        },
        _ = cancel.cancelled() => {
            tracing::debug!(source = %source.display(), "compile command cancelled");
            return Err(CompileError::Cancelled { path: source.to_path_buf() });
        }
    };

    if output.status.success() {
        Ok(())
    } else {
        let stderr = failure_message(&output.stderr, &output.stdout, output.status);
        tracing::error!(
            source = %source.display(),
            command = %command_line,
            code = ?output.status.code(),
            %stderr,
            "compile command failed"
        );
        Err(CompileError::Exited {
            path: source.to_path_buf(),
            code: output.status.code(),
            stderr,
        })
    }
}
