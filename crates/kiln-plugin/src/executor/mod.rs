//! Compile execution strategies.
//!
//! - [`library`] reads the source, transforms it in-process and writes the
//!   result.
//! - [`command`] runs an external compiler as a child process with a hard
//!   timeout.

pub mod command;
pub mod library;

use crate::settings::CompileSettings;

/// Advanced setting that switches a compiler to its external command.
pub const USE_COMMAND: &str = "useCommand";

/// Advanced setting overriding the external command's executable.
pub const COMMAND_PATH: &str = "commandPath";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Library,
    Command,
}

impl ExecutionMode {
    /// Pick a mode from the compiler's global settings and what it can do.
    ///
    /// A compiler that only has a command always runs it; one that has both
    /// runs the command when `useCommand` is set.
    pub fn select(global: &CompileSettings, has_library: bool, has_command: bool) -> Self {
        if has_command && (!has_library || global.advanced_flag(USE_COMMAND)) {
            ExecutionMode::Command
        } else {
            ExecutionMode::Library
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_select_mode() {
        let mut global = CompileSettings::default();
        assert_eq!(ExecutionMode::select(&global, true, false), ExecutionMode::Library);
        assert_eq!(ExecutionMode::select(&global, true, true), ExecutionMode::Library);
        assert_eq!(ExecutionMode::select(&global, false, true), ExecutionMode::Command);

        global.advanced.insert(USE_COMMAND.into(), json!(true));
        assert_eq!(ExecutionMode::select(&global, true, true), ExecutionMode::Command);
        // Nothing to run: stay in-process.
        assert_eq!(ExecutionMode::select(&global, true, false), ExecutionMode::Library);
    }
}
