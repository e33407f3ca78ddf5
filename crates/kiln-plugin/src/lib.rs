//! Kiln compiler plugin system
//!
//! Compilers are packaged as plugins: a JSON manifest declaring the file
//! types they handle and the options they expose, plus an implementation
//! registered by name. The registry resolves the compiler of a file by its
//! file type and runs the compile either in-process or through an external
//! command with a hard timeout, forwarding discovered imports to the file
//! watcher.

pub mod builtins;
pub mod context;
pub mod definition;
pub mod error;
pub mod events;
pub mod executor;
pub mod file_type;
pub mod installer;
pub mod job;
pub mod manifest;
pub mod notify;
pub mod option;
pub mod plugin;
pub mod registry;
pub mod settings;
pub mod watch;

pub use context::CompilerContext;
pub use definition::CompilerDefinition;
pub use error::{CompileError, PluginError};
pub use events::{CompileEvent, CompileEventKind};
pub use executor::ExecutionMode;
pub use file_type::{FileType, FileTypeRegistry};
pub use installer::PluginInstaller;
pub use job::{CompileJob, CompileReport};
pub use manifest::CompilerManifest;
pub use notify::{Notifier, TracingNotifier};
pub use option::CompileOption;
pub use plugin::{CompilerPlugin, ImplementationTable, PassThrough, ToolCompiler};
pub use registry::{CompileHandle, CompilerRegistry, RegistryConfig};
pub use settings::{CompileSettings, SettingsProvider, SettingsStore};
pub use watch::{ImportGraph, ImportWatcher};
