//! Compiler plugin interface and the implementation table.
//!
//! A manifest only describes a compiler. Its behavior comes from a
//! [`CompilerPlugin`] looked up by compiler name in the
//! [`ImplementationTable`]. Manifests that declare an external `command`
//! but have no registered implementation get a [`ToolCompiler`] that runs
//! the command.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::context::CompilerContext;
use crate::error::{CompileError, PluginError};
use crate::executor::command::{self, CommandSpec};
use crate::executor::{library, ExecutionMode};
use crate::job::CompileJob;
use crate::manifest::{CommandDeclaration, CompilerManifest};
use crate::settings::CompileSettings;

/// Error a transform may return; only its message reaches the user.
pub type TransformError = Box<dyn std::error::Error + Send + Sync>;

pub type TransformResult = Result<String, TransformError>;

/// The compile contract every compiler implements.
///
/// The provided `compile` reads the source, runs [`compile_source`] and
/// writes the result. Plugins override `compile_source` for an in-process
/// transform, or `compile` to take over the whole job.
///
/// [`compile_source`]: CompilerPlugin::compile_source
#[async_trait]
pub trait CompilerPlugin: Send + Sync {
    async fn compile(
        &self,
        _ctx: &CompilerContext,
        job: &CompileJob,
        cancel: &CancellationToken,
    ) -> Result<(), CompileError> {
        library::compile_with_library(self, job, cancel).await
    }

    /// Transform source text. The default passes it through unchanged.
    fn compile_source(
        &self,
        code: &str,
        _base_name: &str,
        _settings: &CompileSettings,
    ) -> TransformResult {
        Ok(code.to_string())
    }

    /// Files `source` depends on.
    fn get_imports(&self, _source: &Path) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Default behavior for manifests without a code module.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl CompilerPlugin for PassThrough {}

// ─── Tool compiler ──────────────────────────────────────────────────────

pub type TransformFn = Arc<dyn Fn(&str, &str, &CompileSettings) -> TransformResult + Send + Sync>;
pub type ArgsFn = Arc<dyn Fn(&CompileJob) -> Vec<String> + Send + Sync>;
pub type ImportsFn = Arc<dyn Fn(&Path) -> Vec<PathBuf> + Send + Sync>;

#[derive(Clone)]
struct ToolCommand {
    default_program: String,
    args: ArgsFn,
}

/// A compiler that can transform in-process, run an external tool, or both.
///
/// When both are available the global advanced setting `useCommand` picks
/// the command, and `commandPath` overrides the executable.
#[derive(Clone, Default)]
pub struct ToolCompiler {
    transform: Option<TransformFn>,
    command: Option<ToolCommand>,
    imports: Option<ImportsFn>,
}

impl std::fmt::Debug for ToolCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCompiler")
            .field("transform", &self.transform.is_some())
            .field(
                "command",
                &self.command.as_ref().map(|c| c.default_program.as_str()),
            )
            .finish_non_exhaustive()
    }
}

impl ToolCompiler {
    /// In-process compiler.
    pub fn library<F>(transform: F) -> Self
    where
        F: Fn(&str, &str, &CompileSettings) -> TransformResult + Send + Sync + 'static,
    {
        Self {
            transform: Some(Arc::new(transform)),
            ..Self::default()
        }
    }

    /// Command-only compiler.
    pub fn command<F>(default_program: impl Into<String>, args: F) -> Self
    where
        F: Fn(&CompileJob) -> Vec<String> + Send + Sync + 'static,
    {
        Self::default().with_command(default_program, args)
    }

    pub fn with_command<F>(mut self, default_program: impl Into<String>, args: F) -> Self
    where
        F: Fn(&CompileJob) -> Vec<String> + Send + Sync + 'static,
    {
        self.command = Some(ToolCommand {
            default_program: default_program.into(),
            args: Arc::new(args),
        });
        self
    }

    pub fn with_imports<F>(mut self, imports: F) -> Self
    where
        F: Fn(&Path) -> Vec<PathBuf> + Send + Sync + 'static,
    {
        self.imports = Some(Arc::new(imports));
        self
    }

    /// Command compiler built from a manifest `command` block.
    pub fn from_declaration(declaration: &CommandDeclaration) -> Self {
        let templates = declaration.args.clone();
        Self::command(declaration.default.clone(), move |job| {
            templates
                .iter()
                .map(|template| expand_template(template, job))
                .filter(|arg| !arg.is_empty())
                .collect()
        })
    }

    fn mode(&self, global: &CompileSettings) -> ExecutionMode {
        ExecutionMode::select(global, self.transform.is_some(), self.command.is_some())
    }
}

#[async_trait]
impl CompilerPlugin for ToolCompiler {
    async fn compile(
        &self,
        ctx: &CompilerContext,
        job: &CompileJob,
        cancel: &CancellationToken,
    ) -> Result<(), CompileError> {
        let global = ctx.global_settings();
        match (self.mode(&global), &self.command) {
            (ExecutionMode::Command, Some(tool)) => {
                if cancel.is_cancelled() {
                    return Err(CompileError::Cancelled {
                        path: job.source.clone(),
                    });
                }
                let spec = CommandSpec::new(
                    command::command_path(&global, &tool.default_program),
                    (tool.args)(job),
                )
                .current_dir(job.source_dir())
                .timeout(ctx.command_timeout());
                command::run(&spec, &job.source, cancel).await
            }
            _ => library::compile_with_library(self, job, cancel).await,
        }
    }

    fn compile_source(
        &self,
        code: &str,
        base_name: &str,
        settings: &CompileSettings,
    ) -> TransformResult {
        match &self.transform {
            Some(transform) => transform(code, base_name, settings),
            None => Ok(code.to_string()),
        }
    }

    fn get_imports(&self, source: &Path) -> Vec<PathBuf> {
        self.imports
            .as_ref()
            .map(|imports| imports(source))
            .unwrap_or_default()
    }
}

fn render_setting(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Substitute `{src}`, `{output}`, `{srcDir}`, `{basename}`,
/// `{options.NAME}` and `{advanced.NAME}` in an argument template.
/// Unknown placeholders are left as written.
pub fn expand_template(template: &str, job: &CompileJob) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = &after[..end];
        let replacement = match key {
            "src" => Some(job.source.display().to_string()),
            "output" => Some(job.output.display().to_string()),
            "srcDir" => Some(job.source_dir().display().to_string()),
            "basename" => Some(job.base_name()),
            _ => {
                if let Some(name) = key.strip_prefix("options.") {
                    Some(render_setting(job.settings.options.get(name)))
                } else {
                    key.strip_prefix("advanced.")
                        .map(|name| render_setting(job.settings.advanced.get(name)))
                }
            }
        };
        match replacement {
            Some(value) => out.push_str(&value),
            None => {
                out.push('{');
                out.push_str(key);
                out.push('}');
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

// ─── Implementation table ───────────────────────────────────────────────

pub type PluginFactory = Arc<
    dyn Fn(&CompilerManifest, &Path) -> Result<Arc<dyn CompilerPlugin>, PluginError> + Send + Sync,
>;

/// Compiler name → implementation factory.
#[derive(Clone, Default)]
pub struct ImplementationTable {
    factories: HashMap<String, PluginFactory>,
}

impl std::fmt::Debug for ImplementationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("ImplementationTable")
            .field("names", &names)
            .finish()
    }
}

impl ImplementationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory; it receives the manifest and the plugin directory.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&CompilerManifest, &Path) -> Result<Arc<dyn CompilerPlugin>, PluginError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Register a ready-made, shared implementation.
    pub fn register_plugin(&mut self, name: impl Into<String>, plugin: Arc<dyn CompilerPlugin>) {
        self.register(name, move |_, _| Ok(plugin.clone()));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Pick the implementation for `manifest`.
    pub fn resolve(
        &self,
        manifest: &CompilerManifest,
        base_dir: &Path,
    ) -> Result<Arc<dyn CompilerPlugin>, PluginError> {
        let name = manifest.require_name()?;
        if let Some(factory) = self.factories.get(name) {
            return factory(manifest, base_dir);
        }
        if let Some(declaration) = &manifest.command {
            return Ok(Arc::new(ToolCompiler::from_declaration(declaration)));
        }
        match manifest.main.as_deref() {
            None => Ok(Arc::new(PassThrough)),
            Some(main) => Err(PluginError::Config(format!(
                "no implementation registered for compiler '{name}' (main: '{main}')"
            ))),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest(value: Value) -> CompilerManifest {
        CompilerManifest::from_value(value).unwrap()
    }

    // ── Templates ───────────────────────────────────────────────────

    #[test]
    fn test_expand_template_paths() {
        let job = CompileJob::new("/site/css/a.less", "/site/dist/a.css", "less");
        assert_eq!(expand_template("{src}", &job), "/site/css/a.less");
        assert_eq!(expand_template("--out={output}", &job), "--out=/site/dist/a.css");
        assert_eq!(expand_template("{srcDir}/{basename}.map", &job), "/site/css/a.map");
    }

    #[test]
    fn test_expand_template_settings() {
        let mut settings = CompileSettings::default();
        settings.options.insert("style".into(), json!("compressed"));
        settings.options.insert("lineNumbers".into(), json!(true));
        let job = CompileJob::new("a.scss", "a.css", "scss").with_settings(settings);
        assert_eq!(expand_template("--style={options.style}", &job), "--style=compressed");
        assert_eq!(expand_template("{options.lineNumbers}", &job), "true");
        assert_eq!(expand_template("{options.missing}", &job), "");
        assert_eq!(expand_template("{unknown} {", &job), "{unknown} {");
    }

    #[test]
    fn test_declaration_drops_empty_args() {
        let tool = ToolCompiler::from_declaration(&CommandDeclaration {
            default: "sass".into(),
            args: vec!["{options.extra}".into(), "{src}".into(), "{output}".into()],
        });
        let job = CompileJob::new("a.scss", "a.css", "scss");
        let args = (tool.command.as_ref().unwrap().args)(&job);
        assert_eq!(args, vec!["a.scss", "a.css"]);
    }

    // ── Mode selection ──────────────────────────────────────────────

    #[test]
    fn test_tool_mode_selection() {
        let both = ToolCompiler::library(|code, _, _| Ok(code.to_string()))
            .with_command("tool", |_| vec![]);
        let mut global = CompileSettings::default();
        assert_eq!(both.mode(&global), ExecutionMode::Library);
        global.advanced.insert("useCommand".into(), json!(true));
        assert_eq!(both.mode(&global), ExecutionMode::Command);

        let command_only = ToolCompiler::command("tool", |_| vec![]);
        assert_eq!(command_only.mode(&CompileSettings::default()), ExecutionMode::Command);
    }

    #[test]
    fn test_tool_compile_source_and_imports() {
        let tool = ToolCompiler::library(|code, base, _| Ok(format!("{base}:{code}")))
            .with_imports(|src| vec![src.with_extension("dep")]);
        let out = tool
            .compile_source("x", "name", &CompileSettings::default())
            .unwrap();
        assert_eq!(out, "name:x");
        assert_eq!(tool.get_imports(Path::new("a.src")), vec![PathBuf::from("a.dep")]);
    }

    #[test]
    fn test_pass_through_defaults() {
        let plugin = PassThrough;
        let out = plugin
            .compile_source("same", "a", &CompileSettings::default())
            .unwrap();
        assert_eq!(out, "same");
        assert!(plugin.get_imports(Path::new("a")).is_empty());
    }

    // ── Command mode ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_command_not_spawned_once_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let job = CompileJob::new(dir.path().join("a.src"), dir.path().join("a.out"), "src");
        let tool = ToolCompiler::command("touch", move |_| vec![marker.display().to_string()]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = tool
            .compile(&CompilerContext::standalone("tool"), &job, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CompileError::Cancelled { .. }));
        assert!(!dir.path().join("spawned").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_uses_context_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let job = CompileJob::new(dir.path().join("a.src"), dir.path().join("a.out"), "src");
        let tool = ToolCompiler::command("sh", |_| vec!["-c".into(), "sleep 5".into()]);
        let ctx = CompilerContext::standalone("tool")
            .with_command_timeout(std::time::Duration::from_millis(100));

        let err = tool
            .compile(&ctx, &job, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    // ── Implementation table ────────────────────────────────────────

    #[test]
    fn test_resolve_registered_factory() {
        let mut table = ImplementationTable::new();
        table.register_plugin("demo", Arc::new(PassThrough));
        assert!(table.contains("demo"));
        table
            .resolve(&manifest(json!({"name": "demo", "main": "index"})), Path::new("."))
            .unwrap();
    }

    #[test]
    fn test_resolve_without_main_is_pass_through() {
        let table = ImplementationTable::new();
        table
            .resolve(&manifest(json!({"name": "plain"})), Path::new("."))
            .unwrap();
    }

    #[test]
    fn test_resolve_command_declaration() {
        let table = ImplementationTable::new();
        table
            .resolve(
                &manifest(json!({"name": "sass", "main": "index.js",
                                 "command": {"default": "sass", "args": ["{src}"]}})),
                Path::new("."),
            )
            .unwrap();
    }

    #[test]
    fn test_resolve_unknown_main_is_config_error() {
        let table = ImplementationTable::new();
        let err = table
            .resolve(&manifest(json!({"name": "less", "main": "index.js"})), Path::new("."))
            .err()
            .unwrap();
        assert!(matches!(err, PluginError::Config(_)));
        assert!(err.to_string().contains("index.js"));
    }

    #[test]
    fn test_resolve_factory_sees_base_dir() {
        let mut table = ImplementationTable::new();
        table.register("dir-aware", |_, dir| {
            if dir.ends_with("plugins/dir-aware") {
                Ok(Arc::new(PassThrough) as Arc<dyn CompilerPlugin>)
            } else {
                Err(PluginError::Config(format!("unexpected dir {}", dir.display())))
            }
        });
        table
            .resolve(
                &manifest(json!({"name": "dir-aware"})),
                Path::new("/home/me/plugins/dir-aware"),
            )
            .unwrap();
    }
}
