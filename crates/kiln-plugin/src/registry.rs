//! Compiler registry: loads compiler definitions and dispatches compiles.
//!
//! The `CompilerRegistry` is the single entry point for compiling a file.
//! It owns the name → definition map and the file type map, resolves the
//! compiler of a job by its file type name, and runs the job through the
//! compiler's plugin inside a bounded worker pool.
//!
//! Definitions are stored as an `Arc`'d map that is copied on write, so a
//! running compile keeps the snapshot it was dispatched with even if a
//! compiler is uninstalled meanwhile.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, OwnedMutexGuard, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::builtins;
use crate::context::{CompilerContext, DefinitionSnapshot, DEFAULT_COMMAND_TIMEOUT};
use crate::definition::CompilerDefinition;
use crate::error::{CompileError, PluginError};
use crate::events::{CompileEvent, CompileEventKind, EVENT_CHANNEL_CAPACITY};
use crate::file_type::{FileType, FileTypeRegistry};
use crate::job::{CompileJob, CompileReport};
use crate::manifest::{parse_lenient_version, CompilerManifest, MANIFEST_FILE};
use crate::notify::{sanitize_message, Notifier, TracingNotifier};
use crate::plugin::ImplementationTable;
use crate::settings::{CompileSettings, SettingsProvider, SettingsStore};
use crate::watch::{self, ImportGraph, ImportWatcher};

/// Version of this host, checked against `minHostVersion`.
pub const HOST_VERSION: &str = env!("CARGO_PKG_VERSION");

// ─── Configuration ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Built-in manifest to read instead of the embedded one.
    pub builtin_manifest: Option<PathBuf>,
    /// Directory holding one sub-directory per user-installed compiler.
    pub plugin_dir: PathBuf,
    /// Maximum number of compiles running at once.
    pub max_jobs: usize,
    pub command_timeout: Duration,
    pub host_version: semver::Version,
}

fn default_plugin_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kiln")
        .join("compilers")
}

fn default_max_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_host_version() -> semver::Version {
    semver::Version::parse(HOST_VERSION).unwrap_or_else(|_| semver::Version::new(0, 0, 0))
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            builtin_manifest: None,
            plugin_dir: default_plugin_dir(),
            max_jobs: default_max_jobs(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            host_version: default_host_version(),
        }
    }
}

impl RegistryConfig {
    /// Read the configuration from `KILN_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            builtin_manifest: std::env::var_os("KILN_BUILTIN_MANIFEST").map(PathBuf::from),
            plugin_dir: std::env::var_os("KILN_PLUGIN_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_plugin_dir),
            max_jobs: std::env::var("KILN_MAX_JOBS")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or_else(default_max_jobs),
            command_timeout: std::env::var("KILN_COMMAND_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_COMMAND_TIMEOUT),
            host_version: std::env::var("KILN_HOST_VERSION")
                .ok()
                .and_then(|v| parse_lenient_version(&v).ok())
                .unwrap_or_else(default_host_version),
        }
    }
}

// ─── Per-output locks ───────────────────────────────────────────────────

/// Serializes compiles that write the same output file.
#[derive(Debug, Default)]
struct OutputLocks {
    locks: std::sync::Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl OutputLocks {
    async fn lock(&self, output: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Only the map holds idle locks.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(output.to_path_buf()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

// ─── Compile handle ─────────────────────────────────────────────────────

/// A compile running in the background.
#[derive(Debug)]
pub struct CompileHandle {
    job_id: Uuid,
    source: PathBuf,
    cancel: CancellationToken,
    task: JoinHandle<Result<CompileReport, PluginError>>,
}

impl CompileHandle {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Ask the job to stop. A running external command is killed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the job's outcome.
    pub async fn wait(self) -> Result<CompileReport, PluginError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(CompileError::transform(self.source, format!("compile task failed: {e}")).into()),
        }
    }
}

// ─── Registry ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct RegistryState {
    definitions: DefinitionSnapshot,
    /// Definition names in load order.
    order: Vec<String>,
    file_types: FileTypeRegistry,
    built_in: HashSet<String>,
}

/// Central compiler registry.
///
/// Construct once at startup and share it (usually as `Arc<CompilerRegistry>`).
pub struct CompilerRegistry {
    state: RwLock<RegistryState>,
    implementations: ImplementationTable,
    config: RegistryConfig,
    settings: Arc<dyn SettingsProvider>,
    notifier: Arc<dyn Notifier>,
    watcher: Arc<dyn ImportWatcher>,
    workers: Semaphore,
    output_locks: OutputLocks,
    events: broadcast::Sender<CompileEvent>,
}

impl std::fmt::Debug for CompilerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerRegistry")
            .field("implementations", &self.implementations)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Give unowned type names back to the loaded compilers that declare them,
/// latest-loaded first. Returns how many were reclaimed.
fn reclaim_file_types(
    file_types: &mut FileTypeRegistry,
    definitions: &HashMap<String, Arc<CompilerDefinition>>,
    order: &[String],
    except: Option<&str>,
) -> usize {
    order
        .iter()
        .rev()
        .filter(|name| Some(name.as_str()) != except)
        .filter_map(|name| definitions.get(name))
        .flat_map(|definition| definition.file_types.iter())
        .filter(|file_type| file_types.reclaim(file_type))
        .count()
}

impl CompilerRegistry {
    /// Create an empty registry. Built-in implementations are always
    /// available in addition to the ones in `implementations`.
    ///
    /// Does NOT load any compiler; call [`load_all`](Self::load_all).
    pub fn new(config: RegistryConfig, mut implementations: ImplementationTable) -> Self {
        builtins::register_builtins(&mut implementations);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(RegistryState::default()),
            implementations,
            workers: Semaphore::new(config.max_jobs.max(1)),
            config,
            settings: Arc::new(SettingsStore::new()),
            notifier: Arc::new(TracingNotifier),
            watcher: Arc::new(ImportGraph::new()),
            output_locks: OutputLocks::default(),
            events,
        }
    }

    pub fn with_settings(mut self, settings: Arc<dyn SettingsProvider>) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_watcher(mut self, watcher: Arc<dyn ImportWatcher>) -> Self {
        self.watcher = watcher;
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Receive lifecycle events of every compile dispatched from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<CompileEvent> {
        self.events.subscribe()
    }

    // ── Loading ─────────────────────────────────────────────────────

    /// Load built-in and user-installed compilers. Returns how many loaded.
    pub async fn load_all(&self) -> Result<usize, PluginError> {
        let builtins = self.load_builtins().await?;
        let user = self.load_user_installed().await?;
        tracing::info!(builtins, user, "compilers loaded");
        Ok(builtins + user)
    }

    /// Load the built-in manifest: the configured file, else the embedded one.
    pub async fn load_builtins(&self) -> Result<usize, PluginError> {
        match &self.config.builtin_manifest {
            Some(path) => {
                let text = tokio::fs::read_to_string(path).await?;
                self.load_builtins_from_str(&text).await
            }
            None => self.load_builtins_from_str(builtins::BUILTIN_MANIFEST).await,
        }
    }

    /// Load every entry of a built-in manifest list. Entries that fail to
    /// load are logged and skipped.
    pub async fn load_builtins_from_str(&self, manifest_list: &str) -> Result<usize, PluginError> {
        let mut loaded = 0;
        for (index, entry) in CompilerManifest::parse_list(manifest_list)?.into_iter().enumerate() {
            let result = match entry {
                Ok(manifest) => self.add_definition(manifest, None).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(_) => loaded += 1,
                Err(e) => tracing::warn!(index, "skipping built-in compiler: {e}"),
            }
        }
        Ok(loaded)
    }

    /// Scan the user plugin directory and load every compiler found there.
    ///
    /// A missing directory is not an error. Invalid plugins are logged and
    /// skipped.
    pub async fn load_user_installed(&self) -> Result<usize, PluginError> {
        let plugin_dir = &self.config.plugin_dir;
        let mut entries = match tokio::fs::read_dir(plugin_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(dir = %plugin_dir.display(), "no user plugin directory");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let mut dirs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            // Dot directories are installs set aside by the installer.
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            if path.join(MANIFEST_FILE).is_file() {
                dirs.push(path);
            }
        }
        dirs.sort();

        let mut loaded = 0;
        for dir in dirs {
            match self.load_compiler(&dir).await {
                Ok(_) => loaded += 1,
                Err(e) => tracing::warn!(dir = %dir.display(), "skipping user compiler: {e}"),
            }
        }
        Ok(loaded)
    }

    /// Load the user compiler installed in `dir`.
    pub async fn load_compiler(&self, dir: &Path) -> Result<Arc<CompilerDefinition>, PluginError> {
        let manifest = CompilerManifest::read(&dir.join(MANIFEST_FILE)).await?;
        manifest.validate_user()?;
        manifest.check_host_version(&self.config.host_version)?;
        self.add_definition(manifest, Some(dir)).await
    }

    // ── Definitions ─────────────────────────────────────────────────

    /// Register a compiler. Without `base_dir` it is built-in.
    ///
    /// A definition with an already registered name replaces the previous
    /// one along with all of its file types.
    pub async fn add_definition(
        &self,
        manifest: CompilerManifest,
        base_dir: Option<&Path>,
    ) -> Result<Arc<CompilerDefinition>, PluginError> {
        let name = manifest.require_name()?.to_string();
        let plugin = self
            .implementations
            .resolve(&manifest, base_dir.unwrap_or_else(|| Path::new("")))?;

        let mut state = self.state.write().await;

        // Stage file types so a failed load leaves the registry untouched.
        let mut file_types = state.file_types.clone();
        file_types.unregister_all_for_compiler(&name);
        let definition = Arc::new(CompilerDefinition::load(
            &manifest,
            base_dir,
            plugin,
            &mut file_types,
        )?);

        let reclaimed = reclaim_file_types(
            &mut file_types,
            &state.definitions,
            &state.order,
            Some(name.as_str()),
        );
        if reclaimed > 0 {
            tracing::debug!(compiler = %name, reclaimed, "file types returned to earlier compilers");
        }
        state.file_types = file_types;
        let replaced = Arc::make_mut(&mut state.definitions)
            .insert(name.clone(), definition.clone())
            .is_some();
        if !replaced {
            state.order.push(name.clone());
        }
        if definition.is_built_in {
            state.built_in.insert(name.clone());
        } else {
            state.built_in.remove(&name);
        }
        drop(state);

        if replaced {
            tracing::warn!(compiler = %name, "compiler replaced by a later definition");
        }
        tracing::info!(
            compiler = %name,
            version = definition.version.as_deref().unwrap_or("-"),
            file_types = definition.file_types.len(),
            built_in = definition.is_built_in,
            "compiler loaded"
        );
        Ok(definition)
    }

    /// Unregister a user compiler and all of its file types.
    pub async fn remove_definition(&self, name: &str) -> Result<Arc<CompilerDefinition>, PluginError> {
        let mut state = self.state.write().await;
        if state.built_in.contains(name) {
            return Err(PluginError::NotFound(format!(
                "compiler '{name}' is built-in and cannot be removed"
            )));
        }
        let removed = Arc::make_mut(&mut state.definitions)
            .remove(name)
            .ok_or_else(|| PluginError::NotFound(format!("compiler '{name}'")))?;
        let file_types = state.file_types.unregister_all_for_compiler(name);
        state.order.retain(|n| n != name);
        let RegistryState {
            definitions,
            order,
            file_types: registry_types,
            ..
        } = &mut *state;
        let reclaimed = reclaim_file_types(registry_types, definitions, order, None);
        drop(state);

        tracing::info!(compiler = %name, file_types, reclaimed, "compiler removed");
        Ok(removed)
    }

    // ── Lookups ─────────────────────────────────────────────────────

    /// The compiler owning the file type `type_name`.
    pub async fn resolve_for_file_type(
        &self,
        type_name: &str,
    ) -> Result<Arc<CompilerDefinition>, PluginError> {
        self.resolve_job(type_name).await.map(|(definition, _)| definition)
    }

    async fn resolve_job(
        &self,
        type_name: &str,
    ) -> Result<(Arc<CompilerDefinition>, DefinitionSnapshot), PluginError> {
        let state = self.state.read().await;
        let file_type = state.file_types.resolve(type_name)?;
        let definition = state
            .definitions
            .get(&file_type.compiler)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(format!("compiler '{}'", file_type.compiler)))?;
        Ok((definition, state.definitions.clone()))
    }

    pub async fn get(&self, name: &str) -> Option<Arc<CompilerDefinition>> {
        self.state.read().await.definitions.get(name).cloned()
    }

    /// All compilers in load order.
    pub async fn compilers(&self) -> Vec<Arc<CompilerDefinition>> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .filter_map(|name| state.definitions.get(name).cloned())
            .collect()
    }

    /// All registered file types, sorted by name.
    pub async fn file_types(&self) -> Vec<FileType> {
        let mut types: Vec<FileType> = self.state.read().await.file_types.iter().cloned().collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        types
    }

    pub async fn file_type_for_extension(&self, ext: &str) -> Option<FileType> {
        self.state.read().await.file_types.for_extension(ext).cloned()
    }

    pub async fn is_built_in(&self, name: &str) -> bool {
        self.state.read().await.built_in.contains(name)
    }

    /// User compilers eligible for update checks.
    /// User compilers with a version and a repository to check for updates.
    pub async fn updatable_compilers(&self) -> Vec<Arc<CompilerDefinition>> {
        self.compilers()
            .await
            .into_iter()
            .filter(|definition| {
                !definition.is_built_in
                    && definition.version.is_some()
                    && definition.repository.is_some()
            })
            .collect()
    }

    // ── Settings ────────────────────────────────────────────────────

    pub async fn default_settings_for(&self, name: &str) -> Result<CompileSettings, PluginError> {
        self.get(name)
            .await
            .map(|definition| definition.default_settings())
            .ok_or_else(|| PluginError::NotFound(format!("compiler '{name}'")))
    }

    /// Default settings of every compiler that has options.
    pub async fn default_settings_all(&self) -> BTreeMap<String, CompileSettings> {
        self.compilers()
            .await
            .into_iter()
            .filter(|definition| definition.has_options())
            .map(|definition| (definition.name.clone(), definition.default_settings()))
            .collect()
    }

    /// Defaults of `name` overlaid with its stored global settings.
    pub async fn global_settings(&self, name: &str) -> Result<CompileSettings, PluginError> {
        let defaults = self.default_settings_for(name).await?;
        Ok(defaults.merged(&self.settings.global_settings_of(name)))
    }

    // ── Compiling ───────────────────────────────────────────────────

    /// Compile one file and wait for the outcome.
    pub async fn compile(&self, job: CompileJob) -> Result<CompileReport, PluginError> {
        self.compile_with_cancel(job, CancellationToken::new()).await
    }

    pub async fn compile_with_cancel(
        &self,
        job: CompileJob,
        cancel: CancellationToken,
    ) -> Result<CompileReport, PluginError> {
        self.run_job(Uuid::new_v4(), job, cancel).await
    }

    /// Compile one file in the background.
    pub fn spawn_compile(self: &Arc<Self>, job: CompileJob) -> CompileHandle {
        let job_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let source = job.source.clone();
        let registry = Arc::clone(self);
        let token = cancel.clone();
        let task = tokio::spawn(async move { registry.run_job(job_id, job, token).await });
        CompileHandle {
            job_id,
            source,
            cancel,
            task,
        }
    }

    fn emit(&self, job_id: Uuid, compiler: &str, source: &Path, kind: CompileEventKind) {
        // No subscribers is fine.
        let _ = self.events.send(CompileEvent::new(job_id, compiler, source, kind));
    }

    async fn run_job(
        &self,
        job_id: Uuid,
        mut job: CompileJob,
        cancel: CancellationToken,
    ) -> Result<CompileReport, PluginError> {
        // Resolution failures happen before any I/O and emit no events.
        let (definition, snapshot) = self.resolve_job(&job.file_type).await?;
        job.source = absolute(&job.source);
        job.output = absolute(&job.output);

        // Jobs queued on a busy output must not hold a worker slot.
        let _output_guard = self.output_locks.lock(&job.output).await;
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| PluginError::Config("compile worker pool is closed".into()))?;

        let compiler = definition.name.as_str();
        self.emit(job_id, compiler, &job.source, CompileEventKind::Started);
        tracing::debug!(
            %job_id,
            compiler = %compiler,
            source = %job.source.display(),
            output = %job.output.display(),
            "compile started"
        );

        let started = Instant::now();
        let result = self.execute(&definition, snapshot, &job, &cancel).await;
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {
                let imports = definition.plugin().get_imports(&job.source);
                watch::register_imports(self.watcher.as_ref(), &imports, &job.source);
                self.emit(job_id, compiler, &job.source, CompileEventKind::Done);
                self.emit(job_id, compiler, &job.source, CompileEventKind::Finished);
                tracing::info!(
                    compiler = %compiler,
                    source = %job.source.display(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "compiled"
                );
                Ok(CompileReport {
                    job_id,
                    compiler: compiler.to_string(),
                    source: job.source,
                    output: job.output,
                    imports,
                    elapsed,
                })
            }
            Err(e) => {
                let message = sanitize_message(&e.to_string());
                if !matches!(e, CompileError::Cancelled { .. }) {
                    self.notifier.report_error(&message, &job.source);
                }
                self.emit(job_id, compiler, &job.source, CompileEventKind::Failed { message });
                self.emit(job_id, compiler, &job.source, CompileEventKind::Finished);
                Err(e.into())
            }
        }
    }

    async fn execute(
        &self,
        definition: &CompilerDefinition,
        snapshot: DefinitionSnapshot,
        job: &CompileJob,
        cancel: &CancellationToken,
    ) -> Result<(), CompileError> {
        if let Some(parent) = job.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| CompileError::Write {
                    path: job.source.clone(),
                    output: job.output.clone(),
                    source,
                })?;
        }

        let ctx = CompilerContext::new(
            definition.name.clone(),
            snapshot,
            self.settings.clone(),
            self.notifier.clone(),
            self.watcher.clone(),
            self.config.command_timeout,
        );
        definition.plugin().compile(&ctx, job, cancel).await
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────
