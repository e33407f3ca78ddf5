mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::{drain, test_registry, write_plugin};
use kiln_plugin::{
    CompileError, CompileEventKind, CompileJob, CompileSettings, CompilerRegistry, ImplementationTable,
    ImportGraph, PluginError, SettingsStore, ToolCompiler,
};
use serde_json::json;

fn demo_table() -> ImplementationTable {
    let mut table = ImplementationTable::new();
    table.register_plugin(
        "demo",
        Arc::new(
            ToolCompiler::library(|code, _, _| Ok(code.to_uppercase()))
                .with_imports(|src| vec![src.with_file_name("_shared.demo")]),
        ),
    );
    table
}

fn demo_manifest() -> serde_json::Value {
    json!({
        "name": "demo",
        "main": "index",
        "version": "1.0.0",
        "koalaVersion": "*",
        "file_types": [{"extensions": ["demo"], "output": "out"}]
    })
}

fn kinds(events: &[kiln_plugin::CompileEvent]) -> Vec<CompileEventKind> {
    events.iter().map(|e| e.kind.clone()).collect()
}

// ─── Library mode ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_user_plugin_uppercases_source() {
    let plugins = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    write_plugin(plugins.path(), "demo", demo_manifest());

    let (registry, notifier) = test_registry(plugins.path(), demo_table());
    assert_eq!(registry.load_user_installed().await.unwrap(), 1);
    let mut rx = registry.subscribe();

    let src = work.path().join("a.demo");
    std::fs::write(&src, "hello").unwrap();
    let output = work.path().join("build").join("a.out");

    let report = registry
        .compile(CompileJob::new(&src, &output, "demo"))
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(&output).unwrap(), "HELLO");
    assert_eq!(report.compiler, "demo");
    assert_eq!(report.output, output);
    assert!(notifier.reports().is_empty());

    let events = drain(&mut rx);
    assert_eq!(
        kinds(&events),
        vec![CompileEventKind::Started, CompileEventKind::Done, CompileEventKind::Finished]
    );
    assert!(events.iter().all(|e| e.job_id == report.job_id));
}

#[tokio::test]
async fn test_imports_reach_watcher() {
    let plugins = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    write_plugin(plugins.path(), "demo", demo_manifest());

    let graph = Arc::new(ImportGraph::new());
    let (registry, _) = test_registry(plugins.path(), demo_table());
    let registry = registry.with_watcher(graph.clone());
    registry.load_user_installed().await.unwrap();

    let src = work.path().join("page.demo");
    std::fs::write(&src, "x").unwrap();
    let report = registry
        .compile(CompileJob::new(&src, work.path().join("page.out"), "demo"))
        .await
        .unwrap();

    let shared = work.path().join("_shared.demo");
    assert_eq!(report.imports, vec![shared.clone()]);
    assert_eq!(graph.dependents_of(&shared), vec![src]);
}

#[tokio::test]
async fn test_transform_failure_is_reported() {
    let plugins = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();

    let mut table = ImplementationTable::new();
    table.register_plugin(
        "strict",
        Arc::new(ToolCompiler::library(|_, _, _| Err("unexpected token at 1:1".into()))),
    );
    let (registry, notifier) = test_registry(plugins.path(), table);
    registry
        .add_definition(
            serde_json::from_value(json!({"name": "strict", "main": "x", "file_types": [{"extensions": ["st"]}]}))
                .unwrap(),
            None,
        )
        .await
        .unwrap();
    let mut rx = registry.subscribe();

    let src = work.path().join("a.st");
    std::fs::write(&src, "?").unwrap();
    let output = work.path().join("a.out");
    let err = registry
        .compile(CompileJob::new(&src, &output, "st"))
        .await
        .unwrap_err();

    assert!(matches!(err, PluginError::Compile(CompileError::Transform { .. })));
    assert!(!output.exists());
    assert_eq!(notifier.reports(), vec![("unexpected token at 1:1".to_string(), src)]);
    assert_eq!(
        kinds(&drain(&mut rx)),
        vec![
            CompileEventKind::Started,
            CompileEventKind::Failed { message: "unexpected token at 1:1".into() },
            CompileEventKind::Finished,
        ]
    );
}

#[tokio::test]
async fn test_builtin_json_compile() {
    let plugins = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (registry, _) = test_registry(plugins.path(), ImplementationTable::new());
    registry.load_builtins().await.unwrap();

    let src = work.path().join("data.json");
    std::fs::write(&src, r#"{"a":1}"#).unwrap();
    let output = work.path().join("dist").join("data.json");

    let mut settings = CompileSettings::default();
    settings.options.insert("indent".into(), json!("4"));
    registry
        .compile(CompileJob::new(&src, &output, "json").with_settings(settings))
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(&output).unwrap(), "{\n    \"a\": 1\n}\n");
}

// ─── Resolution ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_type_fails_before_any_io() {
    let plugins = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (registry, notifier) = test_registry(plugins.path(), ImplementationTable::new());
    registry.load_builtins().await.unwrap();
    let mut rx = registry.subscribe();

    let output_dir = work.path().join("never").join("created");
    let err = registry
        .compile(CompileJob::new(
            work.path().join("a.xyz"),
            output_dir.join("a.out"),
            "xyz",
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, PluginError::NotFound(_)));
    assert!(!work.path().join("never").exists());
    assert!(drain(&mut rx).is_empty());
    assert!(notifier.reports().is_empty());
}

// ─── Command mode ───────────────────────────────────────────────────────

fn tool_table() -> ImplementationTable {
    let mut table = ImplementationTable::new();
    table.register_plugin(
        "tool",
        Arc::new(
            ToolCompiler::library(|code, _, _| Ok(code.to_string())).with_command("tool-compiler", |job| {
                vec![job.source.display().to_string(), job.output.display().to_string()]
            }),
        ),
    );
    table
}

async fn tool_registry(
    plugins: &std::path::Path,
    settings: SettingsStore,
) -> (CompilerRegistry, Arc<common::RecordingNotifier>) {
    let (registry, notifier) = test_registry(plugins, tool_table());
    let registry = registry.with_settings(Arc::new(settings));
    registry
        .add_definition(
            serde_json::from_value(json!({
                "name": "tool",
                "main": "index",
                "file_types": [{"extensions": ["tl"]}],
                "advanced": [
                    {"type": "checkbox", "name": "useCommand"},
                    {"type": "text", "name": "commandPath"}
                ]
            }))
            .unwrap(),
            None,
        )
        .await
        .unwrap();
    (registry, notifier)
}

#[tokio::test]
async fn test_missing_command_path_is_spawn_failure() {
    let plugins = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let settings = SettingsStore::from_toml_str(
        r#"
        [compilers.tool.advanced]
        useCommand = true
        commandPath = "/nonexistent/bin/tool-compiler"
        "#,
    )
    .unwrap();
    let (registry, notifier) = tool_registry(plugins.path(), settings).await;
    let mut rx = registry.subscribe();

    let src = work.path().join("a.tl");
    std::fs::write(&src, "x").unwrap();
    let err = registry
        .compile(CompileJob::new(&src, work.path().join("a.out"), "tl"))
        .await
        .unwrap_err();

    match &err {
        PluginError::Compile(CompileError::Spawn { program, .. }) => {
            assert_eq!(program, "/nonexistent/bin/tool-compiler");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let events = kinds(&drain(&mut rx));
    assert_eq!(events.len(), 3);
    assert!(matches!(events[1], CompileEventKind::Failed { .. }));
    assert_eq!(events[2], CompileEventKind::Finished);
    assert!(!events.contains(&CompileEventKind::Done));
    assert_eq!(notifier.reports().len(), 1);
    assert!(notifier.reports()[0].0.contains("/nonexistent/bin/tool-compiler"));
}

#[tokio::test]
async fn test_use_command_off_runs_library() {
    let plugins = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let settings = SettingsStore::from_toml_str(
        r#"
        [compilers.tool.advanced]
        commandPath = "/nonexistent/bin/tool-compiler"
        "#,
    )
    .unwrap();
    let (registry, _) = tool_registry(plugins.path(), settings).await;

    let src = work.path().join("a.tl");
    std::fs::write(&src, "library").unwrap();
    let output = work.path().join("a.out");
    registry
        .compile(CompileJob::new(&src, &output, "tl"))
        .await
        .unwrap();
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "library");
}

#[cfg(unix)]
#[tokio::test]
async fn test_declared_command_compiles() {
    let plugins = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    write_plugin(
        plugins.path(),
        "copy",
        json!({
            "name": "copy",
            "main": "index.js",
            "version": "0.3.0",
            "minHostVersion": "0.1",
            "file_types": [{"extensions": ["cp"]}],
            "command": {"default": "cp", "args": ["{src}", "{output}"]}
        }),
    );
    let (registry, _) = test_registry(plugins.path(), ImplementationTable::new());
    registry.load_user_installed().await.unwrap();

    let src = work.path().join("my file.cp");
    std::fs::write(&src, "copied").unwrap();
    let output = work.path().join("out dir").join("my file.txt");
    registry
        .compile(CompileJob::new(&src, &output, "cp"))
        .await
        .unwrap();
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "copied");
}

#[cfg(unix)]
fn sleeper_table() -> ImplementationTable {
    let mut table = ImplementationTable::new();
    table.register_plugin(
        "sleeper",
        Arc::new(ToolCompiler::command("sh", |_| vec!["-c".into(), "sleep 5".into()])),
    );
    table
}

#[cfg(unix)]
async fn add_sleeper(registry: &CompilerRegistry) {
    registry
        .add_definition(
            serde_json::from_value(json!({"name": "sleeper", "main": "x", "file_types": [{"extensions": ["zz"]}]}))
                .unwrap(),
            None,
        )
        .await
        .unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_timeout_is_failure() {
    let plugins = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let mut config = common::test_config(plugins.path());
    config.command_timeout = Duration::from_millis(150);
    let notifier = Arc::new(common::RecordingNotifier::default());
    let registry = CompilerRegistry::new(config, sleeper_table()).with_notifier(notifier.clone());
    add_sleeper(&registry).await;

    let src = work.path().join("a.zz");
    std::fs::write(&src, "").unwrap();
    let err = registry
        .compile(CompileJob::new(&src, work.path().join("a.out"), "zz"))
        .await
        .unwrap_err();

    match err {
        PluginError::Compile(e) => {
            assert!(e.is_timeout());
            assert_eq!(e.source_path(), src.as_path());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(notifier.reports().len(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_spawned_compile_can_be_cancelled() {
    let plugins = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (registry, notifier) = test_registry(plugins.path(), sleeper_table());
    add_sleeper(&registry).await;
    let registry = Arc::new(registry);
    let mut rx = registry.subscribe();

    let src = work.path().join("a.zz");
    std::fs::write(&src, "").unwrap();
    let handle = registry.spawn_compile(CompileJob::new(&src, work.path().join("a.out"), "zz"));
    let job_id = handle.job_id();

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.cancel();
    let err = handle.wait().await.unwrap_err();

    assert!(matches!(err, PluginError::Compile(CompileError::Cancelled { .. })));
    assert!(notifier.reports().is_empty());
    let events = drain(&mut rx);
    assert!(events.iter().all(|e| e.job_id == job_id));
    assert_eq!(events.last().map(|e| e.kind.clone()), Some(CompileEventKind::Finished));
}

// ─── Concurrency ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_jobs_all_finish() {
    let plugins = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    write_plugin(plugins.path(), "demo", demo_manifest());
    let (registry, _) = test_registry(plugins.path(), demo_table());
    registry.load_user_installed().await.unwrap();
    let registry = Arc::new(registry);
    let mut rx = registry.subscribe();

    let mut handles = Vec::new();
    for i in 0..8 {
        let src = work.path().join(format!("f{i}.demo"));
        std::fs::write(&src, format!("file {i}")).unwrap();
        handles.push(registry.spawn_compile(CompileJob::new(&src, work.path().join(format!("f{i}.out")), "demo")));
    }
    for handle in handles {
        handle.wait().await.unwrap();
    }

    for i in 0..8 {
        let out: PathBuf = work.path().join(format!("f{i}.out"));
        assert_eq!(std::fs::read_to_string(out).unwrap(), format!("FILE {i}"));
    }
    let finished = drain(&mut rx)
        .into_iter()
        .filter(|e| e.kind == CompileEventKind::Finished)
        .count();
    assert_eq!(finished, 8);
}

#[cfg(unix)]
#[tokio::test]
async fn test_jobs_queued_on_one_output_leave_workers_free() {
    let plugins = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let mut config = common::test_config(plugins.path());
    config.max_jobs = 2;
    let mut table = sleeper_table();
    table.register_plugin("fast", Arc::new(ToolCompiler::library(|code, _, _| Ok(code.to_string()))));
    let registry = Arc::new(CompilerRegistry::new(config, table));
    add_sleeper(&registry).await;
    registry
        .add_definition(
            serde_json::from_value(json!({"name": "fast", "main": "x", "file_types": [{"extensions": ["ft"]}]}))
                .unwrap(),
            None,
        )
        .await
        .unwrap();

    let slow_src = work.path().join("a.zz");
    std::fs::write(&slow_src, "").unwrap();
    let shared = work.path().join("shared.out");
    let first = registry.spawn_compile(CompileJob::new(&slow_src, &shared, "zz"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = registry.spawn_compile(CompileJob::new(&slow_src, &shared, "zz"));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let fast_src = work.path().join("b.ft");
    std::fs::write(&fast_src, "independent").unwrap();
    let other = work.path().join("other.out");
    let independent = registry.spawn_compile(CompileJob::new(&fast_src, &other, "ft"));
    tokio::time::timeout(Duration::from_secs(2), independent.wait())
        .await
        .expect("independent output waited on a busy one")
        .unwrap();
    assert_eq!(std::fs::read_to_string(&other).unwrap(), "independent");

    first.cancel();
    second.cancel();
    assert!(first.wait().await.is_err());
    assert!(second.wait().await.is_err());
}
