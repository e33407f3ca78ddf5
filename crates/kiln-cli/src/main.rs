use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use kiln_plugin::{
    CompileJob, CompileSettings, CompilerRegistry, ImplementationTable, PluginInstaller,
    RegistryConfig, SettingsStore,
};
use serde_json::Value;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cli;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = SettingsStore::load(&cli.config)
        .await
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let registry = CompilerRegistry::new(RegistryConfig::from_env(), ImplementationTable::new())
        .with_settings(Arc::new(settings));
    registry.load_all().await?;

    match cli.command {
        Command::Compile {
            src,
            output,
            file_type,
            set,
        } => compile(&registry, src, output, file_type, &set).await,
        Command::List => {
            list(&registry).await;
            Ok(())
        }
        Command::Defaults { name } => {
            let json = match name {
                Some(name) => serde_json::to_string_pretty(&registry.default_settings_for(&name).await?)?,
                None => serde_json::to_string_pretty(&registry.default_settings_all().await)?,
            };
            println!("{json}");
            Ok(())
        }
        Command::Install { dir } => {
            let definition = PluginInstaller::for_registry(&registry)
                .install_from_dir(&registry, &dir)
                .await?;
            println!("installed {}", definition.name);
            Ok(())
        }
        Command::Uninstall { name } => {
            PluginInstaller::for_registry(&registry)
                .uninstall(&registry, &name)
                .await?;
            println!("uninstalled {name}");
            Ok(())
        }
    }
}

async fn compile(
    registry: &CompilerRegistry,
    src: PathBuf,
    output: Option<PathBuf>,
    file_type: Option<String>,
    overrides: &[String],
) -> anyhow::Result<()> {
    let file_type = match file_type {
        Some(file_type) => file_type,
        None => {
            let ext = src
                .extension()
                .and_then(|ext| ext.to_str())
                .ok_or_else(|| anyhow!("{} has no extension, pass --type", src.display()))?;
            registry
                .file_type_for_extension(ext)
                .await
                .map(|ft| ft.name)
                .ok_or_else(|| anyhow!("no compiler handles .{ext} files"))?
        }
    };

    let definition = registry.resolve_for_file_type(&file_type).await?;
    let output = output.unwrap_or_else(|| default_output(&src, definition.output_extension(&file_type)));

    let mut settings = registry.global_settings(&definition.name).await?;
    apply_overrides(&mut settings, overrides)?;

    let report = registry
        .compile(CompileJob::new(src, output, file_type).with_settings(settings))
        .await?;
    println!("{}", report.output.display());
    Ok(())
}

/// `src` with the output extension, never the source itself.
fn default_output(src: &Path, output_extension: Option<&str>) -> PathBuf {
    let ext = output_extension.unwrap_or("out");
    let output = src.with_extension(ext);
    if output == src {
        src.with_extension(format!("out.{ext}"))
    } else {
        output
    }
}

fn apply_overrides(settings: &mut CompileSettings, overrides: &[String]) -> anyhow::Result<()> {
    for entry in overrides {
        let Some((key, raw)) = entry.split_once('=') else {
            bail!("invalid --set '{entry}', expected KEY=VALUE");
        };
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        let (map, name) = match key.split_once('.') {
            Some(("advanced", name)) => (&mut settings.advanced, name),
            Some(("options", name)) => (&mut settings.options, name),
            _ => (&mut settings.options, key),
        };
        map.insert(name.to_string(), value);
    }
    Ok(())
}

async fn list(registry: &CompilerRegistry) {
    for definition in registry.compilers().await {
        let types: Vec<String> = definition
            .file_types
            .iter()
            .map(|ft| format!("{} (.{})", ft.name, ft.extensions.join(", .")))
            .collect();
        println!(
            "{:<16} {:<10} {:<9} {}",
            definition.name,
            definition.version.as_deref().unwrap_or("-"),
            if definition.is_built_in { "built-in" } else { "user" },
            types.join("; ")
        );
    }
}
