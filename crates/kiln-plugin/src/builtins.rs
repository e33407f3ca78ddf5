//! Compilers bundled with the host.
//!
//! Their manifests live in `builtins/compilers.json`, embedded at build
//! time; their implementations are registered into every registry's
//! [`ImplementationTable`].

use std::sync::Arc;

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use serde_json::Value;

use crate::plugin::{CompilerPlugin, ImplementationTable, ToolCompiler, TransformResult};
use crate::settings::CompileSettings;

/// The embedded built-in manifest list.
pub const BUILTIN_MANIFEST: &str = include_str!("../builtins/compilers.json");

/// Add the built-in implementations unless `table` already provides one
/// under the same name.
pub fn register_builtins(table: &mut ImplementationTable) {
    let builtins: [(&str, fn() -> ToolCompiler); 2] = [("json", json_compiler), ("toml", toml_compiler)];
    for (name, build) in builtins {
        if !table.contains(name) {
            table.register_plugin(name, Arc::new(build()) as Arc<dyn CompilerPlugin>);
        }
    }
}

fn json_compiler() -> ToolCompiler {
    ToolCompiler::library(|code, _, settings| {
        let document: Value = serde_json::from_str(code)?;
        render_json(&document, settings)
    })
}

fn toml_compiler() -> ToolCompiler {
    ToolCompiler::library(|code, _, settings| {
        let document: toml::Table = toml::from_str(code)?;
        render_json(&toml_to_json(toml::Value::Table(document)), settings)
    })
}

/// `pretty` is on unless explicitly disabled.
fn pretty(settings: &CompileSettings) -> bool {
    !settings.options.contains_key("pretty") || settings.option_flag("pretty")
}

fn indent(settings: &CompileSettings) -> &'static [u8] {
    match settings.option_str("indent") {
        Some("4") => b"    ",
        Some("tab") => b"\t",
        _ => b"  ",
    }
}

fn render_json(document: &Value, settings: &CompileSettings) -> TransformResult {
    if !pretty(settings) {
        return Ok(serde_json::to_string(document)?);
    }
    let mut out = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(indent(settings)));
    document.serialize(&mut serializer)?;
    out.push(b'\n');
    Ok(String::from_utf8(out)?)
}

fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(key, value)| (key, toml_to_json(value)))
                .collect(),
        ),
    }
}
