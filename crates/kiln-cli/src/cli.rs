use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(about = "Compile source files through compiler plugins")]
#[command(version)]
pub struct Cli {
    /// Settings file with app, compiler and project configuration
    #[arg(long, global = true, value_name = "FILE", default_value = "kiln.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile one source file
    Compile {
        /// Source file
        #[arg(value_name = "SRC")]
        src: PathBuf,

        /// Output file (defaults to the source with the compiler's output extension)
        #[arg(short, long, value_name = "OUT")]
        output: Option<PathBuf>,

        /// File type name (inferred from the extension if omitted)
        #[arg(short = 't', long = "type", value_name = "TYPE")]
        file_type: Option<String>,

        /// Override a setting: `name=value`, `options.name=value` or `advanced.name=value`
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
    /// List registered compilers and their file types
    List,
    /// Print default settings as JSON
    Defaults {
        /// Compiler name (all compilers with options if omitted)
        name: Option<String>,
    },
    /// Install a compiler from an unpacked plugin directory
    Install {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
    /// Uninstall a user compiler
    Uninstall { name: String },
}
