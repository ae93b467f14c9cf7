//! Kiln command-line tool
//!
//! Builds portable modules from source, inspects and verifies module
//! binaries, extracts their embedded files, and runs their methods.
//!
//! Logging goes to stderr and is controlled by `KILN_LOG`
//! (e.g. `KILN_LOG=kiln::serialize=debug`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod values;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Kiln portable module toolchain", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a source file into a module binary (.kmb)
    Build {
        /// Source file (.kl)
        source: PathBuf,
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
        /// Constant table as a JSON array
        #[arg(long)]
        constants: Option<String>,
        /// Initial attribute values as a JSON object
        #[arg(long)]
        state: Option<String>,
        /// Auxiliary file to embed, as NAME=PATH (repeatable)
        #[arg(long = "extra", value_name = "NAME=PATH")]
        extra: Vec<String>,
        /// Configuration file (defaults to kiln.toml next to the source)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show the header and contents of a module binary
    Inspect {
        /// Module file
        file: PathBuf,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that a module binary loads and rebuilds from its source
    Verify {
        /// Module file
        file: PathBuf,
    },

    /// List or print auxiliary files
    Extra {
        /// Module file
        file: PathBuf,
        /// Print this file's contents instead of listing
        #[arg(long)]
        name: Option<String>,
    },

    /// Print embedded source files
    Source {
        /// Module file
        file: PathBuf,
        /// Print only this path
        #[arg(long)]
        path: Option<String>,
    },

    /// Load a module and call one of its methods
    Run {
        /// Module file
        file: PathBuf,
        /// Method name
        method: String,
        /// Arguments (ints, floats, true/false, None, otherwise strings)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Place tensors on this device (cpu, cuda, cuda:N, mps)
        #[arg(long)]
        device: Option<String>,
        /// Execute the bytecode without rebuilding from source
        #[arg(long)]
        minimal: bool,
        /// Configuration file whose [load] table applies (defaults to kiln.toml next to the module)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("KILN_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            source,
            output,
            constants,
            state,
            extra,
            config,
        } => commands::build::execute(commands::build::BuildArgs {
            source,
            output,
            constants,
            state,
            extra,
            config,
        }),
        Commands::Inspect { file, json } => commands::inspect::execute(&file, json),
        Commands::Verify { file } => commands::verify::execute(&file),
        Commands::Extra { file, name } => commands::extra::execute(&file, name.as_deref()),
        Commands::Source { file, path } => commands::source::execute(&file, path.as_deref()),
        Commands::Run {
            file,
            method,
            args,
            device,
            minimal,
            config,
        } => commands::run::execute(commands::run::RunArgs {
            file,
            method,
            args,
            device,
            minimal,
            config,
        }),
    }
}
