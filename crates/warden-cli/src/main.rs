mod commands;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

/// ABAC policy decision point toolchain. Not a contractual surface: this harness
/// exists only so the library is exercisable from a shell.
#[derive(Parser)]
#[command(name = "warden", version, about = "ABAC PDP toolchain")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a .warden source file and print its AST as JSON
    Parse {
        /// Path to the .warden source file
        file: PathBuf,
    },

    /// Load and compile a PDP configuration directory, reporting compile errors
    Check {
        /// Directory containing config.json and *.warden files
        dir: PathBuf,
    },

    /// Evaluate one subscription to its first decision
    Decide {
        /// Directory containing config.json and *.warden files
        dir: PathBuf,
        /// Path to a subscription JSON file
        #[arg(long)]
        subscription: PathBuf,
    },

    /// Stream successive decisions for one subscription until interrupted
    Watch {
        /// Directory containing config.json and *.warden files
        dir: PathBuf,
        /// Path to a subscription JSON file
        #[arg(long)]
        subscription: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");

    let result = match cli.command {
        Commands::Parse { file } => commands::parse::cmd_parse(&file),
        Commands::Check { dir } => commands::check::cmd_check(&dir),
        Commands::Decide { dir, subscription } => runtime.block_on(commands::decide::cmd_decide(&dir, &subscription)),
        Commands::Watch { dir, subscription } => runtime.block_on(commands::watch::cmd_watch(&dir, &subscription)),
    };

    if let Err(msg) = result {
        eprintln!("error: {}", msg);
        process::exit(1);
    }
}
