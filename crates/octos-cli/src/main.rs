//! Octos CLI: run declarative multi-step agent pipelines.
//!
//! Thin wrapper over octos-core: argument parsing, Ctrl-C handling and a
//! headless progress printer fed by the engine's event channel.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Octos: chain CLI agents through a YAML pipeline
#[derive(Parser)]
#[command(name = "octos", version, about = "Octos: chain CLI agents through a YAML pipeline")]
pub struct Cli {
    /// Workspace root: agent working directory and file-change scan root
    #[arg(long, global = true, env = "OCTOS_WORKSPACE", default_value = ".")]
    workspace: PathBuf,

    /// Directory for checkpoints and artifacts (default: <workspace>/.octos)
    #[arg(long, global = true, env = "OCTOS_STATE_DIR")]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline
    Run {
        /// Path to the pipeline YAML file
        file: PathBuf,
        /// Continue after the last completed step of a previous run
        #[arg(long)]
        resume: bool,
        /// Run the whole pipeline this many times
        #[arg(long = "loop", default_value_t = 1)]
        loops: u32,
        /// Print agent output line by line while it runs
        #[arg(long)]
        stream: bool,
        /// Only print step status, not agent output
        #[arg(long, short = 'q')]
        quiet: bool,
        /// Default deadline for each agent invocation, in seconds
        #[arg(long, env = "OCTOS_TIMEOUT_SECS", default_value_t = octos_core::config::DEFAULT_TIMEOUT_SECS)]
        timeout_secs: u64,
        /// Do not scan the workspace for changed files
        #[arg(long)]
        no_file_changes: bool,
    },
    /// Validate a pipeline file without running it
    Validate {
        /// Path to the pipeline YAML file
        file: PathBuf,
    },
    /// Show the saved checkpoint of a pipeline
    Status {
        /// Path to the pipeline YAML file
        file: PathBuf,
        /// Print the raw checkpoint record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete the saved checkpoint of a pipeline
    Clean {
        /// Path to the pipeline YAML file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "octos_core=warn,octos_cli=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let paths = commands::Paths::new(&cli.workspace, cli.state_dir.as_deref());

    let result = match cli.command {
        Some(Commands::Run {
            file,
            resume,
            loops,
            stream,
            quiet,
            timeout_secs,
            no_file_changes,
        }) => {
            let options = commands::pipeline::RunOptions {
                resume,
                loops,
                stream,
                quiet,
                timeout_secs,
                track_file_changes: !no_file_changes,
            };
            commands::pipeline::run(&paths, &file, options).await
        }
        Some(Commands::Validate { file }) => commands::pipeline::validate(&file).await,
        Some(Commands::Status { file, json }) => commands::state::status(&paths, &file, json).await,
        Some(Commands::Clean { file }) => commands::state::clean(&paths, &file).await,
        None => {
            use clap::CommandFactory;
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
