mod cli_logger;

use anyhow::{Context as _, Result};
use clap::Parser;
use pprof_lens::{
    Config, LensCommand, LoadStatus, ResolutionMode, functions_command, lines_command, run_command,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use cli_logger::CliLogger;

#[derive(Debug, Parser)]
#[command(name = "pprof-lens", version, about = "Map pprof profiles onto your source tree")]
struct Cli {
    /// Emit JSON instead of the human-readable rendering.
    #[arg(long, global = true)]
    json: bool,
    #[arg(long, global = true)]
    no_color: bool,
    #[arg(long, global = true, default_value = "pprof-lens.toml")]
    config: PathBuf,
    /// Log at debug level (overrides RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Workspace root; repeat for several. Replaces `workspace_roots` from config.
    #[arg(long = "workspace", global = true)]
    workspace: Vec<PathBuf>,
    /// Walk the workspace per path instead of indexing it up front.
    #[arg(long, global = true)]
    sequential: bool,
    /// Minimum percent for a function to be reported.
    #[arg(long, global = true)]
    threshold: Option<f64>,
    #[command(subcommand)]
    command: LensCommand,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so JSON on stdout stays pipeable.
    let filter = if cli.verbose {
        EnvFilter::new("pprof_lens=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let logger = CliLogger::new(cli.json, cli.no_color);
    match run(&cli, &logger) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            logger.print_error(&format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, logger: &CliLogger) -> Result<()> {
    let config = Arc::new(effective_config(cli));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let cancel = CancellationToken::new();

    match &cli.command {
        LensCommand::Lines(args) => {
            let report = runtime.block_on(lines_command(config, args, cancel))?;
            if report.status == LoadStatus::NoFilesMatched {
                logger.print_warning(NO_MATCH_HINT);
            }
            logger.print_lines(&report)?;
        }
        LensCommand::Functions(args) => {
            let report = runtime.block_on(functions_command(config, args, cancel))?;
            if report.status == LoadStatus::NoFilesMatched {
                logger.print_warning(NO_MATCH_HINT);
            }
            logger.print_functions(&report)?;
        }
        command => {
            let value = runtime.block_on(run_command(config, command, cancel))?;
            logger.print_serialized(&value)?;
        }
    }
    Ok(())
}

const NO_MATCH_HINT: &str =
    "no profiled file matched the workspace; pass --workspace or add path_mappings to the config";

fn effective_config(cli: &Cli) -> Config {
    let mut config = Config::load_optional(&cli.config);
    if !cli.workspace.is_empty() {
        config.workspace_roots = cli.workspace.clone();
    }
    if cli.sequential {
        config.resolution_mode = ResolutionMode::Sequential;
    }
    if let Some(threshold) = cli.threshold {
        config.threshold = threshold;
    }
    config
}
