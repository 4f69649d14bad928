//! CLI commands. Each returns a serializable report; rendering is left to
//! the binary.

mod functions_cmd;
mod inspect_cmd;
mod lines_cmd;
mod resolve_cmd;

pub use functions_cmd::*;
pub use inspect_cmd::*;
pub use lines_cmd::*;
pub use resolve_cmd::*;

use clap::Subcommand;
use tokio_util::sync::CancellationToken;

use std::path::Path;
use std::sync::Arc;

use crate::{
    Config, Diagnostic, IngestOutcome, LensResult, LoadContext, LocalFs, PathResolver, ingest,
    read_profile,
};

#[derive(Debug, Subcommand)]
pub enum LensCommand {
    /// Summarize a profile without touching the workspace.
    Inspect(InspectArgs),
    /// Show the hottest source lines.
    Lines(LinesArgs),
    /// Roll line metrics up into the functions of one file.
    Functions(FunctionsArgs),
    /// Report how each profiled path maps onto the workspace.
    Resolve(ResolveArgs),
}

pub async fn run_command(
    config: Arc<Config>,
    command: &LensCommand,
    cancel: CancellationToken,
) -> LensResult<serde_json::Value> {
    let value = match command {
        LensCommand::Inspect(args) => serde_json::to_value(inspect_command(args)?)?,
        LensCommand::Lines(args) => serde_json::to_value(lines_command(config, args, cancel).await?)?,
        LensCommand::Functions(args) => {
            serde_json::to_value(functions_command(config, args, cancel).await?)?
        }
        LensCommand::Resolve(args) => serde_json::to_value(resolve_command(config, args).await?)?,
    };
    Ok(value)
}

/// Reads, decodes and attributes the profile at `path` against the local
/// workspace.
pub(crate) async fn load_profile(
    config: Arc<Config>,
    path: &Path,
    cancel: CancellationToken,
) -> LensResult<(IngestOutcome, Vec<Diagnostic>)> {
    let raw = read_profile(path)?;
    let mut resolver = PathResolver::new(&config, Arc::new(LocalFs))?;
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let mut ctx = LoadContext::new(config, &name).with_cancellation(cancel);
    let outcome = ingest(&raw, &mut resolver, &mut ctx).await?;
    Ok((outcome, ctx.take_diagnostics()))
}
