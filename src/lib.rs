//! pprof-lens core library: profile decoding, source attribution and path
//! resolution shared by the CLI and editor integrations.

mod attribution;
mod cmd;
mod config;
mod context;
mod decompress;
mod error;
mod fsutil;
mod functions;
mod ingest;
mod metrics;
mod pprof;
mod resolver;
mod wire;

#[cfg(test)]
mod testutil;

pub use attribution::*;
pub use cmd::*;
pub use config::*;
pub use context::*;
pub use decompress::*;
pub use error::*;
pub use fsutil::*;
pub use functions::*;
pub use ingest::*;
pub use metrics::*;
pub use pprof::*;
pub use resolver::*;
pub use wire::*;
