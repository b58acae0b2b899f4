//! CLI arguments shared by scheduler binaries.

use std::path::PathBuf;

use clap::Args;
use mission_common::Format;

/// Common CLI arguments, flattened into a binary's own parser.
#[derive(Args, Debug, Clone, Default)]
pub struct RunnerArgs {
    /// Path to configuration file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Override telemetry output format (json, pretty, text).
    #[arg(long, global = true)]
    pub format: Option<Format>,
}
