//! CLI argument parsing shared by bridges.

use std::path::PathBuf;

use clap::Args;

/// Common CLI arguments, flattened into each bridge's own parser.
#[derive(Args, Debug, Clone, Default)]
pub struct BridgeArgs {
    /// Configuration file to load (JSON5 format).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Enable debug logging (same as `--log-level debug`).
    #[arg(long)]
    pub debug: bool,
}

impl BridgeArgs {
    /// Log level requested on the command line, if any.
    ///
    /// An explicit `--log-level` wins over `--debug`.
    pub fn log_level_override(&self) -> Option<String> {
        self.log_level
            .clone()
            .or_else(|| self.debug.then(|| "debug".to_string()))
    }
}
