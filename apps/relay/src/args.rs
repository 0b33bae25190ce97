use clap::Parser;
use std::path::PathBuf;

/// Forwards newline-delimited JSON envelopes into an in-process event hub.
#[derive(Debug, Parser)]
#[command(name = "courier-relay")]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Bridge NDJSON envelopes into a Courier event hub")]
pub struct Cli {
    /// Configuration file (TOML, JSON or YAML) with optional [hub] and [log] tables
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Read envelopes from this file instead of stdin
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Override the configured log level (error, warn, info, debug, trace)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Do not print the final metrics snapshot
    #[arg(long)]
    pub no_metrics: bool,
}
