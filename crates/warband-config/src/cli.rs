//! Command-line argument parsing for warband tools.

use std::path::PathBuf;

use clap::Parser;

use crate::{Config, TransportKind};

/// Common command-line overrides.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "warband", about = "Warband client")]
pub struct CliArgs {
    /// Server address (`host:port`).
    #[arg(long)]
    pub server: Option<String>,

    /// Transport for the game connection.
    #[arg(long, value_enum)]
    pub transport: Option<TransportKind>,

    /// Base URL of the HTTP fallback channel.
    #[arg(long)]
    pub http_url: Option<String>,

    /// Session id sent with HTTP fallback calls.
    #[arg(long)]
    pub session: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.server {
            self.network.address = addr.clone();
        }
        if let Some(transport) = args.transport {
            self.network.transport = transport;
        }
        if let Some(ref url) = args.http_url {
            self.http.base_url = url.clone();
        }
        if let Some(ref session) = args.session {
            self.http.session_id = session.clone();
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
