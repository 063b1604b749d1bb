//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! These flags are available on all commands:
//! - `--help` / `-h`: Show help
//! - `--version`: Show version
//! - `--config <path>`: Use this configuration file
//! - `--debug`: Enable debug logging

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// sdlc-server - projects, workspaces and reviews on Git
#[derive(Parser, Debug)]
#[command(name = "sdlc-server")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to $SDLC_CONFIG, then the user config directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG still takes precedence)
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the REST server
    #[command(
        name = "serve",
        long_about = "Run the REST server.\n\n\
            Serves the API under /api on the configured host and port until \
            interrupted with Ctrl-C. Requests in flight are allowed to finish.",
        after_help = "\
EXAMPLES:
    # Serve with the default configuration lookup
    sdlc-server serve

    # Serve a specific configuration on another port
    sdlc-server serve --config ./sdlc.toml --port 7070

    # Verbose request logging
    RUST_LOG=sdlc_server=debug,tower_http=debug sdlc-server serve"
    )]
    Serve {
        /// Address to bind (overrides server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides server.port)
        #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
        port: Option<u16>,
    },

    /// Inspect the configuration
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigAction {
    /// Validate the configuration and report where it was loaded from
    Check,
    /// Print the effective configuration
    Show,
}
