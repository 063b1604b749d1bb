//! cli
//!
//! Command-line interface for the server binary.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Load configuration and install logging
//! - Delegate to command handlers
//!
//! The CLI layer is thin. Serving is done by [`crate::server`]; the
//! handlers here only wire configuration, the runtime and the listener
//! together.

pub mod args;
pub mod commands;

pub use args::{Cli, Command, ConfigAction};

use anyhow::Result;

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub fn run() -> Result<()> {
    let cli = Cli::parse_args();
    commands::dispatch(cli)
}
