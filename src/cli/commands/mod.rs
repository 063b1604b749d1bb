//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! Handlers are synchronous; `serve` builds its own multi-threaded tokio
//! runtime and blocks on the listener until shutdown.

mod config_cmd;
mod serve;

pub use config_cmd::{check, show};
pub use serve::{init_tracing, serve};

use std::path::Path;

use anyhow::{Context as _, Result};

use super::args::{Cli, Command, ConfigAction};
use crate::core::config::{Config, ConfigLoadResult};

/// Load configuration from `--config` or the default locations.
fn load_config(explicit: Option<&Path>) -> Result<ConfigLoadResult> {
    Config::load(explicit).context("Failed to load configuration")
}

/// Dispatch a parsed command line to its handler.
pub fn dispatch(cli: Cli) -> Result<()> {
    let explicit = cli.config.as_deref();
    match cli.command {
        Command::Serve { host, port } => serve(load_config(explicit)?, host, port, cli.debug),
        Command::Config { action } => {
            let loaded = load_config(explicit)?;
            match action {
                ConfigAction::Check => check(&loaded),
                ConfigAction::Show => show(&loaded),
            }
        }
    }
}
