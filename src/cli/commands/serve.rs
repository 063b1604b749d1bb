//! serve command - Run the REST server until Ctrl-C

use anyhow::{Context as _, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::core::config::{Config, ConfigLoadResult, LogFormat};
use crate::server::{router, AppState};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level; `--debug` raises the
/// configured level to `debug`. Logs go to stderr.
pub fn init_tracing(config: &Config, debug: bool) {
    let level = if debug { "debug" } else { config.log_level() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    // try_init: a subscriber may already be installed (tests)
    let _ = match config.log_format() {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init(),
    };
}

/// Apply `--host` / `--port` on top of the loaded configuration.
fn apply_overrides(mut config: Config, host: Option<String>, port: Option<u16>) -> Result<Config> {
    if host.is_none() && port.is_none() {
        return Ok(config);
    }
    let server = config.file.server.get_or_insert_with(Default::default);
    if host.is_some() {
        server.host = host;
    }
    if port.is_some() {
        server.port = port;
    }
    Config::new(config.file).context("Invalid command-line override")
}

/// Run the server.
pub fn serve(loaded: ConfigLoadResult, host: Option<String>, port: Option<u16>, debug: bool) -> Result<()> {
    let config = apply_overrides(loaded.config, host, port)?;
    init_tracing(&config, debug);

    match &loaded.path {
        Some(path) => info!(path = %path.display(), "configuration loaded"),
        None => warn!("no configuration file found, using defaults"),
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    rt.block_on(serve_async(config))
}

async fn serve_async(config: Config) -> Result<()> {
    let state = AppState::from_config(config.clone()).context("Failed to open the backend")?;
    let addr = (config.host().to_string(), config.port());
    let listener = TcpListener::bind(addr.clone())
        .await
        .with_context(|| format!("Failed to bind {}:{}", addr.0, addr.1))?;

    info!(
        host = %addr.0,
        port = addr.1,
        backend = config.backend_kind().name(),
        "sdlc server listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("sdlc server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(err) => warn!(error = %err, "failed to listen for Ctrl-C"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ServerConfig;

    fn base() -> Config {
        let file: ServerConfig = toml::from_str("[filesystem]\nroot = \"/tmp/sdlc\"").unwrap();
        Config::new(file).unwrap()
    }

    #[test]
    fn overrides_replace_host_and_port() {
        let config = apply_overrides(base(), Some("0.0.0.0".into()), Some(7070)).unwrap();
        assert_eq!(config.host(), "0.0.0.0");
        assert_eq!(config.port(), 7070);
    }

    #[test]
    fn no_overrides_keep_defaults() {
        let config = apply_overrides(base(), None, None).unwrap();
        assert_eq!(config.host(), "127.0.0.1");
        assert_eq!(config.port(), 6100);
        assert!(config.file.server.is_none());
    }

    #[test]
    fn port_override_keeps_configured_host() {
        let file: ServerConfig =
            toml::from_str("[server]\nhost = \"10.0.0.1\"\n[filesystem]\nroot = \"/tmp/sdlc\"").unwrap();
        let config = apply_overrides(Config::new(file).unwrap(), None, Some(9000)).unwrap();
        assert_eq!(config.host(), "10.0.0.1");
        assert_eq!(config.port(), 9000);
    }
}
