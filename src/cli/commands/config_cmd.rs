//! config command - Check or show the effective configuration

use anyhow::Result;

use crate::core::config::{BackendKind, ConfigLoadResult};

fn source(loaded: &ConfigLoadResult) -> String {
    match &loaded.path {
        Some(path) => path.display().to_string(),
        None => "(built-in defaults)".to_string(),
    }
}

/// Report that the configuration loaded and validated.
///
/// Loading already validated it; failures surface as errors from dispatch.
pub fn check(loaded: &ConfigLoadResult) -> Result<()> {
    println!("Configuration OK: {}", source(loaded));
    Ok(())
}

/// Print the effective settings, defaults applied. Secrets are never shown.
pub fn show(loaded: &ConfigLoadResult) -> Result<()> {
    for line in render(loaded) {
        println!("{line}");
    }
    Ok(())
}

fn render(loaded: &ConfigLoadResult) -> Vec<String> {
    let config = &loaded.config;
    let mut lines = vec![
        format!("source:               {}", source(loaded)),
        format!("server.host:          {}", config.host()),
        format!("server.port:          {}", config.port()),
        format!("server.timeout:       {}s", config.request_timeout().as_secs()),
        format!("logging.level:        {}", config.log_level()),
        format!("logging.format:       {:?}", config.log_format()).to_lowercase(),
        format!("backend:              {}", config.backend_kind().name()),
    ];

    match config.backend_kind() {
        BackendKind::Filesystem => {
            if let Some(root) = config.filesystem_root() {
                lines.push(format!("filesystem.root:      {}", root.display()));
            }
            lines.push(format!(
                "filesystem.user:      {}",
                config.default_user().unwrap_or("(none)")
            ));
        }
        BackendKind::Gitlab => {
            lines.push(format!(
                "gitlab.url:           {}",
                config.gitlab_url().unwrap_or("(unset)")
            ));
            lines.push(format!("gitlab.auth:          {:?}", config.gitlab_auth_mode()));
            lines.push(format!("gitlab.project_tag:   {}", config.project_tag()));
            lines.push(format!(
                "gitlab.app_secret:    {}",
                if config.gitlab_app_secret().is_some() { "(set)" } else { "(unset)" }
            ));
        }
    }

    lines.push(format!(
        "auth.trusted_header:  {}",
        config.trusted_user_header().unwrap_or("(none)")
    ));
    lines.push(format!("auth.session_ttl:     {}s", config.session_ttl().as_secs()));
    lines
}
