//! Configuration loading.
//!
//! leta reads one TOML file from the user config directory. Every field
//! has a default, so a missing file yields a fully usable configuration.
//!
//! ```toml
//! [daemon]
//! log_level = "info"
//! request_timeout_secs = 30
//! idle_shutdown_secs = 28800
//!
//! [workspaces]
//! roots = ["/home/user/src/api"]
//! excluded_languages = ["markdown"]
//! exclude = ["**/generated/**"]
//!
//! [formatting]
//! tab_size = 4
//! insert_spaces = true
//!
//! [servers.python]
//! command = "pylsp"
//! args = []
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::paths;

/// Daemon-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Log level for the daemon log file: trace, debug, info, warn, error.
    pub log_level: String,
    /// Per-request LSP timeout in seconds.
    pub request_timeout_secs: u64,
    /// Idle seconds before the daemon exits on its own. 0 disables.
    pub idle_shutdown_secs: u64,
    /// Byte budget for the in-memory symbol index.
    pub symbol_cache_bytes: usize,
    /// Byte budget for the hover cache.
    pub hover_cache_bytes: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            request_timeout_secs: 30,
            idle_shutdown_secs: 8 * 60 * 60,
            symbol_cache_bytes: 64 * 1024 * 1024,
            hover_cache_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Workspace roots and enumeration filters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkspacesConfig {
    /// Roots registered at daemon startup, before any `workspace add`.
    pub roots: Vec<PathBuf>,
    /// Languages never spawned even when detected.
    pub excluded_languages: Vec<String>,
    /// Glob patterns excluded from workspace enumeration.
    pub exclude: Vec<String>,
}

/// Options forwarded to `textDocument/formatting`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FormattingConfig {
    /// Width of a tab stop.
    pub tab_size: u32,
    /// Use spaces instead of tabs.
    pub insert_spaces: bool,
}

impl Default for FormattingConfig {
    fn default() -> Self {
        Self {
            tab_size: 4,
            insert_spaces: true,
        }
    }
}

/// Per-language server override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerOverride {
    /// Executable to launch instead of the registry default.
    pub command: Option<String>,
    /// Arguments replacing the registry default.
    pub args: Option<Vec<String>>,
}

/// The complete leta configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Daemon settings.
    pub daemon: DaemonConfig,
    /// Workspace settings.
    pub workspaces: WorkspacesConfig,
    /// Formatting settings.
    pub formatting: FormattingConfig,
    /// Server overrides keyed by language id.
    pub servers: HashMap<String, ServerOverride>,
}

impl Config {
    /// Loads the config file, or returns defaults when it does not exist.
    pub fn load() -> Result<Self> {
        let path = paths::config_file()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Usage(format!("invalid config {}: {e}", path.display())))
    }

    /// The per-request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.daemon.request_timeout_secs)
    }

    /// Renders the effective configuration as TOML for the `config` command.
    pub fn render(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_else(|_| "# <unrenderable config>".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.daemon.request_timeout_secs, 30);
        assert_eq!(config.formatting.tab_size, 4);
        assert!(config.formatting.insert_spaces);
        assert!(config.workspaces.roots.is_empty());
    }

    #[test]
    fn test_parse_partial_file() {
        let config: Config = toml::from_str(
            r#"
            [daemon]
            request_timeout_secs = 5

            [servers.python]
            command = "pylsp"
            "#,
        )
        .unwrap();
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        // Untouched sections keep their defaults.
        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(
            config.servers["python"].command.as_deref(),
            Some("pylsp")
        );
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result: std::result::Result<Config, _> = toml::from_str("[daemon]\ntypo_field = 1\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_render_round_trips() {
        let mut config = Config::default();
        config.workspaces.roots.push(PathBuf::from("/tmp/project"));
        let rendered = config.render();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.workspaces.roots, config.workspaces.roots);
    }
}
