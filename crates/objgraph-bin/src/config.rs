//! Configuration management for the daemon.

use std::net::SocketAddr;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::paths::Paths;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Main daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Optional TCP listen address; the Unix socket is always served.
    #[serde(default)]
    pub tcp_listen: Option<SocketAddr>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            tcp_listen: None,
        }
    }
}

impl Config {
    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> anyhow::Result<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            let raw = std::fs::read_to_string(&config_path)
                .with_context(|| format!("reading {}", config_path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", config_path.display()))?
        } else {
            Self::default()
        };

        config.load_from_env();
        Ok(config)
    }

    fn load_from_env(&mut self) {
        if let Ok(raw) = std::env::var("OBJGRAPH_TCP_LISTEN") {
            match raw.parse() {
                Ok(addr) => self.tcp_listen = Some(addr),
                Err(_) => warn!(value = %raw, "ignoring invalid OBJGRAPH_TCP_LISTEN"),
            }
        }
        if let Ok(level) = std::env::var("OBJGRAPH_LOG_LEVEL") {
            if !level.is_empty() {
                self.log_level = level;
            }
        }
    }
}
