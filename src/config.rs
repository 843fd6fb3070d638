//! Client configuration, loaded from TOML.
//!
//! ```toml
//! [cluster]
//! mode = "cluster"
//! seeds = ["127.0.0.1:7000"]
//! refresh_after_redirects = 8
//!
//! [timeouts]
//! command_ms = 5000
//! connect_ms = 1000
//!
//! [logging]
//! level = "info"
//! format = "text"
//! ```

use crate::cluster::router::RouterSettings;
use crate::command::Mode;
use crate::error::{AikvError, Result};
use crate::observability::{LogConfig, LogFormat};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Cluster section of the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub mode: Mode,
    /// Nodes asked for the slot layout at startup
    #[serde(default = "default_seeds")]
    pub seeds: Vec<String>,
    /// MOVED replies tolerated before a full topology refresh; 0 disables it
    #[serde(default = "default_refresh_after_redirects")]
    pub refresh_after_redirects: u64,
}

fn default_seeds() -> Vec<String> {
    vec!["127.0.0.1:6379".to_string()]
}

fn default_refresh_after_redirects() -> u64 {
    8
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            seeds: default_seeds(),
            refresh_after_redirects: default_refresh_after_redirects(),
        }
    }
}

/// Timeouts section of the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_command_ms")]
    pub command_ms: u64,
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,
}

fn default_command_ms() -> u64 {
    5000
}

fn default_connect_ms() -> u64 {
    1000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command_ms: default_command_ms(),
            connect_ms: default_connect_ms(),
        }
    }
}

/// Logging section of the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ClientConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AikvError::Config(format!("failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.cluster.mode = mode;
        self
    }

    pub fn with_seeds<I, S>(mut self, seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cluster.seeds = seeds.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.command_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_refresh_after_redirects(mut self, redirects: u64) -> Self {
        self.cluster.refresh_after_redirects = redirects;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster.seeds.is_empty() {
            return Err(AikvError::Config("at least one seed node is required".to_string()));
        }
        if let Some(bad) = self.cluster.seeds.iter().find(|s| !is_host_port(s)) {
            return Err(AikvError::Config(format!(
                "seed '{}' is not a HOST:PORT address",
                bad
            )));
        }
        if self.timeouts.command_ms == 0 {
            return Err(AikvError::Config("timeouts.command_ms must be positive".to_string()));
        }
        if self.timeouts.connect_ms == 0 {
            return Err(AikvError::Config("timeouts.connect_ms must be positive".to_string()));
        }
        self.log_config()?;
        Ok(())
    }

    pub fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            command_timeout: Duration::from_millis(self.timeouts.command_ms),
            refresh_after_redirects: self.cluster.refresh_after_redirects,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.connect_ms)
    }

    pub fn log_config(&self) -> Result<LogConfig> {
        let level = LogConfig::parse_level(&self.logging.level).ok_or_else(|| {
            AikvError::Config(format!("invalid log level '{}'", self.logging.level))
        })?;
        Ok(LogConfig {
            level,
            format: self.logging.format,
        })
    }
}

fn is_host_port(addr: &str) -> bool {
    match addr.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
