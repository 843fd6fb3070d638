//! Logging setup
//!
//! Installs a `tracing-subscriber` fmt subscriber. The configured level seeds the
//! filter; `RUST_LOG` overrides it.

use crate::error::{AikvError, Result};
use serde::Deserialize;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

/// How log lines are rendered on stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = AikvError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("text") || s.eq_ignore_ascii_case("plain") {
            Ok(Self::Text)
        } else if s.eq_ignore_ascii_case("json") {
            Ok(Self::Json)
        } else {
            Err(AikvError::Config(format!("invalid log format '{}'", s)))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::default(),
        }
    }
}

impl LogConfig {
    pub fn new(level: &str, format: &str) -> Result<Self> {
        Ok(Self {
            level: Self::parse_level(level)
                .ok_or_else(|| AikvError::Config(format!("invalid log level '{}'", level)))?,
            format: format.parse()?,
        })
    }

    /// `tracing` level names, plus "warning"
    pub fn parse_level(s: &str) -> Option<Level> {
        if s.eq_ignore_ascii_case("warning") {
            return Some(Level::WARN);
        }
        s.parse().ok()
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(self.level).into())
            .from_env_lossy()
    }
}

/// Install the global subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(config.filter())
        .with_writer(std::io::stderr);

    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| AikvError::Config(format!("failed to install logger: {}", e)))
}
