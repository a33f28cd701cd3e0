//! Logging setup for the harness binaries.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::config::EnvParser;

/// Logging configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default level applied to every target without a directive.
    pub level: String,
    /// Emit JSON lines instead of the compact human format.
    pub json: bool,
}

impl LogConfig {
    /// Read `DCRHARNESS_LOG_LEVEL` and `DCRHARNESS_LOG_JSON`, falling back to
    /// `default_level`.
    pub fn from_env(default_level: &str) -> Self {
        let mut parser = EnvParser::new();
        let level = parser.get_log_level("LOG_LEVEL", default_level).value;
        let json = parser.get_bool("LOG_JSON", false).value;
        Self { level, json }
    }

    /// Override the level, e.g. from a `--debuglevel` flag.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install a global subscriber writing to stderr.
///
/// Stdout is left alone: the harness redirects child stdout into log files
/// and the process banner is written there.
pub fn init_logging(config: &LogConfig) {
    let registry = tracing_subscriber::registry().with(config.filter());
    let result = if config.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    if let Err(err) = result {
        eprintln!("logging already initialized: {err}");
    }
}
