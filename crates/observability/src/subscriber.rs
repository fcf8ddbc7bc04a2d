//! `tracing-subscriber` installation.
//!
//! Filter directives use the `EnvFilter` syntax (`info`, `streamledger_infra=debug`, ...).

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

pub const ENV_LOG: &str = "STREAMLEDGER_LOG";
pub const ENV_LOG_FORMAT: &str = "STREAMLEDGER_LOG_FORMAT";
const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Single-line human readable output.
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "compact" | "text" => Ok(Self::Compact),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub filter: String,
    pub format: LogFormat,
    /// Route output through the test harness capture.
    pub test_writer: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            format: LogFormat::Json,
            test_writer: false,
        }
    }
}

impl LogConfig {
    /// `STREAMLEDGER_LOG` (falling back to `RUST_LOG`) and `STREAMLEDGER_LOG_FORMAT`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let filter = lookup(ENV_LOG)
            .or_else(|| lookup(EnvFilter::DEFAULT_ENV))
            .unwrap_or(defaults.filter);
        let format = lookup(ENV_LOG_FORMAT)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(defaults.format);
        Self {
            filter,
            format,
            test_writer: false,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_test_writer(mut self) -> Self {
        self.test_writer = true;
        self
    }
}

/// Install the global subscriber. Returns `false` if one is already set.
pub fn init_with(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = match (config.format, config.test_writer) {
        (LogFormat::Json, false) => builder.json().try_init(),
        (LogFormat::Json, true) => builder.json().with_test_writer().try_init(),
        (LogFormat::Compact, false) => builder.compact().try_init(),
        (LogFormat::Compact, true) => builder.compact().with_test_writer().try_init(),
    };
    if installed.is_err() {
        return false;
    }
    tracing::debug!(filter = %config.filter, format = ?config.format, "logging initialised");
    true
}
