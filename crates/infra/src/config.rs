//! Configuration loading and representation.
//!
//! Values come from code (`Default` + `with_*` builders) or from the
//! environment via `from_env()`; unparsable environment values fall back to
//! the default with a warning.

use std::str::FromStr;

pub const ENV_QUEUE_NAME: &str = "STREAMLEDGER_QUEUE_NAME";
pub const ENV_QUEUE_MAX_IN_FLIGHT: &str = "STREAMLEDGER_QUEUE_MAX_IN_FLIGHT";

/// Command queue configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Name for logging
    pub name: String,
    /// Upper bound of commands admitted but not yet finished
    pub max_in_flight: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "command-queue".to_string(),
            max_in_flight: 1024,
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            name: lookup(ENV_QUEUE_NAME).unwrap_or(defaults.name),
            max_in_flight: parse_or(&lookup, ENV_QUEUE_MAX_IN_FLIGHT, defaults.max_in_flight),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Debug,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, ?default, "invalid configuration value, using default");
            default
        }),
    }
}
