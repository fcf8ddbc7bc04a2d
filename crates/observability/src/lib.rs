//! Tracing/logging setup shared by binaries and tests.

pub mod subscriber;

pub use subscriber::{LogConfig, LogFormat};

/// Initialize process-wide logging from the environment.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    subscriber::init_with(&LogConfig::from_env());
}

/// Initialize with an explicit configuration. Returns `false` when a global
/// subscriber was already installed.
pub fn init_with(config: &LogConfig) -> bool {
    subscriber::init_with(config)
}

/// Compact logs captured by the test harness.
pub fn init_for_tests() {
    subscriber::init_with(&LogConfig::from_env().with_format(LogFormat::Compact).with_test_writer());
}
