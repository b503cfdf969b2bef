//! Logging and tracing initialization.
//!
//! The human-readable format includes thread names.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global tracing subscriber.
///
/// Returns `false` when a subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let builder = fmt::Subscriber::builder().with_env_filter(filter_for(&config.level));

    let installed = if config.json {
        let subscriber = builder.json().with_current_span(true).finish();
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = builder
            .with_target(true)
            .with_thread_names(true)
            .with_file(false)
            .with_line_number(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
    };
    installed.is_ok()
}

/// Route logs through the test harness writer so `cargo test` captures them.
pub fn init_test_logging() {
    let _ = fmt()
        .with_env_filter(filter_for("debug"))
        .with_test_writer()
        .try_init();
}
