//! Tracing initialization for the loader binary and tests.

use dimload_config::Environment;
use std::sync::Once;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter applied when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info";

/// Environment variable enabling log output in tests.
const ENABLE_TEST_TRACING_ENV_NAME: &str = "ENABLE_TRACING";

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to detect the environment: {0}")]
    Environment(#[from] std::io::Error),

    #[error("failed to install the tracing subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Flushes buffered log lines when dropped.
///
/// Must be held until the program exits, dropping it early stops log output.
#[must_use]
#[derive(Debug)]
pub struct LogFlusher {
    _guard: WorkerGuard,
}

/// Installs the global tracing subscriber for `app_name`.
///
/// Logs are written to stdout through a non-blocking writer, as JSON in the `prod`
/// environment and in a human-readable format otherwise. The filter is read from
/// `RUST_LOG` and defaults to `info`.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    let environment = Environment::load()?;
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    let registry = tracing_subscriber::registry().with(env_filter());
    match environment {
        Environment::Prod => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(writer),
            )
            .try_init()?,
        Environment::Dev => registry
            .with(fmt::layer().pretty().with_writer(writer))
            .try_init()?,
    }

    tracing::info!(app_name, %environment, "tracing initialized");

    Ok(LogFlusher { _guard: guard })
}

/// Installs a subscriber writing to the test output, once per process.
///
/// Output is only produced when the `ENABLE_TRACING` environment variable is set, so test
/// runs stay quiet by default.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        if std::env::var(ENABLE_TEST_TRACING_ENV_NAME).is_err() {
            return;
        }

        // Another test harness may have installed a subscriber already.
        let _ = tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_can_be_initialized_repeatedly() {
        init_test_tracing();
        init_test_tracing();
    }
}
