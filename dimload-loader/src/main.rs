//! Star-schema loader binary.
//!
//! Loads the configuration, initializes telemetry and runs a single load of the book sales
//! star schema from the operational database into the configured warehouse.

use std::process::ExitCode;

use crate::config::load_loader_config;
use crate::core::start_loader_with_config;
use crate::error::{LoaderError, LoaderResult};

use dimload_config::shared::LoaderConfig;
use dimload_telemetry::tracing::init_tracing;
use tracing::error;

mod config;
mod core;
mod error;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprint!("{}", err.render_report());
            ExitCode::FAILURE
        }
    }
}

/// Loads configuration, initializes tracing and runs the load on a multi-threaded runtime.
fn run() -> LoaderResult<()> {
    let loader_config = load_loader_config()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(LoaderError::config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(loader_config))?;

    Ok(())
}

async fn async_main(loader_config: LoaderConfig) -> LoaderResult<()> {
    if let Err(err) = start_loader_with_config(loader_config).await {
        error!("{err}");
        return Err(err);
    }

    Ok(())
}
