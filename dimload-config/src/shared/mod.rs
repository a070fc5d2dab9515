//! Shared configuration types for the loader.

mod base;
mod connection;
mod loader;
mod warehouse;

pub use base::ValidationError;
pub use connection::PgConnectionConfig;
pub use loader::{KeyStrategyConfig, LoaderConfig, PrimingConfig, RetryConfig, SourceConfig};
pub use warehouse::WarehouseConfig;
