mod base;
#[cfg(feature = "bigquery")]
pub mod bigquery;
pub mod memory;
pub mod postgres;
pub mod retry;

pub use base::Warehouse;
