mod base;
pub mod csv;
pub mod memory;
pub mod sql;

pub use base::Source;
