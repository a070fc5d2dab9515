mod conversions;
pub mod derive;
pub mod dimension;
pub mod error;
pub mod fact;
mod macros;
pub mod pipeline;
pub mod sales;
pub mod source;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod warehouse;
