mod cached;
mod spec;

pub use cached::*;
pub use spec::*;
