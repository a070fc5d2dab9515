//! Pure key derivation steps applied to attribute rows.

mod date;
mod hash;

pub use date::*;
pub use hash::*;
