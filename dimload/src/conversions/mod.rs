//! Conversions between Postgres and loader values.

mod postgres;

pub(crate) use postgres::*;
