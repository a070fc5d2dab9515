use std::future::Future;

use crate::error::LoadResult;
use crate::types::{Predicate, TableName, TableRow, TableSchema, Value};

/// Trait for stores that hold the durable dimension and fact tables.
///
/// [`Warehouse`] implementations execute the small set of operations the loader needs:
/// table creation, single-row inserts, equality selects and updates, and a `max` over an
/// integer column to seed key sequences. Handles are expected to be cheap to clone and to
/// share one underlying connection, so every dimension and fact table of a run can hold
/// its own handle.
///
/// Writes belong to a single unit of work that is published by [`Warehouse::commit`].
/// Calling [`Warehouse::close`] without a prior commit discards whatever the backend is
/// able to discard.
pub trait Warehouse {
    /// Returns the name of the warehouse.
    fn name() -> &'static str;

    /// Creates the table if it does not exist yet.
    ///
    /// Returns `true` when the table was created by this call.
    fn create_table(&self, schema: &TableSchema) -> impl Future<Output = LoadResult<bool>> + Send;

    /// Appends a row to the table. Values are in column order.
    fn insert(
        &self,
        table: &TableName,
        row: TableRow,
    ) -> impl Future<Output = LoadResult<()>> + Send;

    /// Returns the rows matching `predicate`, in insertion order where the backend has one.
    fn select(
        &self,
        table: &TableName,
        predicate: &Predicate,
    ) -> impl Future<Output = LoadResult<Vec<TableRow>>> + Send;

    /// Sets `assignments` on every row matching `predicate` and returns the number of rows
    /// changed.
    fn update(
        &self,
        table: &TableName,
        predicate: &Predicate,
        assignments: &[(String, Value)],
    ) -> impl Future<Output = LoadResult<u64>> + Send;

    /// Returns the largest value of an integer column, or [`None`] for an empty table.
    fn max_integer(
        &self,
        table: &TableName,
        column: &str,
    ) -> impl Future<Output = LoadResult<Option<i64>>> + Send;

    /// Publishes all writes performed so far.
    fn commit(&self) -> impl Future<Output = LoadResult<()>> + Send;

    /// Releases the warehouse.
    ///
    /// The default implementation is a no-op.
    fn close(&self) -> impl Future<Output = LoadResult<()>> + Send {
        async { Ok(()) }
    }
}
