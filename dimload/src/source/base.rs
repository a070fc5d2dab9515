use std::future::Future;

use crate::error::LoadResult;
use crate::types::AttributeRow;

/// Trait for finite, lazily read streams of attribute rows.
///
/// Rows are pulled one at a time with [`Source::next_row`] until it returns [`None`].
/// The loader calls [`Source::close`] exactly once when it is done with the source,
/// whether or not the load succeeded.
pub trait Source {
    /// Returns the next row, or [`None`] once the source is exhausted.
    fn next_row(&mut self) -> impl Future<Output = LoadResult<Option<AttributeRow>>> + Send;

    /// Releases the resources held by the source.
    ///
    /// The default implementation is a no-op.
    fn close(&mut self) -> impl Future<Output = LoadResult<()>> + Send {
        async { Ok(()) }
    }
}
