use std::collections::VecDeque;

use crate::error::LoadResult;
use crate::source::Source;
use crate::types::AttributeRow;

/// Source yielding rows held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    rows: VecDeque<AttributeRow>,
    closed: bool,
}

impl MemorySource {
    pub fn new(rows: impl IntoIterator<Item = AttributeRow>) -> Self {
        Self {
            rows: rows.into_iter().collect(),
            closed: false,
        }
    }

    /// Returns `true` once [`Source::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Source for MemorySource {
    async fn next_row(&mut self) -> LoadResult<Option<AttributeRow>> {
        Ok(self.rows.pop_front())
    }

    async fn close(&mut self) -> LoadResult<()> {
        self.rows.clear();
        self.closed = true;

        Ok(())
    }
}
