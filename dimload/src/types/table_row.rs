use crate::types::Value;

/// A row as stored in a warehouse table, with values in column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub values: Vec<Value>,
}

impl TableRow {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Returns the value at column `index`, if present.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}
