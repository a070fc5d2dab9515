use std::fmt;

use crate::types::Value;

/// A conjunction of column equalities used to select and update warehouse rows.
///
/// An equality against [`Value::Null`] matches null columns, mirroring `IS NULL`.
/// An empty predicate matches every row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    equalities: Vec<(String, Value)>,
}

impl Predicate {
    /// Creates a predicate matching every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// Creates a predicate with a single equality.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and(column, value)
    }

    /// Adds an equality to the conjunction.
    pub fn and(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equalities.push((column.into(), value.into()));
        self
    }

    /// Builds a predicate from parallel column and value lists.
    pub fn from_pairs<C, V>(pairs: impl IntoIterator<Item = (C, V)>) -> Self
    where
        C: Into<String>,
        V: Into<Value>,
    {
        pairs
            .into_iter()
            .fold(Self::all(), |predicate, (column, value)| {
                predicate.and(column, value)
            })
    }

    /// Returns the equalities of the conjunction.
    pub fn equalities(&self) -> &[(String, Value)] {
        &self.equalities
    }

    pub fn is_empty(&self) -> bool {
        self.equalities.is_empty()
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.equalities.is_empty() {
            return f.write_str("true");
        }

        for (index, (column, value)) in self.equalities.iter().enumerate() {
            if index > 0 {
                f.write_str(" and ")?;
            }
            match value {
                Value::Null => write!(f, "{column} is null")?,
                value => write!(f, "{column} = {value}")?,
            }
        }

        Ok(())
    }
}
