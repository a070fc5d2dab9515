use chrono::NaiveDate;
use std::fmt;

use crate::bail;
use crate::error::{ErrorKind, LoadResult};
use crate::types::{DATE_FORMAT, Value};

/// Fully qualified name of a warehouse table.
///
/// Rendered as `{project}.{dataset}.{table}`. For Postgres warehouses the project is the
/// database and the dataset is the schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableName {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableName {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// Type of a durable column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Integer,
    String,
    Date,
}

impl ColumnType {
    /// Coerces `value` to this column type.
    ///
    /// Strings are parsed into integers and dates, integers are rendered into strings and
    /// nulls are passed through. Anything else fails with [`ErrorKind::ConversionError`].
    pub fn coerce(&self, value: Value) -> LoadResult<Value> {
        let coerced = match (self, value) {
            (_, Value::Null) => Value::Null,
            (ColumnType::Integer, Value::Int(value)) => Value::Int(value),
            (ColumnType::Integer, Value::String(value)) => Value::Int(value.trim().parse()?),
            (ColumnType::String, Value::String(value)) => Value::String(value),
            (ColumnType::String, Value::Int(value)) => Value::String(value.to_string()),
            (ColumnType::Date, Value::Date(value)) => Value::Date(value),
            (ColumnType::Date, Value::String(value)) => {
                Value::Date(NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)?)
            }
            (typ, value) => {
                bail!(
                    ErrorKind::ConversionError,
                    "Value cannot be converted to the column type",
                    format!("cannot convert {} {value} to {typ}", value.type_name())
                )
            }
        };

        Ok(coerced)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Integer => f.write_str("integer"),
            ColumnType::String => f.write_str("string"),
            ColumnType::Date => f.write_str("date"),
        }
    }
}

/// Schema of a single durable column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub typ: ColumnType,
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, typ: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            typ,
            nullable,
        }
    }

    /// Creates a non-nullable column.
    pub fn required(name: impl Into<String>, typ: ColumnType) -> Self {
        Self::new(name, typ, false)
    }

    /// Creates a nullable column.
    pub fn nullable(name: impl Into<String>, typ: ColumnType) -> Self {
        Self::new(name, typ, true)
    }

    /// Coerces `value` to the column type and enforces nullability.
    pub fn coerce(&self, value: Value) -> LoadResult<Value> {
        let value = self.typ.coerce(value)?;
        if value.is_null() && !self.nullable {
            bail!(
                ErrorKind::InvalidData,
                "Null value in a required column",
                format!("column '{}' does not accept nulls", self.name)
            );
        }

        Ok(value)
    }
}

/// Schema of a durable table: its name and its ordered columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: TableName,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(name: TableName, columns: Vec<ColumnSchema>) -> Self {
        Self { name, columns }
    }

    /// Returns the position of the column called `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    /// Returns the position of the column called `name`, failing if it does not exist.
    pub fn require_column_index(&self, name: &str) -> LoadResult<usize> {
        match self.column_index(name) {
            Some(index) => Ok(index),
            None => bail!(
                ErrorKind::InvalidData,
                "Column does not exist in table",
                format!("column '{name}' not found in {}", self.name)
            ),
        }
    }

    /// Returns the column names, in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }
}
