use tokio_postgres::Row;
use tokio_postgres::types::{FromSql, Type};

use crate::bail;
use crate::error::{ErrorKind, LoadResult};
use crate::load_error;
use crate::types::{ColumnType, Value};

/// Decodes the value at `index` of a Postgres row.
///
/// Integer, text and date columns are supported, anything else is a conversion error.
pub fn value_from_row(row: &Row, index: usize) -> LoadResult<Value> {
    let column = &row.columns()[index];

    let value = match column.type_() {
        &Type::INT2 => Value::from(get::<Option<i16>>(row, index)?.map(i64::from)),
        &Type::INT4 => Value::from(get::<Option<i32>>(row, index)?),
        &Type::INT8 => Value::from(get::<Option<i64>>(row, index)?),
        &Type::TEXT | &Type::VARCHAR | &Type::BPCHAR | &Type::NAME => {
            Value::from(get::<Option<String>>(row, index)?)
        }
        &Type::DATE => Value::from(get::<Option<chrono::NaiveDate>>(row, index)?),
        other => {
            bail!(
                ErrorKind::ConversionError,
                "Unsupported Postgres column type",
                format!("column '{}' has type {other}", column.name())
            )
        }
    };

    Ok(value)
}

/// Returns the Postgres type used to store columns of `typ`.
pub fn postgres_type_name(typ: ColumnType) -> &'static str {
    match typ {
        ColumnType::Integer => "bigint",
        ColumnType::String => "text",
        ColumnType::Date => "date",
    }
}

/// Renders `value` as a SQL literal.
pub fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::Int(value) => value.to_string(),
        Value::String(value) => pg_escape::quote_literal(value).to_string(),
        Value::Date(value) => format!("date '{}'", value.format(crate::types::DATE_FORMAT)),
    }
}

fn get<'a, T>(row: &'a Row, index: usize) -> LoadResult<T>
where
    T: FromSql<'a>,
{
    row.try_get(index).map_err(|err| {
        load_error!(
            ErrorKind::ConversionError,
            "Postgres value could not be decoded",
            source: err
        )
    })
}
