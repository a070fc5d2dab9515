use chrono::NaiveDate;
use std::fmt;

/// Format used to render and parse dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A scalar attribute value flowing through the loader.
///
/// Values are totally ordered and hashable so tuples of them can be used as natural keys
/// in dimension caches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    Null,
    Int(i64),
    String(String),
    Date(NaiveDate),
}

impl Value {
    /// Returns `true` if the value is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the integer if the value is an [`Value::Int`].
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the string slice if the value is a [`Value::String`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the date if the value is a [`Value::Date`].
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the canonical string form of the value, or [`None`] for nulls.
    ///
    /// Integers are rendered in decimal and dates as `YYYY-MM-DD`, independently of the
    /// locale, so the form can be hashed.
    pub fn canonical_string(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Int(value) => Some(value.to_string()),
            Value::String(value) => Some(value.clone()),
            Value::Date(value) => Some(value.format(DATE_FORMAT).to_string()),
        }
    }

    /// Returns a short name of the value type, used in error details.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "integer",
            Value::String(_) => "string",
            Value::Date(_) => "date",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(value) => write!(f, "{value}"),
            Value::String(value) => write!(f, "'{value}'"),
            Value::Date(value) => write!(f, "{}", value.format(DATE_FORMAT)),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_string_is_locale_independent() {
        let date = NaiveDate::from_ymd_opt(2023, 11, 7).unwrap();

        assert_eq!(Value::Date(date).canonical_string().unwrap(), "2023-11-07");
        assert_eq!(Value::Int(-42).canonical_string().unwrap(), "-42");
        assert_eq!(Value::from("Dune").canonical_string().unwrap(), "Dune");
        assert_eq!(Value::Null.canonical_string(), None);
    }

    #[test]
    fn options_convert_to_null() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(3i64)), Value::Int(3));
    }
}
