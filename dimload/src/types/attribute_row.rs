use chrono::NaiveDate;
use std::fmt;

use crate::bail;
use crate::error::{ErrorKind, LoadResult};
use crate::load_error;
use crate::types::Value;

/// An ordered mapping from attribute name to [`Value`].
///
/// [`AttributeRow`] is the unit of data flowing through a load. Sources produce it, derivation
/// steps add fields to it in place (date parts, hash keys) and resolved dimension keys are
/// written into it before the fact is appended. Attributes keep their insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeRow {
    attributes: Vec<(String, Value)>,
}

impl AttributeRow {
    /// Creates an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of attributes in the row.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Returns `true` if the row holds no attributes.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Returns the value of `name`, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|(attribute, _)| attribute == name)
            .map(|(_, value)| value)
    }

    /// Returns `true` if the row has an attribute called `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Returns the value of `name` or a [`ErrorKind::MissingAttribute`] error.
    pub fn require(&self, name: &str) -> LoadResult<&Value> {
        self.get(name).ok_or_else(|| {
            load_error!(
                ErrorKind::MissingAttribute,
                "Required attribute is missing from the row",
                format!("attribute '{name}' not found in {self}")
            )
        })
    }

    /// Returns the integer value of `name`.
    pub fn get_int(&self, name: &str) -> LoadResult<i64> {
        let value = self.require(name)?;
        value
            .as_int()
            .ok_or_else(|| type_mismatch(name, "integer", value))
    }

    /// Returns the string value of `name`.
    pub fn get_str(&self, name: &str) -> LoadResult<&str> {
        let value = self.require(name)?;
        value
            .as_str()
            .ok_or_else(|| type_mismatch(name, "string", value))
    }

    /// Returns the date value of `name`.
    pub fn get_date(&self, name: &str) -> LoadResult<NaiveDate> {
        let value = self.require(name)?;
        value
            .as_date()
            .ok_or_else(|| type_mismatch(name, "date", value))
    }

    /// Sets `name` to `value`, replacing any previous value while keeping its position.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();

        match self
            .attributes
            .iter_mut()
            .find(|(attribute, _)| *attribute == name)
        {
            Some((_, current)) => *current = value,
            None => self.attributes.push((name, value)),
        }
    }

    /// Builder variant of [`AttributeRow::set`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Writes a resolved key into the row.
    ///
    /// A key, once written, is never overwritten: writing the same value again is accepted,
    /// writing a different value fails with [`ErrorKind::InvalidState`].
    pub fn set_key(&mut self, name: &str, key: Value) -> LoadResult<()> {
        match self.get(name) {
            Some(current) if *current == key => Ok(()),
            Some(current) => {
                bail!(
                    ErrorKind::InvalidState,
                    "Resolved key would overwrite an existing key",
                    format!("attribute '{name}' already holds {current}, refusing to write {key}")
                )
            }
            None => {
                self.attributes.push((name.to_owned(), key));
                Ok(())
            }
        }
    }

    /// Removes `name` from the row and returns its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let position = self
            .attributes
            .iter()
            .position(|(attribute, _)| attribute == name)?;

        Some(self.attributes.remove(position).1)
    }

    /// Renames the attribute `from` to `to`, keeping its position.
    ///
    /// Does nothing if `from` is absent.
    pub fn rename(&mut self, from: &str, to: impl Into<String>) {
        if let Some((attribute, _)) = self
            .attributes
            .iter_mut()
            .find(|(attribute, _)| attribute == from)
        {
            *attribute = to.into();
        }
    }

    /// Returns the values of `names`, in the given order.
    pub fn project<S>(&self, names: &[S]) -> LoadResult<Vec<Value>>
    where
        S: AsRef<str>,
    {
        names
            .iter()
            .map(|name| self.require(name.as_ref()).cloned())
            .collect()
    }

    /// Returns an iterator over the attribute names and values, in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.attributes
            .iter()
            .map(|(attribute, value)| (attribute.as_str(), value))
    }
}

impl fmt::Display for AttributeRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (index, (attribute, value)) in self.attributes.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{attribute}: {value}")?;
        }
        f.write_str("}")
    }
}

impl<N, V> FromIterator<(N, V)> for AttributeRow
where
    N: Into<String>,
    V: Into<Value>,
{
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut row = AttributeRow::new();
        for (name, value) in iter {
            row.set(name, value);
        }

        row
    }
}

fn type_mismatch(name: &str, expected: &str, value: &Value) -> crate::error::LoadError {
    load_error!(
        ErrorKind::InvalidData,
        "Attribute has an unexpected type",
        format!(
            "attribute '{name}' expected {expected}, found {} {value}",
            value.type_name()
        )
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> AttributeRow {
        AttributeRow::new()
            .with("title", "Dune")
            .with("genre", "SciFi")
            .with("sale", 3i64)
    }

    #[test]
    fn set_replaces_in_place_and_keeps_order() {
        let mut row = sample_row();
        row.set("genre", "Fiction");

        let names: Vec<_> = row.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["title", "genre", "sale"]);
        assert_eq!(row.get_str("genre").unwrap(), "Fiction");
    }

    #[test]
    fn set_key_never_overwrites_a_different_key() {
        let mut row = sample_row();

        row.set_key("bookid", Value::Int(1)).unwrap();
        row.set_key("bookid", Value::Int(1)).unwrap();
        let err = row.set_key("bookid", Value::Int(2)).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(row.get_int("bookid").unwrap(), 1);
    }

    #[test]
    fn require_reports_missing_attribute() {
        let row = sample_row();
        let err = row.require("city").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MissingAttribute);
    }

    #[test]
    fn typed_accessors_reject_wrong_types() {
        let row = sample_row();

        assert_eq!(row.get_int("sale").unwrap(), 3);
        assert_eq!(
            row.get_int("title").unwrap_err().kind(),
            ErrorKind::InvalidData
        );
    }

    #[test]
    fn project_follows_requested_order() {
        let row = sample_row();

        assert_eq!(
            row.project(&["genre", "title"]).unwrap(),
            vec![Value::from("SciFi"), Value::from("Dune")]
        );
    }

    #[test]
    fn rename_and_remove() {
        let mut row = sample_row();
        row.rename("title", "book");

        assert!(!row.contains("title"));
        assert_eq!(row.remove("book"), Some(Value::from("Dune")));
        assert_eq!(row.len(), 2);
    }
}
