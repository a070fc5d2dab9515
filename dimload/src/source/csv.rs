use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::info;

use crate::bail;
use crate::error::{ErrorKind, LoadResult};
use crate::source::Source;
use crate::types::{AttributeRow, ColumnType, Value};

/// Source reading delimited text.
///
/// Column names come from the header record unless they are declared with
/// [`CsvSource::with_names`], in which case every record is data. Fields are strings
/// unless a type is declared for their column with [`CsvSource::with_column_type`].
/// Empty fields of typed columns are read as nulls.
#[derive(Debug)]
pub struct CsvSource<R> {
    reader: csv::Reader<R>,
    names: Vec<String>,
    types: HashMap<String, ColumnType>,
    record: csv::StringRecord,
}

/// Options used to build a [`CsvSource`].
#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub delimiter: u8,
    /// Column names. When empty, the first record is used as header.
    pub names: Vec<String>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            names: Vec::new(),
        }
    }
}

impl CsvSource<File> {
    /// Opens the file at `path`.
    pub fn open(path: impl AsRef<Path>, options: CsvOptions) -> LoadResult<Self> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) => bail!(
                ErrorKind::SourceIoError,
                "CSV source file could not be opened",
                format!("{}: {err}", path.display()),
                source: err
            ),
        };

        info!(path = %path.display(), "opened csv source");

        Self::from_reader(file, options)
    }
}

impl<R> CsvSource<R>
where
    R: Read,
{
    pub fn from_reader(reader: R, options: CsvOptions) -> LoadResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(options.delimiter)
            .has_headers(options.names.is_empty())
            .trim(csv::Trim::All)
            .from_reader(reader);

        let names = if options.names.is_empty() {
            reader.headers()?.iter().map(str::to_owned).collect()
        } else {
            options.names
        };

        Ok(Self {
            reader,
            names,
            types: HashMap::new(),
            record: csv::StringRecord::new(),
        })
    }

    /// Declares column names, replacing the header names.
    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Parses the values of `column` as `typ`.
    pub fn with_column_type(mut self, column: impl Into<String>, typ: ColumnType) -> Self {
        self.types.insert(column.into(), typ);
        self
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    fn read_row(&mut self) -> LoadResult<Option<AttributeRow>> {
        if !self.reader.read_record(&mut self.record)? {
            return Ok(None);
        }

        if self.record.len() != self.names.len() {
            let line = self
                .record
                .position()
                .map(|position| position.line())
                .unwrap_or_default();
            bail!(
                ErrorKind::InvalidData,
                "CSV record does not match the column names",
                format!(
                    "line {line} has {} fields, expected {}",
                    self.record.len(),
                    self.names.len()
                )
            );
        }

        let mut row = AttributeRow::new();
        for (name, field) in self.names.iter().zip(self.record.iter()) {
            let value = match self.types.get(name) {
                Some(_) if field.is_empty() => Value::Null,
                Some(typ) => typ.coerce(Value::from(field))?,
                None => Value::from(field),
            };
            row.set(name.as_str(), value);
        }

        Ok(Some(row))
    }
}

impl<R> Source for CsvSource<R>
where
    R: Read + Send,
{
    async fn next_row(&mut self) -> LoadResult<Option<AttributeRow>> {
        self.read_row()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    const REGIONS: &str = "city,region\nUtrecht,Midden\nAmsterdam , Noord\n";

    #[tokio::test]
    async fn reads_header_and_rows() {
        let mut source = CsvSource::from_reader(REGIONS.as_bytes(), CsvOptions::default()).unwrap();

        assert_eq!(source.names(), ["city", "region"]);

        let first = source.next_row().await.unwrap().unwrap();
        assert_eq!(first.get_str("city").unwrap(), "Utrecht");

        let second = source.next_row().await.unwrap().unwrap();
        assert_eq!(second.get_str("city").unwrap(), "Amsterdam");
        assert_eq!(second.get_str("region").unwrap(), "Noord");

        assert!(source.next_row().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn declared_names_and_types() {
        let data = "Dune;SciFi;Utrecht;2023-11-07;3\nEmma;Romance;Utrecht;;4\n";
        let options = CsvOptions {
            delimiter: b';',
            names: ["title", "genre", "city", "date", "sale"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
        };
        let mut source = CsvSource::from_reader(data.as_bytes(), options)
            .unwrap()
            .with_column_type("date", ColumnType::Date)
            .with_column_type("sale", ColumnType::Integer);

        let row = source.next_row().await.unwrap().unwrap();
        assert_eq!(
            row.get_date("date").unwrap(),
            NaiveDate::from_ymd_opt(2023, 11, 7).unwrap()
        );
        assert_eq!(row.get_int("sale").unwrap(), 3);

        let row = source.next_row().await.unwrap().unwrap();
        assert_eq!(row.get("date"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn short_records_are_rejected() {
        let data = "city,region\nUtrecht\n";
        let mut source = CsvSource::from_reader(data.as_bytes(), CsvOptions::default()).unwrap();

        let err = source.next_row().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn missing_files_are_io_errors() {
        let err = CsvSource::open("/nonexistent/region.csv", CsvOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceIoError);
    }
}
