use chrono::{Datelike, NaiveDate};

use crate::bail;
use crate::error::{ErrorKind, LoadResult};
use crate::types::{AttributeRow, DATE_FORMAT, Value};

/// Attribute receiving the year of a split date.
pub const YEAR_ATTRIBUTE: &str = "year";
/// Attribute receiving the month of a split date.
pub const MONTH_ATTRIBUTE: &str = "month";
/// Attribute receiving the day of a split date.
pub const DAY_ATTRIBUTE: &str = "day";

/// Decomposes the date stored in `attribute` into integer `year`, `month` and `day`
/// attributes of the same row.
///
/// Strings in `YYYY-MM-DD` form are parsed. The source attribute is left untouched.
pub fn split_date(row: &mut AttributeRow, attribute: &str) -> LoadResult<NaiveDate> {
    let date = match row.require(attribute)? {
        Value::Date(date) => *date,
        Value::String(value) => NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)?,
        value => {
            bail!(
                ErrorKind::InvalidData,
                "Attribute does not hold a date",
                format!(
                    "attribute '{attribute}' holds {} {value}",
                    value.type_name()
                )
            )
        }
    };

    row.set(YEAR_ATTRIBUTE, Value::Int(date.year().into()));
    row.set(MONTH_ATTRIBUTE, Value::Int(date.month().into()));
    row.set(DAY_ATTRIBUTE, Value::Int(date.day().into()));

    Ok(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_date_into_parts() {
        let mut row =
            AttributeRow::new().with("date", NaiveDate::from_ymd_opt(2023, 11, 7).unwrap());

        split_date(&mut row, "date").unwrap();

        assert_eq!(row.get_int("year").unwrap(), 2023);
        assert_eq!(row.get_int("month").unwrap(), 11);
        assert_eq!(row.get_int("day").unwrap(), 7);
        assert!(row.get_date("date").is_ok());
    }

    #[test]
    fn parses_iso_strings() {
        let mut row = AttributeRow::new().with("date", "2023-11-07");

        let date = split_date(&mut row, "date").unwrap();

        assert_eq!(date, NaiveDate::from_ymd_opt(2023, 11, 7).unwrap());
        assert_eq!(row.get_int("day").unwrap(), 7);
    }

    #[test]
    fn rejects_non_dates() {
        let mut row = AttributeRow::new().with("date", 20231107i64);
        assert_eq!(
            split_date(&mut row, "date").unwrap_err().kind(),
            ErrorKind::InvalidData
        );

        let mut row = AttributeRow::new().with("date", "07/11/2023");
        assert_eq!(
            split_date(&mut row, "date").unwrap_err().kind(),
            ErrorKind::ConversionError
        );
    }
}
