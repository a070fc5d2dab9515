//! Error types and result definitions for load operations.
//!
//! Provides a single error type for the dimensional loader with classification, aggregation
//! and captured diagnostic metadata. A [`LoadError`] is either a single error, optionally
//! carrying a dynamic detail and an originating source error, or an aggregation of several
//! errors.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for load operations using [`LoadError`] as the error type.
pub type LoadResult<T> = Result<T, LoadError>;

/// Detailed payload stored for single [`LoadError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for load operations.
///
/// [`LoadError`] can represent a single error, an error with additional detail, or multiple
/// aggregated errors (for example a failed run whose cleanup also failed).
#[derive(Debug, Clone)]
pub struct LoadError {
    repr: ErrorRepr,
}

/// Internal representation of error data.
#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Single error payload holding rich metadata.
    Single(ErrorPayload),
    /// Multiple aggregated errors.
    Many {
        errors: Vec<LoadError>,
        location: &'static Location<'static>,
    },
}

/// Specific categories of errors that can occur while loading a star schema.
///
/// Error kinds are organized by functional area so callers can decide how to react, for
/// example whether an operation may be retried.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Connection Errors
    SourceConnectionFailed,
    WarehouseConnectionFailed,

    // Query & Execution Errors
    SourceQueryFailed,
    WarehouseQueryFailed,

    // Schema Errors
    WarehouseTableMissing,
    WarehouseTableNameInvalid,

    // Data & Transformation Errors
    MissingAttribute,
    ConversionError,
    InvalidData,
    FactMeasureMismatch,

    // Data Quality Errors
    DimensionMemberMissing,

    // Configuration Errors
    ConfigError,

    // IO Errors
    IoError,
    SourceIoError,
    WarehouseIoError,

    // Authentication Errors
    AuthenticationError,

    // State & Workflow Errors
    InvalidState,

    // Unknown / Uncategorized
    Unknown,
}

impl LoadError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    /// Returns the static description of this error.
    ///
    /// For multiple errors, returns the description of the first error.
    pub fn description(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.description.as_ref()),
            ErrorRepr::Many { ref errors, .. } => errors.first().and_then(|e| e.description()),
        }
    }

    /// Returns the detailed error information if available.
    ///
    /// For multiple errors, returns the detail of the first error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the aggregated errors, if this is an aggregation.
    pub fn errors(&self) -> Option<&[LoadError]> {
        match self.repr {
            ErrorRepr::Single(_) => None,
            ErrorRepr::Many { ref errors, .. } => Some(errors),
        }
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating [`error::Error`] to this error and returns the modified instance.
    ///
    /// Has no effect on aggregated errors, which forward their first error as the source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }

        self
    }

    /// Creates a [`LoadError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        LoadError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }

    /// Creates a [`LoadError`] wrapping a source error, using its rendering as detail.
    #[track_caller]
    fn from_source<E>(kind: ErrorKind, description: &'static str, err: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        let detail = err.to_string();
        LoadError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl PartialEq for LoadError {
    fn eq(&self, other: &LoadError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (
                ErrorRepr::Many {
                    errors: errors_a, ..
                },
                ErrorRepr::Many {
                    errors: errors_b, ..
                },
            ) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                write_detail(payload.detail.as_deref(), f, 1)
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if errors.is_empty() {
                    write!(f, "\n  (no inner errors provided)")?;
                }

                for (index, error) in errors.iter().enumerate() {
                    let rendered = format!("{error}");
                    let mut lines = rendered.lines();
                    if let Some(first_line) = lines.next() {
                        write!(f, "\n  {}. {}", index + 1, first_line)?;
                    } else {
                        write!(f, "\n  {}.", index + 1)?;
                    }

                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for LoadError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Writes the detail block with indentation.
fn write_detail(detail: Option<&str>, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
    if let Some(detail) = detail {
        let indent_str = "  ".repeat(indent);
        if detail.trim().is_empty() {
            write!(f, "\n{indent_str}Detail: <empty>")?;
        } else {
            write!(f, "\n{indent_str}Detail:")?;
            for line in detail.lines() {
                write!(f, "\n{indent_str}  {line}")?;
            }
        }
    }

    Ok(())
}

/// Creates a [`LoadError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for LoadError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> LoadError {
        LoadError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`LoadError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for LoadError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> LoadError {
        LoadError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Creates a [`LoadError`] from a vector of errors for aggregation.
///
/// A vector holding exactly one error yields that error unchanged.
impl<E> From<Vec<E>> for LoadError
where
    E: Into<LoadError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> LoadError {
        let location = Location::caller();

        let mut errors: Vec<LoadError> = errors.into_iter().map(Into::into).collect();
        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        LoadError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for LoadError {
    #[track_caller]
    fn from(err: std::io::Error) -> LoadError {
        LoadError::from_source(ErrorKind::IoError, "I/O operation failed", err)
    }
}

impl From<std::num::ParseIntError> for LoadError {
    #[track_caller]
    fn from(err: std::num::ParseIntError) -> LoadError {
        LoadError::from_source(ErrorKind::ConversionError, "Integer parsing failed", err)
    }
}

impl From<chrono::ParseError> for LoadError {
    #[track_caller]
    fn from(err: chrono::ParseError) -> LoadError {
        LoadError::from_source(ErrorKind::ConversionError, "Date parsing failed", err)
    }
}

/// Converts [`csv::Error`] to [`LoadError`].
///
/// I/O failures map to [`ErrorKind::SourceIoError`], malformed records to
/// [`ErrorKind::InvalidData`].
impl From<csv::Error> for LoadError {
    #[track_caller]
    fn from(err: csv::Error) -> LoadError {
        let (kind, description) = match err.kind() {
            csv::ErrorKind::Io(_) => (ErrorKind::SourceIoError, "CSV source read failed"),
            csv::ErrorKind::Utf8 { .. } => (ErrorKind::ConversionError, "CSV record is not UTF-8"),
            _ => (ErrorKind::InvalidData, "CSV record is malformed"),
        };

        LoadError::from_source(kind, description, err)
    }
}

/// Converts [`tokio_postgres::Error`] to [`LoadError`] based on its SQLSTATE code.
///
/// The same client is used for the SQL source and the Postgres warehouse, so the kinds
/// produced here are source kinds. The warehouse re-classifies them with
/// [`LoadError::into_warehouse_error`].
impl From<tokio_postgres::Error> for LoadError {
    #[track_caller]
    fn from(err: tokio_postgres::Error) -> LoadError {
        use tokio_postgres::error::SqlState;

        let (kind, description) = match err.code() {
            Some(sqlstate) => match *sqlstate {
                SqlState::CONNECTION_EXCEPTION
                | SqlState::CONNECTION_DOES_NOT_EXIST
                | SqlState::CONNECTION_FAILURE
                | SqlState::SQLCLIENT_UNABLE_TO_ESTABLISH_SQLCONNECTION
                | SqlState::SQLSERVER_REJECTED_ESTABLISHMENT_OF_SQLCONNECTION
                | SqlState::TOO_MANY_CONNECTIONS
                | SqlState::ADMIN_SHUTDOWN
                | SqlState::CRASH_SHUTDOWN
                | SqlState::CANNOT_CONNECT_NOW => (
                    ErrorKind::SourceConnectionFailed,
                    "PostgreSQL connection failed",
                ),

                SqlState::INVALID_AUTHORIZATION_SPECIFICATION | SqlState::INVALID_PASSWORD => (
                    ErrorKind::AuthenticationError,
                    "PostgreSQL authentication failed",
                ),

                SqlState::INTEGRITY_CONSTRAINT_VIOLATION
                | SqlState::NOT_NULL_VIOLATION
                | SqlState::FOREIGN_KEY_VIOLATION
                | SqlState::UNIQUE_VIOLATION
                | SqlState::CHECK_VIOLATION => {
                    (ErrorKind::InvalidData, "PostgreSQL constraint violation")
                }

                SqlState::DATA_EXCEPTION
                | SqlState::INVALID_TEXT_REPRESENTATION
                | SqlState::INVALID_DATETIME_FORMAT
                | SqlState::NUMERIC_VALUE_OUT_OF_RANGE => (
                    ErrorKind::ConversionError,
                    "PostgreSQL data conversion failed",
                ),

                SqlState::UNDEFINED_TABLE => (
                    ErrorKind::WarehouseTableMissing,
                    "PostgreSQL table not found",
                ),

                SqlState::IO_ERROR | SqlState::DISK_FULL => {
                    (ErrorKind::SourceIoError, "PostgreSQL I/O error")
                }

                _ => (ErrorKind::SourceQueryFailed, "PostgreSQL query failed"),
            },
            // No SQL state means the connection itself failed.
            None => (
                ErrorKind::SourceConnectionFailed,
                "PostgreSQL connection failed",
            ),
        };

        LoadError::from_source(kind, description, err)
    }
}

impl LoadError {
    /// Re-classifies source-side kinds as their warehouse-side counterparts.
    ///
    /// Used by warehouses that share a client library with the sources.
    pub fn into_warehouse_error(mut self) -> LoadError {
        match self.repr {
            ErrorRepr::Single(ref mut payload) => {
                payload.kind = match payload.kind {
                    ErrorKind::SourceConnectionFailed => ErrorKind::WarehouseConnectionFailed,
                    ErrorKind::SourceQueryFailed => ErrorKind::WarehouseQueryFailed,
                    ErrorKind::SourceIoError => ErrorKind::WarehouseIoError,
                    other => other,
                };

                self
            }
            ErrorRepr::Many { errors, location } => LoadError {
                repr: ErrorRepr::Many {
                    errors: errors
                        .into_iter()
                        .map(LoadError::into_warehouse_error)
                        .collect(),
                    location,
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bail, load_error};

    #[test]
    fn single_error_exposes_kind_description_and_detail() {
        let err = load_error!(
            ErrorKind::DimensionMemberMissing,
            "Dimension member not found",
            "city = Rotterdam"
        );

        assert_eq!(err.kind(), ErrorKind::DimensionMemberMissing);
        assert_eq!(err.description(), Some("Dimension member not found"));
        assert_eq!(err.detail(), Some("city = Rotterdam"));
        assert!(err.errors().is_none());
    }

    #[test]
    fn aggregation_of_one_error_is_unwrapped() {
        let err: LoadError = vec![load_error!(ErrorKind::InvalidState, "bad state")].into();

        assert!(err.errors().is_none());
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn aggregation_keeps_all_kinds_in_order() {
        let err: LoadError = vec![
            load_error!(ErrorKind::DimensionMemberMissing, "missing"),
            load_error!(ErrorKind::WarehouseIoError, "close failed"),
        ]
        .into();

        assert_eq!(
            err.kinds(),
            vec![ErrorKind::DimensionMemberMissing, ErrorKind::WarehouseIoError]
        );
        assert_eq!(err.kind(), ErrorKind::DimensionMemberMissing);
        assert!(err.to_string().starts_with("[Many] 2 errors aggregated"));
    }

    #[test]
    fn display_contains_kind_and_detail() {
        let err = load_error!(ErrorKind::ConfigError, "Invalid config", "port is zero");
        let rendered = err.to_string();

        assert!(rendered.starts_with("[ConfigError] Invalid config @"));
        assert!(rendered.contains("Detail:\n    port is zero"));
    }

    #[test]
    fn bail_returns_error() {
        fn failing() -> LoadResult<()> {
            bail!(ErrorKind::InvalidState, "Pipeline already started");
        }

        assert_eq!(failing().unwrap_err().kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn source_kinds_are_reclassified_for_warehouses() {
        let err = load_error!(ErrorKind::SourceQueryFailed, "query failed").into_warehouse_error();
        assert_eq!(err.kind(), ErrorKind::WarehouseQueryFailed);

        let err = load_error!(ErrorKind::InvalidData, "bad").into_warehouse_error();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn io_errors_keep_their_source() {
        let err: LoadError = std::io::Error::other("disk gone").into();

        assert_eq!(err.kind(), ErrorKind::IoError);
        assert!(error::Error::source(&err).is_some());
        assert_eq!(err.detail(), Some("disk gone"));
    }
}
