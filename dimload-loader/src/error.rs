use dimload::error::LoadError;
use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

/// Returns whether terminal output should include backtraces.
fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

/// Result type for loader operations.
pub type LoaderResult<T> = Result<T, LoaderError>;

/// Captured backtrace wrapper to avoid thiserror's unstable feature detection.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    /// Captures a new backtrace for an error variant.
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type for the loader binary.
///
/// Wraps [`LoadError`] for failed loads and provides variants for startup errors.
#[derive(Debug)]
pub enum LoaderError {
    /// The load itself failed.
    Load(LoadError),
    /// Configuration could not be loaded or is invalid.
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    /// I/O error, for example while starting the runtime.
    Io(std::io::Error, CapturedBacktrace),
}

impl LoaderError {
    /// Returns a short category label for this error.
    pub fn category(&self) -> &'static str {
        match self {
            LoaderError::Load(_) => "load error",
            LoaderError::Config(_, _) => "configuration error",
            LoaderError::Io(_, _) => "i/o error",
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            LoaderError::Load(err) => err.backtrace(),
            LoaderError::Config(_, cb) => Some(&cb.0),
            LoaderError::Io(_, cb) => Some(&cb.0),
        }
    }

    /// Creates a configuration error from any error.
    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        LoaderError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Returns a user-oriented report for terminal output.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("loader failed\n");
        out.push_str(&format!("category: {}\n", self.category()));
        out.push_str(&format!("error: {self}\n"));

        // Aggregated load errors already list every error in their display form.
        if !matches!(self, LoaderError::Load(err) if err.errors().is_some()) {
            let mut source = Error::source(self);
            let mut idx = 1usize;
            while let Some(err) = source {
                out.push_str(&format!("cause {idx}: {err}\n"));
                source = err.source();
                idx += 1;
            }
        }

        if should_render_backtrace()
            && let Some(backtrace) = self.backtrace()
        {
            out.push_str("backtrace:\n");
            out.push_str(&backtrace.to_string());
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }

        out
    }
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderError::Load(err) => write!(f, "{err}"),
            LoaderError::Config(source, _) => write!(f, "configuration error: {source}"),
            LoaderError::Io(source, _) => write!(f, "i/o error: {source}"),
        }
    }
}

impl Error for LoaderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LoaderError::Load(err) => err.source(),
            LoaderError::Config(source, _) => Some(source.as_ref()),
            LoaderError::Io(source, _) => Some(source),
        }
    }
}

impl From<std::io::Error> for LoaderError {
    fn from(err: std::io::Error) -> Self {
        LoaderError::Io(err, CapturedBacktrace::capture())
    }
}

impl From<LoadError> for LoaderError {
    fn from(err: LoadError) -> Self {
        LoaderError::Load(err)
    }
}

#[cfg(test)]
mod tests {
    use dimload::error::ErrorKind;

    use super::*;

    #[test]
    fn report_lists_category_and_causes() {
        let io = std::io::Error::other("disk unplugged");
        let err = LoaderError::from(io);

        let report = err.render_report();
        assert!(report.starts_with("loader failed\n"));
        assert!(report.contains("category: i/o error\n"));
        assert!(report.contains("cause 1: disk unplugged\n"));
    }

    #[test]
    fn load_errors_keep_their_kind() {
        let err = LoaderError::from(LoadError::from((
            ErrorKind::DimensionMemberMissing,
            "Row refers to a dimension member that does not exist",
        )));

        assert_eq!(err.category(), "load error");
        assert!(
            matches!(err, LoaderError::Load(ref err) if err.kind() == ErrorKind::DimensionMemberMissing)
        );
    }
}
