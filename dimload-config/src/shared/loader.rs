use serde::Deserialize;

use crate::Config;
use crate::shared::{PgConnectionConfig, ValidationError, WarehouseConfig};

/// Dimensions that may be primed from a file before loading.
const PRIMABLE_DIMENSIONS: &[&str] = &["book", "location", "time"];

/// Configuration of a loader run.
#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    pub source: SourceConfig,
    pub warehouse: WarehouseConfig,
    /// Reference dimensions filled from delimited files before streaming starts.
    #[serde(default)]
    pub priming: Vec<PrimingConfig>,
    #[serde(default)]
    pub key_strategy: KeyStrategyConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config for LoaderConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["source.names"];
}

impl LoaderConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.source.validate()?;
        self.warehouse.validate()?;
        for priming in &self.priming {
            priming.validate()?;
        }
        self.retry.validate()
    }
}

/// Operational database and the query producing the sales rows.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub connection: PgConnectionConfig,
    #[serde(default = "default_query")]
    pub query: String,
    /// Names given to the result columns, in order.
    #[serde(default = "default_names")]
    pub names: Vec<String>,
}

fn default_query() -> String {
    "select book as title, genre, store, date, sale from sale".to_owned()
}

fn default_names() -> Vec<String> {
    ["title", "genre", "city", "date", "sale"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

impl SourceConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.connection.validate()?;
        if self.query.trim().is_empty() {
            return Err(ValidationError::EmptyField("source.query"));
        }
        if self.names.is_empty() {
            return Err(ValidationError::EmptyField("source.names"));
        }

        Ok(())
    }
}

/// A delimited file inserted into a dimension before loading.
#[derive(Debug, Clone, Deserialize)]
pub struct PrimingConfig {
    pub dimension: String,
    pub path: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

fn default_delimiter() -> String {
    ",".to_owned()
}

impl PrimingConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !PRIMABLE_DIMENSIONS.contains(&self.dimension.as_str()) {
            return Err(ValidationError::UnknownPrimingDimension(
                self.dimension.clone(),
            ));
        }
        if self.path.is_empty() {
            return Err(ValidationError::EmptyField("priming.path"));
        }
        self.delimiter_byte().map(|_| ())
    }

    /// Returns the delimiter as a single byte.
    pub fn delimiter_byte(&self) -> Result<u8, ValidationError> {
        match self.delimiter.as_bytes() {
            [byte] if byte.is_ascii() => Ok(*byte),
            _ => Err(ValidationError::InvalidDelimiter(self.delimiter.clone())),
        }
    }
}

/// How dimension and fact keys are produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategyConfig {
    /// Integer surrogate keys generated from a sequence.
    #[default]
    Sequence,
    /// SHA-256 keys derived from the natural key attributes.
    Hash,
}

/// Retry policy for transient warehouse failures.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_factor() -> u32 {
    2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::ZeroValue("retry.max_attempts"));
        }
        if self.backoff_factor < 1 {
            return Err(ValidationError::InvalidBackoffFactor(self.backoff_factor));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(ValidationError::InvalidRetryDelays {
                initial: self.initial_delay_ms,
                max: self.max_delay_ms,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LoaderConfig {
        serde_json::from_str(
            r#"{
                "source": {
                    "connection": {"host": "localhost", "dbname": "sales", "user": "loader"}
                },
                "warehouse": {"kind": "memory"},
                "priming": [{"dimension": "location", "path": "region.csv"}],
                "key_strategy": "hash"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn defaults_match_the_sales_source() {
        let config = sample();

        assert_eq!(config.source.names, vec!["title", "genre", "city", "date", "sale"]);
        assert_eq!(config.key_strategy, KeyStrategyConfig::Hash);
        assert_eq!(config.priming[0].delimiter_byte().unwrap(), b',');
        assert_eq!(config.warehouse.dataset(), "dimload");
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_empty_names_and_queries() {
        let mut config = sample();
        config.source.names.clear();
        assert_eq!(
            config.validate(),
            Err(ValidationError::EmptyField("source.names"))
        );

        let mut config = sample();
        config.source.query = "  ".to_owned();
        assert_eq!(
            config.validate(),
            Err(ValidationError::EmptyField("source.query"))
        );
    }

    #[test]
    fn rejects_invalid_retry_policies() {
        let mut config = sample();
        config.retry.max_attempts = 0;
        assert_eq!(
            config.validate(),
            Err(ValidationError::ZeroValue("retry.max_attempts"))
        );

        let mut config = sample();
        config.retry.backoff_factor = 0;
        assert_eq!(
            config.validate(),
            Err(ValidationError::InvalidBackoffFactor(0))
        );
    }

    #[test]
    fn rejects_unknown_priming_targets_and_delimiters() {
        let mut config = sample();
        config.priming[0].dimension = "store".to_owned();
        assert_eq!(
            config.validate(),
            Err(ValidationError::UnknownPrimingDimension("store".to_owned()))
        );

        let mut config = sample();
        config.priming[0].delimiter = ";;".to_owned();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidDelimiter(_))
        ));
    }
}
