use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio_postgres::Config as TokioPgConnectOptions;

use crate::Config;
use crate::shared::ValidationError;

/// Application name reported to Postgres by loader connections.
const APP_NAME_LOADER: &str = "dimload";

/// Postgres connection settings of the operational source.
#[derive(Debug, Clone, Deserialize)]
pub struct PgConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(alias = "dbname")]
    pub name: String,
    #[serde(alias = "user")]
    pub username: String,
    #[serde(default)]
    pub password: Option<SecretString>,
}

fn default_port() -> u16 {
    5432
}

impl Config for PgConnectionConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

impl PgConnectionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.host.is_empty() {
            return Err(ValidationError::EmptyField("host"));
        }
        if self.port == 0 {
            return Err(ValidationError::ZeroValue("port"));
        }
        if self.name.is_empty() {
            return Err(ValidationError::EmptyField("dbname"));
        }
        if self.username.is_empty() {
            return Err(ValidationError::EmptyField("user"));
        }

        Ok(())
    }

    /// Builds [`tokio_postgres::Config`] connection options for the configured database.
    pub fn with_db(&self) -> TokioPgConnectOptions {
        let mut config = TokioPgConnectOptions::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.username)
            .dbname(&self.name)
            .application_name(APP_NAME_LOADER);

        if let Some(password) = &self.password {
            config.password(password.expose_secret());
        }

        config
    }
}
