use secrecy::SecretString;
use serde::Deserialize;

use crate::shared::{PgConnectionConfig, ValidationError};

/// Warehouse the dimension and fact tables are written to.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WarehouseConfig {
    /// In-memory warehouse, discarded when the process exits.
    Memory {
        #[serde(default = "default_project_id")]
        project_id: String,
        #[serde(default = "default_dataset")]
        dataset: String,
    },
    /// Postgres database, tables live in the schema named by `dataset`.
    Postgres {
        project_id: String,
        dataset: String,
        connection: PgConnectionConfig,
    },
    /// BigQuery dataset.
    #[serde(rename = "bigquery")]
    BigQuery {
        project_id: String,
        dataset: String,
        service_account_key: SecretString,
    },
}

fn default_project_id() -> String {
    "local".to_owned()
}

fn default_dataset() -> String {
    "dimload".to_owned()
}

impl WarehouseConfig {
    pub fn project_id(&self) -> &str {
        match self {
            WarehouseConfig::Memory { project_id, .. }
            | WarehouseConfig::Postgres { project_id, .. }
            | WarehouseConfig::BigQuery { project_id, .. } => project_id,
        }
    }

    pub fn dataset(&self) -> &str {
        match self {
            WarehouseConfig::Memory { dataset, .. }
            | WarehouseConfig::Postgres { dataset, .. }
            | WarehouseConfig::BigQuery { dataset, .. } => dataset,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.project_id().is_empty() {
            return Err(ValidationError::EmptyField("warehouse.project_id"));
        }
        if self.dataset().is_empty() {
            return Err(ValidationError::EmptyField("warehouse.dataset"));
        }
        if let WarehouseConfig::Postgres { connection, .. } = self {
            connection.validate()?;
        }

        Ok(())
    }
}
