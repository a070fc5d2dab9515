use dimload_config::shared::PgConnectionConfig;
use futures::StreamExt;
use std::pin::Pin;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, RowStream};
use tracing::{error, info};

use crate::bail;
use crate::conversions::value_from_row;
use crate::error::{ErrorKind, LoadResult};
use crate::source::Source;
use crate::types::AttributeRow;

/// Source streaming the result of a Postgres query.
///
/// Result columns are renamed positionally to the declared names. Rows are fetched from the
/// server as they are consumed.
pub struct SqlSource {
    client: Option<Client>,
    connection: Option<JoinHandle<()>>,
    rows: Option<Pin<Box<RowStream>>>,
    names: Vec<String>,
    rows_read: u64,
}

impl SqlSource {
    /// Connects to the database and starts executing `query`.
    ///
    /// When `names` is empty, the column names of the result are used.
    pub async fn connect(
        config: &PgConnectionConfig,
        query: &str,
        names: Vec<String>,
    ) -> LoadResult<Self> {
        let (client, connection) = config.with_db().connect(NoTls).await?;

        let connection = tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(error = %err, "source connection terminated with an error");
            }
        });

        info!(host = %config.host, dbname = %config.name, "connected to source database");

        let rows = client.query_raw(query, Vec::<String>::new()).await?;

        Ok(Self {
            client: Some(client),
            connection: Some(connection),
            rows: Some(Box::pin(rows)),
            names,
            rows_read: 0,
        })
    }

    fn to_attribute_row(&mut self, row: &tokio_postgres::Row) -> LoadResult<AttributeRow> {
        if self.names.is_empty() {
            self.names = row
                .columns()
                .iter()
                .map(|column| column.name().to_owned())
                .collect();
        }

        if row.len() != self.names.len() {
            bail!(
                ErrorKind::InvalidData,
                "Query result does not match the declared column names",
                format!(
                    "query returned {} columns, {} names were declared",
                    row.len(),
                    self.names.len()
                )
            );
        }

        let mut attributes = AttributeRow::new();
        for (index, name) in self.names.iter().enumerate() {
            attributes.set(name.as_str(), value_from_row(row, index)?);
        }

        Ok(attributes)
    }
}

impl Source for SqlSource {
    async fn next_row(&mut self) -> LoadResult<Option<AttributeRow>> {
        let Some(rows) = self.rows.as_mut() else {
            return Ok(None);
        };

        let Some(row) = rows.next().await else {
            return Ok(None);
        };

        let row = self.to_attribute_row(&row?)?;
        self.rows_read += 1;

        Ok(Some(row))
    }

    async fn close(&mut self) -> LoadResult<()> {
        self.rows = None;
        drop(self.client.take());

        if let Some(connection) = self.connection.take()
            && let Err(err) = connection.await
        {
            bail!(
                ErrorKind::SourceConnectionFailed,
                "Source connection task failed",
                source: err
            );
        }

        info!(rows_read = self.rows_read, "closed source");

        Ok(())
    }
}
