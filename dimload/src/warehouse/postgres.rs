use dimload_config::shared::PgConnectionConfig;
use pg_escape::quote_identifier;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info, warn};

use crate::conversions::{postgres_type_name, sql_literal, value_from_row};
use crate::error::{LoadError, LoadResult};
use crate::types::{Predicate, TableName, TableRow, TableSchema, Value};
use crate::warehouse::Warehouse;

#[derive(Debug)]
struct Inner {
    client: Client,
    connection: Option<JoinHandle<()>>,
    in_transaction: bool,
}

impl Inner {
    async fn begin_if_needed(&mut self) -> LoadResult<()> {
        if !self.in_transaction {
            self.client
                .batch_execute("begin")
                .await
                .map_err(warehouse_error)?;
            self.in_transaction = true;
        }

        Ok(())
    }
}

/// Warehouse storing tables in a Postgres database.
///
/// The dataset of a [`TableName`] is used as schema; the project is informational since the
/// connection already selects the database. All writes of a run share one transaction that
/// is opened by the first statement and finished by [`Warehouse::commit`], or rolled back
/// by [`Warehouse::close`].
#[derive(Debug, Clone)]
pub struct PostgresWarehouse {
    inner: Arc<Mutex<Inner>>,
}

impl PostgresWarehouse {
    pub async fn connect(config: &PgConnectionConfig) -> LoadResult<Self> {
        let (client, connection) = config
            .with_db()
            .connect(NoTls)
            .await
            .map_err(warehouse_error)?;

        let connection = tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(error = %err, "warehouse connection terminated with an error");
            }
        });

        info!(host = %config.host, dbname = %config.name, "connected to postgres warehouse");

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                client,
                connection: Some(connection),
                in_transaction: false,
            })),
        })
    }

    async fn query(&self, sql: &str) -> LoadResult<Vec<tokio_postgres::Row>> {
        debug!(%sql, "executing warehouse query");

        let mut inner = self.inner.lock().await;
        inner.begin_if_needed().await?;

        inner.client.query(sql, &[]).await.map_err(warehouse_error)
    }

    async fn execute(&self, sql: &str) -> LoadResult<u64> {
        debug!(%sql, "executing warehouse statement");

        let mut inner = self.inner.lock().await;
        inner.begin_if_needed().await?;

        inner.client.execute(sql, &[]).await.map_err(warehouse_error)
    }
}

impl Warehouse for PostgresWarehouse {
    fn name() -> &'static str {
        "postgres"
    }

    async fn create_table(&self, schema: &TableSchema) -> LoadResult<bool> {
        let exists = self
            .query(&format!(
                "select 1 from information_schema.tables where table_schema = {} and table_name = {}",
                sql_literal(&Value::from(schema.name.dataset.as_str())),
                sql_literal(&Value::from(schema.name.table.as_str())),
            ))
            .await?;
        if !exists.is_empty() {
            return Ok(false);
        }

        let columns = schema
            .columns
            .iter()
            .map(|column| {
                let nullability = if column.nullable { "" } else { " not null" };
                format!(
                    "{} {}{nullability}",
                    quote_identifier(&column.name),
                    postgres_type_name(column.typ)
                )
            })
            .collect::<Vec<_>>()
            .join(", ");

        self.execute(&format!(
            "create schema if not exists {}",
            quote_identifier(&schema.name.dataset)
        ))
        .await?;
        self.execute(&format!(
            "create table {} ({columns})",
            qualified_name(&schema.name)
        ))
        .await?;

        info!(table = %schema.name, "created postgres table");

        Ok(true)
    }

    async fn insert(&self, table: &TableName, row: TableRow) -> LoadResult<()> {
        let values = row
            .values
            .iter()
            .map(sql_literal)
            .collect::<Vec<_>>()
            .join(", ");

        self.execute(&format!(
            "insert into {} values ({values})",
            qualified_name(table)
        ))
        .await?;

        Ok(())
    }

    async fn select(&self, table: &TableName, predicate: &Predicate) -> LoadResult<Vec<TableRow>> {
        let rows = self
            .query(&format!(
                "select * from {}{} order by 1",
                qualified_name(table),
                where_clause(predicate)
            ))
            .await?;

        rows.iter()
            .map(|row| {
                (0..row.len())
                    .map(|index| value_from_row(row, index))
                    .collect::<LoadResult<Vec<_>>>()
                    .map(TableRow::new)
            })
            .collect()
    }

    async fn update(
        &self,
        table: &TableName,
        predicate: &Predicate,
        assignments: &[(String, Value)],
    ) -> LoadResult<u64> {
        let assignments = assignments
            .iter()
            .map(|(column, value)| format!("{} = {}", quote_identifier(column), sql_literal(value)))
            .collect::<Vec<_>>()
            .join(", ");

        self.execute(&format!(
            "update {} set {assignments}{}",
            qualified_name(table),
            where_clause(predicate)
        ))
        .await
    }

    async fn max_integer(&self, table: &TableName, column: &str) -> LoadResult<Option<i64>> {
        let rows = self
            .query(&format!(
                "select max({})::bigint from {}",
                quote_identifier(column),
                qualified_name(table)
            ))
            .await?;

        match rows.first() {
            Some(row) => Ok(value_from_row(row, 0)?.as_int()),
            None => Ok(None),
        }
    }

    async fn commit(&self) -> LoadResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.in_transaction {
            inner
                .client
                .batch_execute("commit")
                .await
                .map_err(warehouse_error)?;
            inner.in_transaction = false;
        }

        info!("committed postgres warehouse");

        Ok(())
    }

    async fn close(&self) -> LoadResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.in_transaction {
            warn!("rolling back uncommitted writes in postgres warehouse");
            inner
                .client
                .batch_execute("rollback")
                .await
                .map_err(warehouse_error)?;
            inner.in_transaction = false;
        }

        if let Some(connection) = inner.connection.take() {
            connection.abort();
        }

        Ok(())
    }
}

fn qualified_name(table: &TableName) -> String {
    format!(
        "{}.{}",
        quote_identifier(&table.dataset),
        quote_identifier(&table.table)
    )
}

fn where_clause(predicate: &Predicate) -> String {
    if predicate.is_empty() {
        return String::new();
    }

    let conditions = predicate
        .equalities()
        .iter()
        .map(|(column, value)| match value {
            Value::Null => format!("{} is null", quote_identifier(column)),
            value => format!("{} = {}", quote_identifier(column), sql_literal(value)),
        })
        .collect::<Vec<_>>()
        .join(" and ");

    format!(" where {conditions}")
}

fn warehouse_error(err: tokio_postgres::Error) -> LoadError {
    LoadError::from(err).into_warehouse_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn where_clause_renders_nulls_and_literals() {
        let predicate = Predicate::eq("city", "Den Haag").and("region", Value::Null);

        assert_eq!(
            where_clause(&predicate),
            " where city = 'Den Haag' and region is null"
        );
        assert_eq!(where_clause(&Predicate::all()), "");
    }

    #[test]
    fn qualified_names_use_the_dataset_as_schema() {
        let table = TableName::new("sales", "pygrametl", "facttable");
        assert_eq!(qualified_name(&table), "pygrametl.facttable");
    }
}
