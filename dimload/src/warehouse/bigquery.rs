use chrono::NaiveDate;
use gcp_bigquery_client::client_builder::ClientBuilder;
use gcp_bigquery_client::yup_oauth2::parse_service_account_key;
use gcp_bigquery_client::{
    Client,
    error::BQError,
    model::{query_request::QueryRequest, query_response::ResultSet},
};
use std::collections::HashMap;
use std::sync::{Arc, Once};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bail;
use crate::error::{ErrorKind, LoadError, LoadResult};
use crate::load_error;
use crate::types::{
    ColumnSchema, ColumnType, DATE_FORMAT, Predicate, TableName, TableRow, TableSchema, Value,
};
use crate::warehouse::Warehouse;

/// Maximum number of rows sent in a single `insert` statement.
const MAX_ROWS_PER_INSERT: usize = 500;

static INIT_CRYPTO: Once = Once::new();

/// Installs the process-wide rustls crypto provider used by the BigQuery client.
fn install_crypto_provider() {
    INIT_CRYPTO.call_once(|| {
        // Another component may have installed a provider already, which is fine.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

/// Writes buffered for a table until commit.
#[derive(Debug, Default)]
struct PendingWrites {
    rows: Vec<TableRow>,
    /// Updates of rows that already exist remotely.
    updates: Vec<(Predicate, Vec<(String, Value)>)>,
}

struct Inner {
    client: Client,
    schemas: HashMap<TableName, TableSchema>,
    pending: HashMap<TableName, PendingWrites>,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("schemas", &self.schemas)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn schema(&self, table: &TableName) -> LoadResult<&TableSchema> {
        match self.schemas.get(table) {
            Some(schema) => Ok(schema),
            None => bail!(
                ErrorKind::WarehouseTableMissing,
                "Table is not known to the BigQuery warehouse",
                format!("table {table} has not been created in this run")
            ),
        }
    }

    async fn query(&self, project_id: &str, query: String) -> LoadResult<ResultSet> {
        debug!(%query, "executing bigquery query");

        let response = self
            .client
            .job()
            .query(project_id, QueryRequest::new(query))
            .await
            .map_err(bq_error_to_load_error)?;

        Ok(ResultSet::new_from_query_response(response))
    }
}

/// Warehouse storing tables in a BigQuery dataset.
///
/// BigQuery DML is not suited to single-row statements, so writes are buffered per table
/// and flushed as multi-row statements by [`Warehouse::commit`]. Reads combine the remote
/// table with the buffered writes. [`Warehouse::close`] without commit drops the buffer,
/// nothing reaches BigQuery in that case.
#[derive(Debug, Clone)]
pub struct BigQueryWarehouse {
    project_id: String,
    inner: Arc<Mutex<Inner>>,
}

impl BigQueryWarehouse {
    /// Creates a warehouse authenticated with a service account key in JSON form.
    pub async fn connect(project_id: String, service_account_key: &str) -> LoadResult<Self> {
        install_crypto_provider();

        let key = parse_service_account_key(service_account_key)
            .map_err(BQError::from)
            .map_err(bq_error_to_load_error)?;
        let client = ClientBuilder::new()
            .build_from_service_account_key(key, false)
            .await
            .map_err(bq_error_to_load_error)?;

        info!(%project_id, "connected to bigquery warehouse");

        Ok(Self {
            project_id,
            inner: Arc::new(Mutex::new(Inner {
                client,
                schemas: HashMap::new(),
                pending: HashMap::new(),
            })),
        })
    }

    fn full_table_name(&self, table: &TableName) -> LoadResult<String> {
        let project_id = sanitize_identifier(&self.project_id, "BigQuery project id")?;
        let dataset_id = sanitize_identifier(&table.dataset, "BigQuery dataset id")?;
        let table_id = sanitize_identifier(&table.table, "BigQuery table id")?;

        Ok(format!("`{project_id}.{dataset_id}.{table_id}`"))
    }

    async fn table_exists(&self, inner: &Inner, table: &TableName) -> LoadResult<bool> {
        let result = inner
            .client
            .table()
            .get(&self.project_id, &table.dataset, &table.table, None)
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(BQError::ResponseError { error }) if error.error.code == 404 => Ok(false),
            Err(err) => Err(bq_error_to_load_error(err)),
        }
    }
}

impl Warehouse for BigQueryWarehouse {
    fn name() -> &'static str {
        "bigquery"
    }

    async fn create_table(&self, schema: &TableSchema) -> LoadResult<bool> {
        let mut inner = self.inner.lock().await;

        let created = if self.table_exists(&inner, &schema.name).await? {
            false
        } else {
            let full_table_name = self.full_table_name(&schema.name)?;
            let columns = schema
                .columns
                .iter()
                .map(column_spec)
                .collect::<LoadResult<Vec<_>>>()?
                .join(", ");

            info!(%full_table_name, "creating table in bigquery");

            inner
                .query(
                    &self.project_id,
                    format!("create table if not exists {full_table_name} ({columns})"),
                )
                .await?;

            true
        };

        inner.schemas.insert(schema.name.clone(), schema.clone());

        Ok(created)
    }

    async fn insert(&self, table: &TableName, row: TableRow) -> LoadResult<()> {
        let mut inner = self.inner.lock().await;
        let schema = inner.schema(table)?;

        if row.values.len() != schema.columns.len() {
            bail!(
                ErrorKind::InvalidData,
                "Row does not match the table columns",
                format!(
                    "table {table} has {} columns, row has {} values",
                    schema.columns.len(),
                    row.values.len()
                )
            );
        }

        let values = schema
            .columns
            .iter()
            .zip(row.values)
            .map(|(column, value)| column.coerce(value))
            .collect::<LoadResult<Vec<_>>>()?;

        inner
            .pending
            .entry(table.clone())
            .or_default()
            .rows
            .push(TableRow::new(values));

        Ok(())
    }

    async fn select(&self, table: &TableName, predicate: &Predicate) -> LoadResult<Vec<TableRow>> {
        let inner = self.inner.lock().await;
        let schema = inner.schema(table)?.clone();

        let query = format!(
            "select * from {}{}{}",
            self.full_table_name(table)?,
            where_clause(&schema, predicate)?,
            order_clause(&schema)?
        );
        let mut results = inner.query(&self.project_id, query).await?;

        let mut rows = Vec::new();
        while results.next_row() {
            rows.push(read_row(&results, &schema)?);
        }

        if let Some(pending) = inner.pending.get(table) {
            for (update_predicate, assignments) in &pending.updates {
                for row in rows.iter_mut() {
                    if matches(&schema, row, update_predicate)? {
                        assign(&schema, row, assignments)?;
                    }
                }
            }

            for row in &pending.rows {
                if matches(&schema, row, predicate)? {
                    rows.push(row.clone());
                }
            }
        }

        Ok(rows)
    }

    async fn update(
        &self,
        table: &TableName,
        predicate: &Predicate,
        assignments: &[(String, Value)],
    ) -> LoadResult<u64> {
        let mut inner = self.inner.lock().await;
        let schema = inner.schema(table)?.clone();

        let query = format!(
            "select count(*) as matches from {}{}",
            self.full_table_name(table)?,
            where_clause(&schema, predicate)?
        );
        let mut results = inner.query(&self.project_id, query).await?;
        let mut remote = 0;
        if results.next_row() {
            remote = results
                .get_i64_by_name("matches")
                .map_err(bq_error_to_load_error)?
                .unwrap_or_default();
        }

        let pending = inner.pending.entry(table.clone()).or_default();
        let mut buffered = 0;
        for row in pending.rows.iter_mut() {
            if matches(&schema, row, predicate)? {
                assign(&schema, row, assignments)?;
                buffered += 1;
            }
        }

        if remote > 0 {
            pending
                .updates
                .push((predicate.clone(), assignments.to_vec()));
        }

        Ok(remote as u64 + buffered)
    }

    async fn max_integer(&self, table: &TableName, column: &str) -> LoadResult<Option<i64>> {
        let inner = self.inner.lock().await;
        let schema = inner.schema(table)?;
        let index = schema.require_column_index(column)?;

        let query = format!(
            "select max(`{}`) as max_value from {}",
            sanitize_identifier(column, "BigQuery column name")?,
            self.full_table_name(table)?
        );
        let mut results = inner.query(&self.project_id, query).await?;
        let mut max = None;
        if results.next_row() {
            max = results
                .get_i64_by_name("max_value")
                .map_err(bq_error_to_load_error)?;
        }

        let buffered = inner
            .pending
            .get(table)
            .into_iter()
            .flat_map(|pending| pending.rows.iter())
            .filter_map(|row| row.get(index).and_then(Value::as_int))
            .max();

        Ok(max.max(buffered))
    }

    async fn commit(&self) -> LoadResult<()> {
        let mut inner = self.inner.lock().await;
        let pending = std::mem::take(&mut inner.pending);

        for (table, writes) in pending {
            let full_table_name = self.full_table_name(&table)?;
            let schema = inner.schema(&table)?.clone();

            for chunk in writes.rows.chunks(MAX_ROWS_PER_INSERT) {
                let values = chunk
                    .iter()
                    .map(|row| {
                        let literals = row.values.iter().map(bigquery_literal).collect::<Vec<_>>();
                        format!("({})", literals.join(", "))
                    })
                    .collect::<Vec<_>>()
                    .join(", ");

                inner
                    .query(
                        &self.project_id,
                        format!("insert into {full_table_name} values {values}"),
                    )
                    .await?;
            }

            for (predicate, assignments) in &writes.updates {
                let assignments = assignments
                    .iter()
                    .map(|(column, value)| {
                        sanitize_identifier(column, "BigQuery column name")
                            .map(|column| format!("`{column}` = {}", bigquery_literal(value)))
                    })
                    .collect::<LoadResult<Vec<_>>>()?
                    .join(", ");

                inner
                    .query(
                        &self.project_id,
                        format!(
                            "update {full_table_name} set {assignments}{}",
                            where_clause(&schema, predicate)?
                        ),
                    )
                    .await?;
            }

            info!(
                %full_table_name,
                rows = writes.rows.len(),
                updates = writes.updates.len(),
                "flushed buffered writes to bigquery"
            );
        }

        Ok(())
    }

    async fn close(&self) -> LoadResult<()> {
        let mut inner = self.inner.lock().await;

        let buffered: usize = inner
            .pending
            .values()
            .map(|pending| pending.rows.len() + pending.updates.len())
            .sum();
        if buffered > 0 {
            warn!(buffered, "discarding uncommitted bigquery writes");
        }
        inner.pending.clear();

        Ok(())
    }
}

/// Escapes a BigQuery identifier for backtick quoting.
fn sanitize_identifier(identifier: &str, context: &str) -> LoadResult<String> {
    if identifier.is_empty() {
        bail!(
            ErrorKind::WarehouseTableNameInvalid,
            "Invalid BigQuery identifier",
            format!("{context} cannot be empty")
        );
    }

    if identifier.chars().any(char::is_control) {
        bail!(
            ErrorKind::WarehouseTableNameInvalid,
            "Invalid BigQuery identifier",
            format!("{context} contains control characters")
        );
    }

    let mut escaped = String::with_capacity(identifier.len());
    for ch in identifier.chars() {
        match ch {
            '`' => escaped.push_str("\\`"),
            '\\' => escaped.push_str("\\\\"),
            _ => escaped.push(ch),
        }
    }

    Ok(escaped)
}

fn column_spec(column: &ColumnSchema) -> LoadResult<String> {
    let name = sanitize_identifier(&column.name, "BigQuery column name")?;
    let typ = match column.typ {
        ColumnType::Integer => "int64",
        ColumnType::String => "string",
        ColumnType::Date => "date",
    };
    let nullability = if column.nullable { "" } else { " not null" };

    Ok(format!("`{name}` {typ}{nullability}"))
}

fn bigquery_literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::Int(value) => value.to_string(),
        Value::String(value) => {
            let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
            format!("'{escaped}'")
        }
        Value::Date(value) => format!("date '{}'", value.format(DATE_FORMAT)),
    }
}

fn where_clause(schema: &TableSchema, predicate: &Predicate) -> LoadResult<String> {
    if predicate.is_empty() {
        return Ok(String::new());
    }

    let mut conditions = Vec::with_capacity(predicate.equalities().len());
    for (column, value) in predicate.equalities() {
        schema.require_column_index(column)?;
        let column = sanitize_identifier(column, "BigQuery column name")?;
        conditions.push(match value {
            Value::Null => format!("`{column}` is null"),
            value => format!("`{column}` = {}", bigquery_literal(value)),
        });
    }

    Ok(format!(" where {}", conditions.join(" and ")))
}

/// Orders rows by the key column so duplicate members resolve to the same row every time.
fn order_clause(schema: &TableSchema) -> LoadResult<String> {
    let Some(key) = schema.columns.first() else {
        return Ok(String::new());
    };

    let key = sanitize_identifier(&key.name, "BigQuery column name")?;
    Ok(format!(" order by `{key}`"))
}

fn read_row(results: &ResultSet, schema: &TableSchema) -> LoadResult<TableRow> {
    let mut values = Vec::with_capacity(schema.columns.len());
    for column in &schema.columns {
        let value = match column.typ {
            ColumnType::Integer => Value::from(
                results
                    .get_i64_by_name(&column.name)
                    .map_err(bq_error_to_load_error)?,
            ),
            ColumnType::String => Value::from(
                results
                    .get_string_by_name(&column.name)
                    .map_err(bq_error_to_load_error)?,
            ),
            ColumnType::Date => {
                let value = results
                    .get_string_by_name(&column.name)
                    .map_err(bq_error_to_load_error)?;
                match value {
                    Some(value) => Value::Date(NaiveDate::parse_from_str(&value, DATE_FORMAT)?),
                    None => Value::Null,
                }
            }
        };
        values.push(value);
    }

    Ok(TableRow::new(values))
}

fn matches(schema: &TableSchema, row: &TableRow, predicate: &Predicate) -> LoadResult<bool> {
    for (column, value) in predicate.equalities() {
        let index = schema.require_column_index(column)?;
        if row.get(index) != Some(value) {
            return Ok(false);
        }
    }

    Ok(true)
}

fn assign(schema: &TableSchema, row: &mut TableRow, assignments: &[(String, Value)]) -> LoadResult<()> {
    for (column, value) in assignments {
        let index = schema.require_column_index(column)?;
        row.values[index] = schema.columns[index].coerce(value.clone())?;
    }

    Ok(())
}

fn bq_error_to_load_error(err: BQError) -> LoadError {
    let (kind, description) = match &err {
        BQError::InvalidServiceAccountKey(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery service account key",
        ),
        BQError::InvalidServiceAccountAuthenticator(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery service account authenticator",
        ),
        BQError::AuthError(_) | BQError::YupAuthError(_) | BQError::NoToken => (
            ErrorKind::AuthenticationError,
            "BigQuery authentication error",
        ),
        BQError::RequestError(_) => (ErrorKind::WarehouseIoError, "BigQuery request failed"),
        BQError::ResponseError { .. } => {
            (ErrorKind::WarehouseQueryFailed, "BigQuery response error")
        }
        BQError::InvalidColumnIndex { .. } | BQError::InvalidColumnName { .. } => {
            (ErrorKind::InvalidData, "BigQuery result column not found")
        }
        BQError::InvalidColumnType { .. } => {
            (ErrorKind::ConversionError, "BigQuery column type mismatch")
        }
        _ => (ErrorKind::WarehouseQueryFailed, "BigQuery operation failed"),
    };

    load_error!(kind, description, err.to_string(), source: err)
}
