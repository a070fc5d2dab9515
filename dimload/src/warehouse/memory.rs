use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::bail;
use crate::error::{ErrorKind, LoadResult};
use crate::types::{Predicate, TableName, TableRow, TableSchema, Value};
use crate::warehouse::Warehouse;

#[derive(Debug, Default)]
struct Inner {
    schemas: HashMap<TableName, TableSchema>,
    committed: HashMap<TableName, Vec<TableRow>>,
    working: HashMap<TableName, Vec<TableRow>>,
    select_count: u64,
    commit_count: u64,
}

impl Inner {
    fn schema(&self, table: &TableName) -> LoadResult<&TableSchema> {
        match self.schemas.get(table) {
            Some(schema) => Ok(schema),
            None => bail!(
                ErrorKind::WarehouseTableMissing,
                "Table does not exist in the warehouse",
                format!("table {table} has not been created")
            ),
        }
    }

    fn matching_indices(&self, schema: &TableSchema, predicate: &Predicate) -> LoadResult<Vec<usize>> {
        let mut columns = Vec::with_capacity(predicate.equalities().len());
        for (column, value) in predicate.equalities() {
            columns.push((schema.require_column_index(column)?, value));
        }

        let rows = self
            .working
            .get(&schema.name)
            .map(Vec::as_slice)
            .unwrap_or_default();

        Ok(rows
            .iter()
            .enumerate()
            .filter(|(_, row)| {
                columns
                    .iter()
                    .all(|(index, value)| row.get(*index) == Some(*value))
            })
            .map(|(index, _)| index)
            .collect())
    }
}

/// In-memory warehouse for tests and local runs.
///
/// [`MemoryWarehouse`] keeps a working copy of every table next to the last committed copy.
/// Reads and writes operate on the working copy, [`Warehouse::commit`] publishes it and
/// [`Warehouse::close`] without a commit rolls it back. Table definitions are applied
/// immediately. Clones share the same storage.
#[derive(Debug, Clone)]
pub struct MemoryWarehouse {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryWarehouse {
    /// Creates a new empty memory warehouse.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Returns a copy of the working rows of `table`, including uncommitted writes.
    pub async fn rows(&self, table: &TableName) -> Vec<TableRow> {
        let inner = self.inner.lock().await;
        inner.working.get(table).cloned().unwrap_or_default()
    }

    /// Returns a copy of the committed rows of `table`.
    pub async fn committed_rows(&self, table: &TableName) -> Vec<TableRow> {
        let inner = self.inner.lock().await;
        inner.committed.get(table).cloned().unwrap_or_default()
    }

    /// Returns the number of selects served since creation.
    pub async fn select_count(&self) -> u64 {
        self.inner.lock().await.select_count
    }

    /// Returns the number of commits performed since creation.
    pub async fn commit_count(&self) -> u64 {
        self.inner.lock().await.commit_count
    }
}

impl Default for MemoryWarehouse {
    fn default() -> Self {
        Self::new()
    }
}

impl Warehouse for MemoryWarehouse {
    fn name() -> &'static str {
        "memory"
    }

    async fn create_table(&self, schema: &TableSchema) -> LoadResult<bool> {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.schemas.get(&schema.name) {
            if existing != schema {
                bail!(
                    ErrorKind::InvalidData,
                    "Table already exists with a different schema",
                    format!("table {} columns do not match", schema.name)
                );
            }

            return Ok(false);
        }

        info!(table = %schema.name, "creating table");

        inner.schemas.insert(schema.name.clone(), schema.clone());
        inner.committed.entry(schema.name.clone()).or_default();
        inner.working.entry(schema.name.clone()).or_default();

        Ok(true)
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
            .working
            .entry(table.clone())
            .or_default()
            .push(TableRow::new(values));

        Ok(())
    }

    async fn select(&self, table: &TableName, predicate: &Predicate) -> LoadResult<Vec<TableRow>> {
        let mut inner = self.inner.lock().await;
        inner.select_count += 1;

        let schema = inner.schema(table)?;
        let indices = inner.matching_indices(schema, predicate)?;

        debug!(%table, %predicate, matches = indices.len(), "select");

        let rows = inner.working.get(table).map(Vec::as_slice).unwrap_or_default();
        Ok(indices.into_iter().map(|index| rows[index].clone()).collect())
    }

    async fn update(
        &self,
        table: &TableName,
        predicate: &Predicate,
        assignments: &[(String, Value)],
    ) -> LoadResult<u64> {
        let mut inner = self.inner.lock().await;
        let schema = inner.schema(table)?;

        let mut coerced = Vec::with_capacity(assignments.len());
        for (column, value) in assignments {
            let index = schema.require_column_index(column)?;
            coerced.push((index, schema.columns[index].coerce(value.clone())?));
        }

        let indices = inner.matching_indices(schema, predicate)?;
        let rows = inner.working.entry(table.clone()).or_default();
        for index in &indices {
            for (column, value) in &coerced {
                rows[*index].values[*column] = value.clone();
            }
        }

        Ok(indices.len() as u64)
    }

    async fn max_integer(&self, table: &TableName, column: &str) -> LoadResult<Option<i64>> {
        let inner = self.inner.lock().await;
        let index = inner.schema(table)?.require_column_index(column)?;

        Ok(inner
            .working
            .get(table)
            .into_iter()
            .flatten()
            .filter_map(|row| row.get(index).and_then(Value::as_int))
            .max())
    }

    async fn commit(&self) -> LoadResult<()> {
        let mut inner = self.inner.lock().await;

        inner.committed = inner.working.clone();
        inner.commit_count += 1;

        info!("committed memory warehouse");

        Ok(())
    }

    async fn close(&self) -> LoadResult<()> {
        let mut inner = self.inner.lock().await;

        if inner.working != inner.committed {
            info!("discarding uncommitted writes in memory warehouse");
            inner.working = inner.committed.clone();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnSchema, ColumnType};

    fn location_schema() -> TableSchema {
        TableSchema::new(
            TableName::new("project", "dataset", "location"),
            vec![
                ColumnSchema::required("locationid", ColumnType::Integer),
                ColumnSchema::required("city", ColumnType::String),
                ColumnSchema::nullable("region", ColumnType::String),
            ],
        )
    }

    fn location(id: i64, city: &str, region: &str) -> TableRow {
        TableRow::new(vec![id.into(), city.into(), region.into()])
    }

    #[tokio::test]
    async fn create_table_is_idempotent() {
        let warehouse = MemoryWarehouse::new();
        let schema = location_schema();

        assert!(warehouse.create_table(&schema).await.unwrap());
        assert!(!warehouse.create_table(&schema).await.unwrap());
    }

    #[tokio::test]
    async fn missing_table_is_reported() {
        let warehouse = MemoryWarehouse::new();
        let err = warehouse
            .select(&location_schema().name, &Predicate::all())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::WarehouseTableMissing);
    }

    #[tokio::test]
    async fn select_update_and_max() {
        let warehouse = MemoryWarehouse::new();
        let schema = location_schema();
        warehouse.create_table(&schema).await.unwrap();

        warehouse
            .insert(&schema.name, location(1, "Utrecht", "Midden"))
            .await
            .unwrap();
        warehouse
            .insert(&schema.name, location(2, "Amsterdam", "Noord"))
            .await
            .unwrap();

        let rows = warehouse
            .select(&schema.name, &Predicate::eq("city", "Utrecht"))
            .await
            .unwrap();
        assert_eq!(rows, vec![location(1, "Utrecht", "Midden")]);

        let updated = warehouse
            .update(
                &schema.name,
                &Predicate::eq("locationid", 2i64),
                &[("region".to_owned(), Value::from("Noord-Holland"))],
            )
            .await
            .unwrap();
        assert_eq!(updated, 1);

        assert_eq!(
            warehouse.max_integer(&schema.name, "locationid").await.unwrap(),
            Some(2)
        );
    }

    #[tokio::test]
    async fn close_without_commit_discards_writes() {
        let warehouse = MemoryWarehouse::new();
        let schema = location_schema();
        warehouse.create_table(&schema).await.unwrap();

        warehouse
            .insert(&schema.name, location(1, "Utrecht", "Midden"))
            .await
            .unwrap();
        warehouse.commit().await.unwrap();

        warehouse
            .insert(&schema.name, location(2, "Amsterdam", "Noord"))
            .await
            .unwrap();
        assert_eq!(warehouse.rows(&schema.name).await.len(), 2);

        warehouse.close().await.unwrap();

        assert_eq!(warehouse.rows(&schema.name).await.len(), 1);
        assert_eq!(warehouse.committed_rows(&schema.name).await.len(), 1);
    }

    #[tokio::test]
    async fn insert_coerces_and_validates() {
        let warehouse = MemoryWarehouse::new();
        let schema = location_schema();
        warehouse.create_table(&schema).await.unwrap();

        warehouse
            .insert(
                &schema.name,
                TableRow::new(vec!["7".into(), "Utrecht".into(), Value::Null]),
            )
            .await
            .unwrap();
        assert_eq!(
            warehouse.rows(&schema.name).await[0].values[0],
            Value::Int(7)
        );

        let err = warehouse
            .insert(&schema.name, TableRow::new(vec![Value::Int(8)]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
