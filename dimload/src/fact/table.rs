use tracing::{debug, info};

use crate::bail;
use crate::error::{ErrorKind, LoadResult};
use crate::types::{AttributeRow, ColumnSchema, Predicate, TableName, TableRow, TableSchema, Value};
use crate::warehouse::Warehouse;

/// Definition of a fact table: dimension key references followed by measures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactSpec {
    pub table: TableName,
    pub keyrefs: Vec<ColumnSchema>,
    pub measures: Vec<ColumnSchema>,
    /// Fails [`FactTable::ensure`] when a stored fact has different measures.
    pub compare_measures: bool,
}

impl FactSpec {
    pub fn new(table: TableName, keyrefs: Vec<ColumnSchema>, measures: Vec<ColumnSchema>) -> Self {
        Self {
            table,
            keyrefs,
            measures,
            compare_measures: false,
        }
    }

    pub fn with_measure_comparison(mut self, compare_measures: bool) -> Self {
        self.compare_measures = compare_measures;
        self
    }

    pub fn table_schema(&self) -> TableSchema {
        TableSchema::new(
            self.table.clone(),
            self.keyrefs
                .iter()
                .chain(self.measures.iter())
                .cloned()
                .collect(),
        )
    }

    pub fn validate(&self) -> LoadResult<()> {
        if self.keyrefs.is_empty() {
            bail!(
                ErrorKind::ConfigError,
                "Fact table has no key references",
                format!("fact table {} needs at least one key reference", self.table)
            );
        }

        Ok(())
    }
}

/// Outcome of [`FactTable::ensure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactWrite {
    Inserted,
    /// A fact with the same key references already existed.
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FactStats {
    pub inserted: u64,
    pub skipped: u64,
}

/// Appends facts to a durable fact table.
#[derive(Debug)]
pub struct FactTable<W> {
    spec: FactSpec,
    warehouse: W,
    prepared: bool,
    stats: FactStats,
}

impl<W> FactTable<W>
where
    W: Warehouse,
{
    pub fn new(spec: FactSpec, warehouse: W) -> LoadResult<Self> {
        spec.validate()?;

        Ok(Self {
            spec,
            warehouse,
            prepared: false,
            stats: FactStats::default(),
        })
    }

    pub fn spec(&self) -> &FactSpec {
        &self.spec
    }

    pub fn stats(&self) -> FactStats {
        self.stats
    }

    /// Creates the durable table if needed.
    pub async fn prepare(&mut self) -> LoadResult<()> {
        if self.prepared {
            return Ok(());
        }

        let created = self
            .warehouse
            .create_table(&self.spec.table_schema())
            .await?;
        info!(table = %self.spec.table, created, "prepared fact table");

        self.prepared = true;

        Ok(())
    }

    /// Appends the fact of `row` without checking for an existing one.
    pub async fn insert(&mut self, row: &AttributeRow) -> LoadResult<()> {
        self.prepare().await?;

        let keys = self.key_values(row)?;
        let measures = coerce_columns(&self.spec.measures, row)?;

        let mut values = keys;
        values.extend(measures);
        self.warehouse
            .insert(&self.spec.table, TableRow::new(values))
            .await?;
        self.stats.inserted += 1;

        Ok(())
    }

    /// Returns the stored fact with the key references of `row`, if any.
    pub async fn lookup(&mut self, row: &AttributeRow) -> LoadResult<Option<TableRow>> {
        self.prepare().await?;

        let keys = self.key_values(row)?;
        let predicate = Predicate::from_pairs(
            self.spec
                .keyrefs
                .iter()
                .map(|keyref| keyref.name.clone())
                .zip(keys),
        );

        let rows = self.warehouse.select(&self.spec.table, &predicate).await?;

        Ok(rows.into_iter().next())
    }

    /// Inserts the fact of `row` unless a fact with the same key references exists.
    pub async fn ensure(&mut self, row: &AttributeRow) -> LoadResult<FactWrite> {
        let Some(existing) = self.lookup(row).await? else {
            self.insert(row).await?;
            return Ok(FactWrite::Inserted);
        };

        if self.spec.compare_measures {
            let measures = coerce_columns(&self.spec.measures, row)?;
            let stored = existing.values.get(self.spec.keyrefs.len()..).unwrap_or_default();

            if stored != measures.as_slice() {
                bail!(
                    ErrorKind::FactMeasureMismatch,
                    "Existing fact has different measures",
                    format!(
                        "fact table {} stores {} for {row}",
                        self.spec.table,
                        render_values(stored)
                    )
                );
            }
        }

        debug!(table = %self.spec.table, "fact already present, skipping");
        self.stats.skipped += 1;

        Ok(FactWrite::Skipped)
    }

    fn key_values(&self, row: &AttributeRow) -> LoadResult<Vec<Value>> {
        coerce_columns(&self.spec.keyrefs, row)
    }
}

fn coerce_columns(columns: &[ColumnSchema], row: &AttributeRow) -> LoadResult<Vec<Value>> {
    columns
        .iter()
        .map(|column| column.coerce(row.require(&column.name)?.clone()))
        .collect()
}

fn render_values(values: &[Value]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
