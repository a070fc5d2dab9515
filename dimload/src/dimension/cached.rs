use std::collections::HashMap;
use std::collections::hash_map::Entry;
use tracing::{debug, info, warn};

use crate::bail;
use crate::dimension::{CachePolicy, DimensionSpec, KeyStrategy};
use crate::error::{ErrorKind, LoadResult};
use crate::types::{AttributeRow, Predicate, TableRow, Value};
use crate::warehouse::Warehouse;

/// Counters describing how a dimension was used during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DimensionStats {
    pub lookups: u64,
    pub cache_hits: u64,
    pub durable_selects: u64,
    pub inserted: u64,
    pub refreshed: u64,
}

/// A dimension member as known to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CachedMember {
    key: Value,
    /// Descriptive attributes, in dimension attribute order.
    attributes: Vec<Value>,
}

impl CachedMember {
    fn from_table_row(row: TableRow) -> LoadResult<Self> {
        let mut values = row.values.into_iter();
        let Some(key) = values.next() else {
            bail!(
                ErrorKind::InvalidData,
                "Dimension row has no key column"
            );
        };

        Ok(Self {
            key,
            attributes: values.collect(),
        })
    }
}

/// A dimension backed by a durable table and an in-memory cache.
///
/// The cache maps the lookup attribute tuple of a member to its key and last known
/// attributes. It is filled lazily on lookup misses or, with [`CachePolicy::Prefill`],
/// once when the dimension is prepared, and is kept in sync with every insert and refresh
/// done through this dimension. The dimension assumes it is the only writer of its table
/// during a run.
#[derive(Debug)]
pub struct CachedDimension<W> {
    spec: DimensionSpec,
    warehouse: W,
    cache: HashMap<Vec<Value>, CachedMember>,
    lookup_indices: Vec<usize>,
    next_key: i64,
    prepared: bool,
    stats: DimensionStats,
}

impl<W> CachedDimension<W>
where
    W: Warehouse,
{
    /// Creates a dimension writing through `warehouse`.
    pub fn new(spec: DimensionSpec, warehouse: W) -> LoadResult<Self> {
        spec.validate()?;

        let lookup_indices = spec
            .lookup_attributes
            .iter()
            .filter_map(|lookup| spec.attribute_index(lookup))
            .collect();

        Ok(Self {
            spec,
            warehouse,
            cache: HashMap::new(),
            lookup_indices,
            next_key: 1,
            prepared: false,
            stats: DimensionStats::default(),
        })
    }

    pub fn name(&self) -> &str {
        self.spec.name()
    }

    pub fn spec(&self) -> &DimensionSpec {
        &self.spec
    }

    /// Returns the attribute the resolved key is written to.
    pub fn key_attribute(&self) -> &str {
        &self.spec.key.name
    }

    pub fn stats(&self) -> DimensionStats {
        self.stats
    }

    /// Returns the number of cached members.
    pub fn cached_members(&self) -> usize {
        self.cache.len()
    }

    /// Creates the durable table if needed, seeds the key sequence and, with
    /// [`CachePolicy::Prefill`], loads every member into the cache.
    ///
    /// Preparing twice is a no-op.
    pub async fn prepare(&mut self) -> LoadResult<()> {
        if self.prepared {
            return Ok(());
        }

        let schema = self.spec.table_schema();
        self.warehouse.create_table(&schema).await?;

        if self.spec.key_strategy == KeyStrategy::Sequence {
            let max = self
                .warehouse
                .max_integer(&self.spec.table, &self.spec.key.name)
                .await?;
            self.next_key = max.map_or(1, |max| max + 1);
        }

        if self.spec.cache_policy == CachePolicy::Prefill {
            let rows = self
                .warehouse
                .select(&self.spec.table, &Predicate::all())
                .await?;
            self.stats.durable_selects += 1;

            for row in rows {
                let member = CachedMember::from_table_row(row)?;
                let lookup = self.member_lookup_values(&member);
                self.cache_member(lookup, member);
            }
        }

        info!(
            dimension = self.name(),
            next_key = self.next_key,
            cached_members = self.cache.len(),
            "prepared dimension"
        );

        self.prepared = true;

        Ok(())
    }

    /// Returns the key of the member matching the lookup attributes of `row`, if any.
    ///
    /// Never inserts. A cache miss is resolved against the durable table at most once per
    /// lookup.
    pub async fn lookup(&mut self, row: &AttributeRow) -> LoadResult<Option<Value>> {
        let lookup = self.lookup_values(row)?;
        let member = self.find_member(&lookup).await?;

        Ok(member.map(|member| member.key))
    }

    /// Returns the key of the member matching `row`, inserting a new member if none exists.
    ///
    /// With attribute refresh enabled, descriptive attributes that are not lookup attributes
    /// are compared with the stored member and updated when they differ.
    pub async fn ensure(&mut self, row: &AttributeRow) -> LoadResult<Value> {
        let lookup = self.lookup_values(row)?;

        match self.find_member(&lookup).await? {
            Some(member) => {
                if self.spec.refresh_attributes {
                    self.refresh(row, lookup, member.clone()).await?;
                }

                Ok(member.key)
            }
            None => self.insert_member(row, lookup).await,
        }
    }

    /// Appends `row` as a new member without checking for an existing one.
    ///
    /// The key is taken from the row when present, otherwise it is generated. Used to prime
    /// reference dimensions.
    pub async fn insert(&mut self, row: &AttributeRow) -> LoadResult<Value> {
        let lookup = self.lookup_values(row)?;
        self.prepare().await?;

        self.insert_member(row, lookup).await
    }

    /// Returns the coerced lookup values of `row`.
    fn lookup_values(&self, row: &AttributeRow) -> LoadResult<Vec<Value>> {
        self.lookup_indices
            .iter()
            .map(|index| {
                let attribute = &self.spec.attributes[*index];
                attribute.coerce(row.require(&attribute.name)?.clone())
            })
            .collect()
    }

    fn member_lookup_values(&self, member: &CachedMember) -> Vec<Value> {
        self.lookup_indices
            .iter()
            .map(|index| member.attributes.get(*index).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Adds a member to the cache unless its lookup tuple is already cached.
    fn cache_member(&mut self, lookup: Vec<Value>, member: CachedMember) {
        match self.cache.entry(lookup) {
            Entry::Occupied(entry) => {
                warn!(
                    dimension = self.spec.name(),
                    lookup = ?entry.key(),
                    kept_key = %entry.get().key,
                    ignored_key = %member.key,
                    "duplicate natural key in dimension, keeping the first member"
                );
            }
            Entry::Vacant(entry) => {
                entry.insert(member);
            }
        }
    }

    async fn find_member(&mut self, lookup: &[Value]) -> LoadResult<Option<CachedMember>> {
        self.prepare().await?;
        self.stats.lookups += 1;

        if let Some(member) = self.cache.get(lookup) {
            self.stats.cache_hits += 1;
            return Ok(Some(member.clone()));
        }

        // A prefilled cache holds every member written before or during this run.
        if self.spec.cache_policy == CachePolicy::Prefill {
            return Ok(None);
        }

        let predicate = Predicate::from_pairs(
            self.spec
                .lookup_attributes
                .iter()
                .cloned()
                .zip(lookup.iter().cloned()),
        );
        let rows = self.warehouse.select(&self.spec.table, &predicate).await?;
        self.stats.durable_selects += 1;

        debug!(
            dimension = self.name(),
            %predicate,
            matches = rows.len(),
            "dimension cache miss"
        );

        if rows.len() > 1 {
            warn!(
                dimension = self.name(),
                %predicate,
                matches = rows.len(),
                "duplicate natural key in dimension, keeping the first member"
            );
        }

        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };

        let member = CachedMember::from_table_row(row)?;
        self.cache.insert(lookup.to_vec(), member.clone());

        Ok(Some(member))
    }

    async fn insert_member(&mut self, row: &AttributeRow, lookup: Vec<Value>) -> LoadResult<Value> {
        let key = self.member_key(row)?;

        let mut attributes = Vec::with_capacity(self.spec.attributes.len());
        for attribute in &self.spec.attributes {
            let value = match row.get(&attribute.name) {
                Some(value) => value.clone(),
                None if attribute.nullable => Value::Null,
                None => row.require(&attribute.name)?.clone(),
            };
            attributes.push(attribute.coerce(value)?);
        }

        let mut values = Vec::with_capacity(attributes.len() + 1);
        values.push(key.clone());
        values.extend(attributes.iter().cloned());

        self.warehouse
            .insert(&self.spec.table, TableRow::new(values))
            .await?;
        self.stats.inserted += 1;

        debug!(dimension = self.name(), %key, "inserted dimension member");

        self.cache_member(
            lookup,
            CachedMember {
                key: key.clone(),
                attributes,
            },
        );

        Ok(key)
    }

    /// Returns the key for a new member, advancing the sequence when needed.
    fn member_key(&mut self, row: &AttributeRow) -> LoadResult<Value> {
        let provided = row
            .get(&self.spec.key.name)
            .filter(|value| !value.is_null())
            .cloned();

        match (provided, self.spec.key_strategy) {
            (Some(key), _) => {
                let key = self.spec.key.coerce(key)?;
                if let Some(key) = key.as_int() {
                    self.next_key = self.next_key.max(key + 1);
                }

                Ok(key)
            }
            (None, KeyStrategy::Sequence) => {
                let key = self.next_key;
                self.next_key += 1;

                Ok(Value::Int(key))
            }
            (None, KeyStrategy::Precomputed) => {
                bail!(
                    ErrorKind::MissingAttribute,
                    "Precomputed dimension key is missing from the row",
                    format!(
                        "dimension '{}' expects key attribute '{}' in {row}",
                        self.name(),
                        self.spec.key.name
                    )
                )
            }
        }
    }

    async fn refresh(
        &mut self,
        row: &AttributeRow,
        lookup: Vec<Value>,
        mut member: CachedMember,
    ) -> LoadResult<()> {
        let mut assignments = Vec::new();
        for (index, attribute) in self.spec.attributes.iter().enumerate() {
            if self.lookup_indices.contains(&index) {
                continue;
            }

            let Some(value) = row.get(&attribute.name) else {
                continue;
            };

            let value = attribute.coerce(value.clone())?;
            if member.attributes.get(index) != Some(&value) {
                assignments.push((attribute.name.clone(), value.clone()));
                if let Some(current) = member.attributes.get_mut(index) {
                    *current = value;
                }
            }
        }

        if assignments.is_empty() {
            return Ok(());
        }

        let predicate = Predicate::eq(self.spec.key.name.clone(), member.key.clone());
        self.warehouse
            .update(&self.spec.table, &predicate, &assignments)
            .await?;
        self.stats.refreshed += 1;

        debug!(dimension = self.name(), key = %member.key, "refreshed dimension member");

        self.cache.insert(lookup, member);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnSchema, ColumnType, TableName};
    use crate::warehouse::memory::MemoryWarehouse;

    fn book_spec() -> DimensionSpec {
        DimensionSpec::new(
            TableName::new("project", "dataset", "book"),
            ColumnSchema::required("bookid", ColumnType::Integer),
            vec![
                ColumnSchema::required("title", ColumnType::String),
                ColumnSchema::nullable("genre", ColumnType::String),
            ],
        )
    }

    fn book(title: &str, genre: &str) -> AttributeRow {
        AttributeRow::new().with("title", title).with("genre", genre)
    }

    #[tokio::test]
    async fn ensure_inserts_each_natural_key_once() {
        let warehouse = MemoryWarehouse::new();
        let mut dimension = CachedDimension::new(book_spec(), warehouse.clone()).unwrap();

        let first = dimension.ensure(&book("Dune", "SciFi")).await.unwrap();
        let second = dimension.ensure(&book("Dune", "SciFi")).await.unwrap();
        let other = dimension.ensure(&book("Emma", "Romance")).await.unwrap();

        assert_eq!(first, Value::Int(1));
        assert_eq!(first, second);
        assert_eq!(other, Value::Int(2));
        assert_eq!(warehouse.rows(&book_spec().table).await.len(), 2);

        let stats = dimension.stats();
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.cache_hits, 1);
    }

    #[tokio::test]
    async fn lookup_never_inserts() {
        let warehouse = MemoryWarehouse::new();
        let mut dimension = CachedDimension::new(book_spec(), warehouse.clone()).unwrap();

        assert_eq!(dimension.lookup(&book("Dune", "SciFi")).await.unwrap(), None);
        assert!(warehouse.rows(&book_spec().table).await.is_empty());
    }

    #[tokio::test]
    async fn sequence_continues_after_existing_rows() {
        let warehouse = MemoryWarehouse::new();

        let mut dimension = CachedDimension::new(book_spec(), warehouse.clone()).unwrap();
        dimension.ensure(&book("Dune", "SciFi")).await.unwrap();
        dimension.ensure(&book("Emma", "Romance")).await.unwrap();

        let mut dimension = CachedDimension::new(book_spec(), warehouse.clone()).unwrap();
        let existing = dimension.ensure(&book("Dune", "SciFi")).await.unwrap();
        let new = dimension.ensure(&book("Ulysses", "Modernism")).await.unwrap();

        assert_eq!(existing, Value::Int(1));
        assert_eq!(new, Value::Int(3));
        assert_eq!(dimension.stats().durable_selects, 2);
    }

    #[tokio::test]
    async fn prefill_serves_lookups_without_selects() {
        let warehouse = MemoryWarehouse::new();

        let mut dimension = CachedDimension::new(book_spec(), warehouse.clone()).unwrap();
        dimension.ensure(&book("Dune", "SciFi")).await.unwrap();

        let spec = book_spec().with_cache_policy(CachePolicy::Prefill);
        let mut dimension = CachedDimension::new(spec, warehouse.clone()).unwrap();
        dimension.prepare().await.unwrap();
        let selects = warehouse.select_count().await;

        assert_eq!(
            dimension.lookup(&book("Dune", "SciFi")).await.unwrap(),
            Some(Value::Int(1))
        );
        assert_eq!(dimension.lookup(&book("Emma", "Romance")).await.unwrap(), None);
        assert_eq!(warehouse.select_count().await, selects);
    }

    #[tokio::test]
    async fn precomputed_keys_come_from_the_row() {
        let spec = DimensionSpec::new(
            TableName::new("project", "dataset", "book"),
            ColumnSchema::required("book_hash_id", ColumnType::String),
            vec![
                ColumnSchema::required("title", ColumnType::String),
                ColumnSchema::required("genre", ColumnType::String),
            ],
        )
        .with_key_strategy(KeyStrategy::Precomputed);
        let mut dimension = CachedDimension::new(spec, MemoryWarehouse::new()).unwrap();

        let err = dimension.ensure(&book("Dune", "SciFi")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingAttribute);

        let row = book("Dune", "SciFi").with("book_hash_id", "abc");
        assert_eq!(dimension.ensure(&row).await.unwrap(), Value::from("abc"));
    }

    #[tokio::test]
    async fn refresh_updates_non_lookup_attributes_only() {
        let warehouse = MemoryWarehouse::new();
        let spec = book_spec()
            .with_lookup_attributes(["title"])
            .with_attribute_refresh(true);
        let mut dimension = CachedDimension::new(spec.clone(), warehouse.clone()).unwrap();

        let key = dimension.ensure(&book("Dune", "SciFi")).await.unwrap();
        let refreshed = dimension.ensure(&book("Dune", "Classic")).await.unwrap();

        assert_eq!(key, refreshed);
        assert_eq!(dimension.stats().refreshed, 1);
        assert_eq!(
            warehouse.rows(&spec.table).await[0].values,
            vec![Value::Int(1), Value::from("Dune"), Value::from("Classic")]
        );

        dimension.ensure(&book("Dune", "Classic")).await.unwrap();
        assert_eq!(dimension.stats().refreshed, 1);
    }

    #[tokio::test]
    async fn insert_keeps_first_member_for_duplicate_keys() {
        let warehouse = MemoryWarehouse::new();
        let mut dimension = CachedDimension::new(book_spec(), warehouse.clone()).unwrap();

        let first = dimension.insert(&book("Dune", "SciFi")).await.unwrap();
        let second = dimension.insert(&book("Dune", "SciFi")).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(warehouse.rows(&book_spec().table).await.len(), 2);
        assert_eq!(dimension.lookup(&book("Dune", "SciFi")).await.unwrap(), Some(first));
    }

    #[test]
    fn invalid_specs_are_rejected() {
        let spec = book_spec().with_lookup_attributes(["isbn"]);
        let err = CachedDimension::new(spec, MemoryWarehouse::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);

        let spec = DimensionSpec::new(
            TableName::new("project", "dataset", "book"),
            ColumnSchema::required("book_hash_id", ColumnType::String),
            vec![ColumnSchema::required("title", ColumnType::String)],
        );
        let err = CachedDimension::new(spec, MemoryWarehouse::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }
}
