use crate::bail;
use crate::error::{ErrorKind, LoadResult};
use crate::types::{ColumnSchema, TableName, TableSchema};

/// How the key of a new dimension member is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStrategy {
    /// Keys are generated from a sequence starting at `max(key) + 1`.
    #[default]
    Sequence,
    /// Keys are read from the row, typically after a hash derivation step.
    Precomputed,
}

/// When the dimension cache is populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Members are cached on first lookup.
    #[default]
    Lazy,
    /// The whole durable table is read into the cache when the dimension is prepared.
    Prefill,
}

/// Definition of a dimension and its durable table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionSpec {
    pub table: TableName,
    pub key: ColumnSchema,
    pub attributes: Vec<ColumnSchema>,
    pub lookup_attributes: Vec<String>,
    pub key_strategy: KeyStrategy,
    pub cache_policy: CachePolicy,
    /// Updates descriptive attributes of existing members when they change (type 1).
    pub refresh_attributes: bool,
}

impl DimensionSpec {
    /// Creates a dimension looked up by all of its descriptive attributes.
    pub fn new(table: TableName, key: ColumnSchema, attributes: Vec<ColumnSchema>) -> Self {
        let lookup_attributes = attributes
            .iter()
            .map(|attribute| attribute.name.clone())
            .collect();

        Self {
            table,
            key,
            attributes,
            lookup_attributes,
            key_strategy: KeyStrategy::default(),
            cache_policy: CachePolicy::default(),
            refresh_attributes: false,
        }
    }

    pub fn with_lookup_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lookup_attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_key_strategy(mut self, key_strategy: KeyStrategy) -> Self {
        self.key_strategy = key_strategy;
        self
    }

    pub fn with_cache_policy(mut self, cache_policy: CachePolicy) -> Self {
        self.cache_policy = cache_policy;
        self
    }

    pub fn with_attribute_refresh(mut self, refresh_attributes: bool) -> Self {
        self.refresh_attributes = refresh_attributes;
        self
    }

    /// Returns the name the dimension is referred to by, which is its table name.
    pub fn name(&self) -> &str {
        &self.table.table
    }

    /// Returns the schema of the durable table: the key followed by the attributes.
    pub fn table_schema(&self) -> TableSchema {
        let mut columns = Vec::with_capacity(self.attributes.len() + 1);
        columns.push(self.key.clone());
        columns.extend(self.attributes.iter().cloned());

        TableSchema::new(self.table.clone(), columns)
    }

    /// Returns the position of the attribute called `name` among the descriptive attributes.
    pub(crate) fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes
            .iter()
            .position(|attribute| attribute.name == name)
    }

    /// Checks that the definition is usable.
    pub fn validate(&self) -> LoadResult<()> {
        if self.lookup_attributes.is_empty() {
            bail!(
                ErrorKind::ConfigError,
                "Dimension has no lookup attributes",
                format!("dimension '{}' needs at least one lookup attribute", self.name())
            );
        }

        for lookup in &self.lookup_attributes {
            if self.attribute_index(lookup).is_none() {
                bail!(
                    ErrorKind::ConfigError,
                    "Lookup attribute is not a dimension attribute",
                    format!("dimension '{}' has no attribute '{lookup}'", self.name())
                );
            }
        }

        if self
            .attributes
            .iter()
            .any(|attribute| attribute.name == self.key.name)
        {
            bail!(
                ErrorKind::ConfigError,
                "Dimension key is also listed as an attribute",
                format!("dimension '{}' key '{}'", self.name(), self.key.name)
            );
        }

        if self.key_strategy == KeyStrategy::Sequence
            && self.key.typ != crate::types::ColumnType::Integer
        {
            bail!(
                ErrorKind::ConfigError,
                "Sequence keys must be integer columns",
                format!("dimension '{}' key '{}' is {}", self.name(), self.key.name, self.key.typ)
            );
        }

        Ok(())
    }
}
