//! Helpers for tests loading the book sales star schema.
//!
//! Every table definition comes from [`SalesSchema`] in the test dataset, so tests run
//! against the schema the loader ships.

use dimload_config::shared::KeyStrategyConfig;

use crate::dimension::DimensionSpec;
use crate::fact::FactSpec;
use crate::pipeline::LoadPlan;
use crate::sales::{BOOK_DIMENSION, LOCATION_DIMENSION, SalesSchema, TIME_DIMENSION};
use crate::types::{AttributeRow, TableName};

pub const TEST_PROJECT: &str = "test-project";
pub const TEST_DATASET: &str = "pygrametl";

pub fn test_table_name(table: &str) -> TableName {
    TableName::new(TEST_PROJECT, TEST_DATASET, table)
}

pub fn sales_schema(key_strategy: KeyStrategyConfig) -> SalesSchema {
    SalesSchema::new(TEST_PROJECT, TEST_DATASET, key_strategy)
}

fn dimension(key_strategy: KeyStrategyConfig, name: &str) -> DimensionSpec {
    sales_schema(key_strategy)
        .dimension(name)
        .cloned()
        .unwrap_or_else(|| panic!("sales schema has no dimension '{name}'"))
}

pub fn sequence_book_dimension() -> DimensionSpec {
    dimension(KeyStrategyConfig::Sequence, BOOK_DIMENSION)
}

pub fn sequence_time_dimension() -> DimensionSpec {
    dimension(KeyStrategyConfig::Sequence, TIME_DIMENSION)
}

pub fn location_dimension() -> DimensionSpec {
    dimension(KeyStrategyConfig::Sequence, LOCATION_DIMENSION)
}

pub fn sale_fact() -> FactSpec {
    sales_schema(KeyStrategyConfig::Sequence).fact
}

pub fn sequence_plan() -> LoadPlan {
    sales_schema(KeyStrategyConfig::Sequence).plan
}

pub fn hash_book_dimension() -> DimensionSpec {
    dimension(KeyStrategyConfig::Hash, BOOK_DIMENSION)
}

pub fn hash_time_dimension() -> DimensionSpec {
    dimension(KeyStrategyConfig::Hash, TIME_DIMENSION)
}

pub fn hash_sale_fact() -> FactSpec {
    sales_schema(KeyStrategyConfig::Hash).fact
}

pub fn hash_plan() -> LoadPlan {
    sales_schema(KeyStrategyConfig::Hash).plan
}

/// Builds a source row as produced by the sales query.
pub fn sale_row(title: &str, genre: &str, city: &str, date: &str, sale: i64) -> AttributeRow {
    AttributeRow::new()
        .with("title", title)
        .with("genre", genre)
        .with("city", city)
        .with("date", date)
        .with("sale", sale)
}

pub fn location_row(city: &str, region: &str) -> AttributeRow {
    AttributeRow::new().with("city", city).with("region", region)
}
