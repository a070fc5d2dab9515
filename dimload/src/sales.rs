//! The book sales star schema.
//!
//! The schema has a `book` and a `time` dimension filled while loading, a `location`
//! reference dimension primed before loading, and a `facttable` keyed by the three
//! dimensions with a `sale` measure.

use dimload_config::shared::KeyStrategyConfig;

use crate::derive::{DAY_ATTRIBUTE, MONTH_ATTRIBUTE, YEAR_ATTRIBUTE};
use crate::dimension::DimensionSpec;
use crate::fact::FactSpec;
use crate::pipeline::LoadPlan;
use crate::types::{ColumnSchema, ColumnType, TableName};

pub const BOOK_DIMENSION: &str = "book";
pub const TIME_DIMENSION: &str = "time";
pub const LOCATION_DIMENSION: &str = "location";
pub const FACT_TABLE: &str = "facttable";

const BOOK_HASH_ATTRIBUTE: &str = "book_hash_id";
const TIME_HASH_ATTRIBUTE: &str = "time_hash_id";

/// Dimensions, fact table and per-row plan of the sales schema.
#[derive(Debug, Clone)]
pub struct SalesSchema {
    pub dimensions: Vec<DimensionSpec>,
    pub fact: FactSpec,
    pub plan: LoadPlan,
}

impl SalesSchema {
    /// Builds the schema in `project_id.dataset`.
    ///
    /// With [`KeyStrategyConfig::Hash`] the book and time dimensions also store hash keys of
    /// their natural keys, members are looked up by those hashes and the fact table refers to
    /// books and times by hash instead of surrogate key.
    pub fn new(project_id: &str, dataset: &str, key_strategy: KeyStrategyConfig) -> Self {
        let table = |name: &str| TableName::new(project_id, dataset, name);

        let mut book_attributes = vec![
            ColumnSchema::nullable("title", ColumnType::String),
            ColumnSchema::nullable("genre", ColumnType::String),
        ];
        let mut time_attributes = vec![
            ColumnSchema::nullable(DAY_ATTRIBUTE, ColumnType::Integer),
            ColumnSchema::nullable(MONTH_ATTRIBUTE, ColumnType::Integer),
            ColumnSchema::nullable(YEAR_ATTRIBUTE, ColumnType::Integer),
        ];

        let location = DimensionSpec::new(
            table(LOCATION_DIMENSION),
            ColumnSchema::required("locationid", ColumnType::Integer),
            vec![
                ColumnSchema::nullable("city", ColumnType::String),
                ColumnSchema::nullable("region", ColumnType::String),
            ],
        )
        .with_lookup_attributes(["city"]);

        let measures = vec![ColumnSchema::required("sale", ColumnType::Integer)];
        let book_key = ColumnSchema::required("bookid", ColumnType::Integer);
        let time_key = ColumnSchema::required("timeid", ColumnType::Integer);

        match key_strategy {
            KeyStrategyConfig::Sequence => {
                let book = DimensionSpec::new(table(BOOK_DIMENSION), book_key, book_attributes);
                let time = DimensionSpec::new(table(TIME_DIMENSION), time_key, time_attributes);
                let fact = FactSpec::new(
                    table(FACT_TABLE),
                    vec![
                        ColumnSchema::required("bookid", ColumnType::Integer),
                        ColumnSchema::required("locationid", ColumnType::Integer),
                        ColumnSchema::required("timeid", ColumnType::Integer),
                    ],
                    measures,
                );
                let plan = LoadPlan::new()
                    .split_date("date")
                    .ensure(BOOK_DIMENSION)
                    .ensure(TIME_DIMENSION)
                    .lookup(LOCATION_DIMENSION);

                Self {
                    dimensions: vec![book, time, location],
                    fact,
                    plan,
                }
            }
            KeyStrategyConfig::Hash => {
                book_attributes.push(ColumnSchema::required(BOOK_HASH_ATTRIBUTE, ColumnType::String));
                time_attributes.push(ColumnSchema::required(TIME_HASH_ATTRIBUTE, ColumnType::String));

                let book = DimensionSpec::new(table(BOOK_DIMENSION), book_key, book_attributes)
                    .with_lookup_attributes([BOOK_HASH_ATTRIBUTE]);
                let time = DimensionSpec::new(table(TIME_DIMENSION), time_key, time_attributes)
                    .with_lookup_attributes([TIME_HASH_ATTRIBUTE]);
                let fact = FactSpec::new(
                    table(FACT_TABLE),
                    vec![
                        ColumnSchema::required(BOOK_HASH_ATTRIBUTE, ColumnType::String),
                        ColumnSchema::required("locationid", ColumnType::Integer),
                        ColumnSchema::required(TIME_HASH_ATTRIBUTE, ColumnType::String),
                    ],
                    measures,
                );
                let plan = LoadPlan::new()
                    .split_date("date")
                    .derive_hash(BOOK_HASH_ATTRIBUTE, ["title", "genre"])
                    .derive_hash(TIME_HASH_ATTRIBUTE, ["date"])
                    .ensure(BOOK_DIMENSION)
                    .ensure(TIME_DIMENSION)
                    .lookup(LOCATION_DIMENSION);

                Self {
                    dimensions: vec![book, time, location],
                    fact,
                    plan,
                }
            }
        }
    }

    /// Returns the dimension called `name`.
    pub fn dimension(&self, name: &str) -> Option<&DimensionSpec> {
        self.dimensions.iter().find(|spec| spec.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use crate::pipeline::PlanStep;

    use super::*;

    #[test]
    fn every_planned_dimension_is_defined() {
        for strategy in [KeyStrategyConfig::Sequence, KeyStrategyConfig::Hash] {
            let schema = SalesSchema::new("project", "pygrametl", strategy);

            for step in schema.plan.steps() {
                if let PlanStep::Ensure(name) | PlanStep::Lookup(name) = step {
                    assert!(schema.dimension(name).is_some());
                }
            }
            for spec in &schema.dimensions {
                spec.validate().unwrap();
            }
            schema.fact.validate().unwrap();
        }
    }

    #[test]
    fn hash_facts_refer_to_hash_keys() {
        let schema = SalesSchema::new("project", "pygrametl_hash", KeyStrategyConfig::Hash);

        let keyrefs: Vec<_> = schema
            .fact
            .keyrefs
            .iter()
            .map(|column| column.name.as_str())
            .collect();
        assert_eq!(keyrefs, ["book_hash_id", "locationid", "time_hash_id"]);
        assert_eq!(
            schema.fact.table.to_string(),
            "project.pygrametl_hash.facttable"
        );
        assert_eq!(
            schema.dimension(BOOK_DIMENSION).unwrap().lookup_attributes,
            vec!["book_hash_id".to_owned()]
        );
    }
}
