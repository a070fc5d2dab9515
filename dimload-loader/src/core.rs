use dimload::pipeline::{LoadPipeline, LoadReport};
use dimload::sales::SalesSchema;
use dimload::source::Source;
use dimload::source::csv::{CsvOptions, CsvSource};
use dimload::source::sql::SqlSource;
use dimload::warehouse::Warehouse;
use dimload::warehouse::bigquery::BigQueryWarehouse;
use dimload::warehouse::memory::MemoryWarehouse;
use dimload::warehouse::postgres::PostgresWarehouse;
use dimload::warehouse::retry::{RetryPolicy, RetryingWarehouse};
use dimload_config::shared::{
    LoaderConfig, PgConnectionConfig, PrimingConfig, RetryConfig, SourceConfig, WarehouseConfig,
};
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::error::{LoaderError, LoaderResult};

/// Runs one sales load with the provided configuration.
///
/// Connects the configured warehouse, primes the reference dimensions from their files and
/// streams the source query into the star schema.
pub async fn start_loader_with_config(config: LoaderConfig) -> LoaderResult<LoadReport> {
    info!("starting loader");

    log_config(&config);

    let schema = SalesSchema::new(
        config.warehouse.project_id(),
        config.warehouse.dataset(),
        config.key_strategy,
    );
    let policy = RetryPolicy::from(&config.retry);

    // Warehouses are statically dispatched, so every backend gets its own pipeline type.
    let report = match &config.warehouse {
        WarehouseConfig::Memory { .. } => {
            let warehouse = RetryingWarehouse::new(MemoryWarehouse::new(), policy);
            run_load(warehouse, schema, &config).await?
        }
        WarehouseConfig::Postgres { connection, .. } => {
            let warehouse = PostgresWarehouse::connect(connection).await?;
            let warehouse = RetryingWarehouse::new(warehouse, policy);
            run_load(warehouse, schema, &config).await?
        }
        WarehouseConfig::BigQuery {
            project_id,
            service_account_key,
            ..
        } => {
            let warehouse =
                BigQueryWarehouse::connect(project_id.clone(), service_account_key.expose_secret())
                    .await?;
            let warehouse = RetryingWarehouse::new(warehouse, policy);
            run_load(warehouse, schema, &config).await?
        }
    };

    info!(
        rows_read = report.rows_read,
        facts_inserted = report.facts_inserted,
        facts_skipped = report.facts_skipped,
        "loader completed"
    );

    Ok(report)
}

async fn run_load<W>(
    warehouse: W,
    schema: SalesSchema,
    config: &LoaderConfig,
) -> LoaderResult<LoadReport>
where
    W: Warehouse + Clone,
{
    let pipeline = build_pipeline(warehouse, schema)?;

    let source = SqlSource::connect(
        &config.source.connection,
        &config.source.query,
        config.source.names.clone(),
    )
    .await?;

    load(pipeline, &config.priming, source).await
}

/// Registers the dimensions of `schema` in a new pipeline.
pub fn build_pipeline<W>(warehouse: W, schema: SalesSchema) -> LoaderResult<LoadPipeline<W>>
where
    W: Warehouse + Clone,
{
    let mut pipeline = LoadPipeline::new(warehouse, schema.fact, schema.plan)?;
    for dimension in schema.dimensions {
        pipeline.add_dimension(dimension)?;
    }

    Ok(pipeline)
}

/// Primes the configured dimensions and loads `source`.
///
/// Priming only adds reference members that are not stored yet, so repeated loads keep
/// resolving to the same members.
pub async fn load<W, S>(
    mut pipeline: LoadPipeline<W>,
    priming: &[PrimingConfig],
    mut source: S,
) -> LoaderResult<LoadReport>
where
    W: Warehouse + Clone,
    S: Source,
{
    for priming in priming {
        let options = CsvOptions {
            delimiter: priming.delimiter_byte().map_err(LoaderError::config)?,
            ..CsvOptions::default()
        };
        let mut file = CsvSource::open(&priming.path, options)?;

        let inserted = pipeline
            .prime_missing(&priming.dimension, &mut file)
            .await?;
        info!(
            dimension = priming.dimension,
            path = priming.path,
            inserted,
            "primed dimension from file"
        );
    }

    let report = pipeline.run(&mut source).await?;

    Ok(report)
}

fn log_config(config: &LoaderConfig) {
    log_source_config(&config.source);
    log_warehouse_config(&config.warehouse);
    log_retry_config(&config.retry);
    debug!(key_strategy = ?config.key_strategy, priming_files = config.priming.len(), "load config");
}

fn log_source_config(config: &SourceConfig) {
    debug!(query = config.query, names = ?config.names, "source config");
    log_pg_connection_config(&config.connection);
}

fn log_warehouse_config(config: &WarehouseConfig) {
    match config {
        WarehouseConfig::Memory {
            project_id,
            dataset,
        } => {
            debug!(project_id, dataset, "using memory warehouse config");
        }
        WarehouseConfig::Postgres {
            project_id,
            dataset,
            connection,
        } => {
            debug!(project_id, dataset, "using postgres warehouse config");
            log_pg_connection_config(connection);
        }
        WarehouseConfig::BigQuery {
            project_id,
            dataset,
            service_account_key: _,
        } => {
            debug!(project_id, dataset, "using bigquery warehouse config");
        }
    }
}

fn log_pg_connection_config(config: &PgConnectionConfig) {
    debug!(
        host = config.host,
        port = config.port,
        dbname = config.name,
        username = config.username,
        "postgres connection config",
    );
}

fn log_retry_config(config: &RetryConfig) {
    debug!(
        max_attempts = config.max_attempts,
        initial_delay_ms = config.initial_delay_ms,
        max_delay_ms = config.max_delay_ms,
        backoff_factor = config.backoff_factor,
        "retry config"
    );
}

#[cfg(test)]
mod tests {
    use dimload::error::ErrorKind;
    use dimload::source::memory::MemorySource;
    use dimload::types::{AttributeRow, TableName, Value};
    use dimload_config::shared::KeyStrategyConfig;

    use super::*;

    fn sale(title: &str, city: &str, date: &str, sale: i64) -> AttributeRow {
        AttributeRow::new()
            .with("title", title)
            .with("genre", "SciFi")
            .with("city", city)
            .with("date", date)
            .with("sale", sale)
    }

    fn region_file(name: &str) -> String {
        let path = std::env::temp_dir().join(format!("{name}-{}.csv", std::process::id()));
        std::fs::write(&path, "city,region\nUtrecht,Midden\n").unwrap();

        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn loads_sales_after_priming_locations() {
        let warehouse = MemoryWarehouse::new();
        let schema = SalesSchema::new("local", "pygrametl", KeyStrategyConfig::Hash);
        let pipeline = build_pipeline(warehouse.clone(), schema).unwrap();
        let priming = vec![PrimingConfig {
            dimension: "location".to_owned(),
            path: region_file("loads-sales"),
            delimiter: ",".to_owned(),
        }];

        let report = load(
            pipeline,
            &priming,
            MemorySource::new([sale("Dune", "Utrecht", "2023-11-07", 3)]),
        )
        .await
        .unwrap();

        assert_eq!(report.facts_inserted, 1);
        let facts = warehouse
            .committed_rows(&TableName::new("local", "pygrametl", "facttable"))
            .await;
        assert_eq!(facts[0].values[3], Value::Int(3));
    }

    #[tokio::test]
    async fn repeated_loads_keep_facts_and_locations_stable() {
        let warehouse = MemoryWarehouse::new();
        let priming = vec![PrimingConfig {
            dimension: "location".to_owned(),
            path: region_file("repeated-loads"),
            delimiter: ",".to_owned(),
        }];

        for expected_inserts in [1, 0] {
            let schema = SalesSchema::new("local", "pygrametl", KeyStrategyConfig::Hash);
            let pipeline = build_pipeline(warehouse.clone(), schema).unwrap();

            let report = load(
                pipeline,
                &priming,
                MemorySource::new([sale("Dune", "Utrecht", "2023-11-07", 3)]),
            )
            .await
            .unwrap();

            assert_eq!(report.facts_inserted, expected_inserts);
            assert_eq!(report.facts_skipped, 1 - expected_inserts);
        }

        let locations = warehouse
            .committed_rows(&TableName::new("local", "pygrametl", "location"))
            .await;
        assert_eq!(locations.len(), 1);

        let facts = warehouse
            .committed_rows(&TableName::new("local", "pygrametl", "facttable"))
            .await;
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].values[1], Value::Int(1));
    }

    #[tokio::test]
    async fn unknown_city_surfaces_as_load_error() {
        let schema = SalesSchema::new("local", "pygrametl", KeyStrategyConfig::Sequence);
        let pipeline = build_pipeline(MemoryWarehouse::new(), schema).unwrap();
        let priming = vec![PrimingConfig {
            dimension: "location".to_owned(),
            path: region_file("unknown-city"),
            delimiter: ",".to_owned(),
        }];

        let err = load(
            pipeline,
            &priming,
            MemorySource::new([sale("Dune", "Rotterdam", "2023-11-07", 3)]),
        )
        .await
        .unwrap_err();

        assert!(
            matches!(err, LoaderError::Load(ref err) if err.kind() == ErrorKind::DimensionMemberMissing)
        );
    }

    #[tokio::test]
    async fn missing_priming_file_is_reported() {
        let schema = SalesSchema::new("local", "pygrametl", KeyStrategyConfig::Sequence);
        let pipeline = build_pipeline(MemoryWarehouse::new(), schema).unwrap();
        let priming = vec![PrimingConfig {
            dimension: "location".to_owned(),
            path: "/nonexistent/region.csv".to_owned(),
            delimiter: ",".to_owned(),
        }];

        let err = load(pipeline, &priming, MemorySource::default())
            .await
            .unwrap_err();

        assert!(
            matches!(err, LoaderError::Load(ref err) if err.kind() == ErrorKind::SourceIoError)
        );
    }
}
