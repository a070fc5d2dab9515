use dimload::pipeline::{LoadPipeline, LoadReport};
use dimload::source::memory::MemorySource;
use dimload::test_utils::{
    hash_book_dimension, hash_plan, hash_sale_fact, hash_time_dimension, location_dimension,
    location_row, sale_fact, sequence_book_dimension, sequence_plan, sequence_time_dimension,
};
use dimload::types::AttributeRow;
use dimload::warehouse::memory::MemoryWarehouse;

/// Which keys the fact table of the sales schema is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyVariant {
    Sequence,
    Hash,
}

pub fn create_sales_pipeline(
    warehouse: &MemoryWarehouse,
    variant: KeyVariant,
) -> LoadPipeline<MemoryWarehouse> {
    let (fact, plan, book, time) = match variant {
        KeyVariant::Sequence => (
            sale_fact(),
            sequence_plan(),
            sequence_book_dimension(),
            sequence_time_dimension(),
        ),
        KeyVariant::Hash => (
            hash_sale_fact(),
            hash_plan(),
            hash_book_dimension(),
            hash_time_dimension(),
        ),
    };

    let mut pipeline = LoadPipeline::new(warehouse.clone(), fact, plan).unwrap();
    pipeline.add_dimension(book).unwrap();
    pipeline.add_dimension(time).unwrap();
    pipeline.add_dimension(location_dimension()).unwrap();

    pipeline
}

/// Primes the location dimension with the given `(city, region)` pairs.
pub async fn prime_locations(
    pipeline: &mut LoadPipeline<MemoryWarehouse>,
    locations: &[(&str, &str)],
) -> u64 {
    let mut source = MemorySource::new(
        locations
            .iter()
            .map(|(city, region)| location_row(city, region)),
    );

    pipeline.prime("location", &mut source).await.unwrap()
}

/// Runs a complete sales load over `rows`, priming Utrecht into the location dimension
/// first, the way the loader primes reference data on every run.
pub async fn run_sales_load(
    warehouse: &MemoryWarehouse,
    variant: KeyVariant,
    rows: Vec<AttributeRow>,
) -> LoadReport {
    let mut pipeline = create_sales_pipeline(warehouse, variant);

    let mut regions = MemorySource::new([location_row("Utrecht", "Midden")]);
    pipeline
        .prime_missing("location", &mut regions)
        .await
        .unwrap();

    pipeline.run(&mut MemorySource::new(rows)).await.unwrap()
}
