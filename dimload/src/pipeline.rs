use tracing::{debug, error, info};

use crate::bail;
use crate::derive::{derive_hash_into, split_date};
use crate::dimension::{CachedDimension, DimensionSpec, DimensionStats};
use crate::error::{ErrorKind, LoadError, LoadResult};
use crate::fact::{FactSpec, FactTable, FactWrite};
use crate::load_error;
use crate::source::Source;
use crate::types::AttributeRow;
use crate::warehouse::Warehouse;

/// Lifecycle state of a [`LoadPipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Dimensions can be registered and primed.
    Init,
    /// Source rows are being loaded.
    Streaming,
    /// All rows were loaded and the warehouse is committing.
    Commit,
    /// The run committed and released its resources.
    Closed,
    /// The run failed and the warehouse was closed without commit.
    Failed,
}

/// A step applied to every source row before its fact is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanStep {
    /// Splits a date attribute into `year`, `month` and `day`.
    SplitDate { attribute: String },
    /// Stores the hash of `attributes` in `target`.
    DeriveHash {
        target: String,
        attributes: Vec<String>,
    },
    /// Resolves the dimension key, inserting a member when none matches.
    Ensure(String),
    /// Resolves the dimension key of a pre-populated dimension. A missing member fails the run.
    Lookup(String),
}

/// How facts are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FactWriteMode {
    /// Skip facts whose key references already exist.
    #[default]
    Ensure,
    /// Append every fact.
    Insert,
}

#[derive(Debug, Clone, Copy)]
enum PrimeMode {
    Insert,
    Ensure,
}

/// Ordered steps run for every source row, followed by the fact write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadPlan {
    steps: Vec<PlanStep>,
    fact_mode: FactWriteMode,
}

impl LoadPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn split_date(mut self, attribute: impl Into<String>) -> Self {
        self.steps.push(PlanStep::SplitDate {
            attribute: attribute.into(),
        });
        self
    }

    pub fn derive_hash<I, S>(mut self, target: impl Into<String>, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps.push(PlanStep::DeriveHash {
            target: target.into(),
            attributes: attributes.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn ensure(mut self, dimension: impl Into<String>) -> Self {
        self.steps.push(PlanStep::Ensure(dimension.into()));
        self
    }

    pub fn lookup(mut self, dimension: impl Into<String>) -> Self {
        self.steps.push(PlanStep::Lookup(dimension.into()));
        self
    }

    pub fn with_fact_mode(mut self, fact_mode: FactWriteMode) -> Self {
        self.fact_mode = fact_mode;
        self
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn fact_mode(&self) -> FactWriteMode {
        self.fact_mode
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub rows_read: u64,
    /// Statistics per dimension, in registration order.
    pub dimensions: Vec<(String, DimensionStats)>,
    pub facts_inserted: u64,
    pub facts_skipped: u64,
}

impl LoadReport {
    /// Returns the statistics of the dimension called `name`.
    pub fn dimension(&self, name: &str) -> Option<DimensionStats> {
        self.dimensions
            .iter()
            .find(|(dimension, _)| dimension == name)
            .map(|(_, stats)| *stats)
    }
}

/// Sequential loader of a star schema.
///
/// The pipeline owns one [`CachedDimension`] per registered dimension and the
/// [`FactTable`], each holding a clone of the warehouse handle. A run moves through
/// [`PipelineState::Init`], [`PipelineState::Streaming`], [`PipelineState::Commit`] and
/// ends in [`PipelineState::Closed`], or in [`PipelineState::Failed`] on the first error.
/// Only a successful run commits the warehouse.
#[derive(Debug)]
pub struct LoadPipeline<W> {
    warehouse: W,
    dimensions: Vec<CachedDimension<W>>,
    fact: FactTable<W>,
    plan: LoadPlan,
    state: PipelineState,
    prepared: bool,
}

impl<W> LoadPipeline<W>
where
    W: Warehouse + Clone,
{
    pub fn new(warehouse: W, fact: FactSpec, plan: LoadPlan) -> LoadResult<Self> {
        let fact = FactTable::new(fact, warehouse.clone())?;

        Ok(Self {
            warehouse,
            dimensions: Vec::new(),
            fact,
            plan,
            state: PipelineState::Init,
            prepared: false,
        })
    }

    /// Registers a dimension the plan can refer to by name.
    pub fn add_dimension(&mut self, spec: DimensionSpec) -> LoadResult<()> {
        self.require_init("add a dimension")?;

        if self.dimension_index(spec.name()).is_some() {
            bail!(
                ErrorKind::ConfigError,
                "Dimension is registered twice",
                format!("dimension '{}' is already registered", spec.name())
            );
        }

        let dimension = CachedDimension::new(spec, self.warehouse.clone())?;
        self.dimensions.push(dimension);

        Ok(())
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Returns the registered dimension called `name`.
    pub fn dimension(&self, name: &str) -> Option<&CachedDimension<W>> {
        self.dimensions.iter().find(|dimension| dimension.name() == name)
    }

    /// Validates the plan and creates every table that does not exist yet.
    ///
    /// Called by [`LoadPipeline::prime`] and [`LoadPipeline::run`] when needed.
    pub async fn prepare(&mut self) -> LoadResult<()> {
        self.require_init("prepare")?;

        if let Err(err) = self.prepare_tables().await {
            return Err(self.fail(vec![err]).await);
        }

        Ok(())
    }

    /// Inserts every row of `source` into the dimension called `name`.
    ///
    /// Rows are appended without checking for existing members. Returns the number of
    /// inserted rows. The source is closed once exhausted.
    pub async fn prime<S>(&mut self, name: &str, source: &mut S) -> LoadResult<u64>
    where
        S: Source,
    {
        self.prime_with(name, source, PrimeMode::Insert).await
    }

    /// Inserts the rows of `source` whose lookup attributes match no member of the
    /// dimension called `name`.
    ///
    /// Rows matching an existing member are skipped, so the same reference data can be
    /// primed on every run. Returns the number of inserted rows.
    pub async fn prime_missing<S>(&mut self, name: &str, source: &mut S) -> LoadResult<u64>
    where
        S: Source,
    {
        self.prime_with(name, source, PrimeMode::Ensure).await
    }

    async fn prime_with<S>(&mut self, name: &str, source: &mut S, mode: PrimeMode) -> LoadResult<u64>
    where
        S: Source,
    {
        self.require_init("prime a dimension")?;
        if let Err(err) = self.prepare_tables().await {
            return Err(self.fail_with_source(err, source).await);
        }

        let Some(index) = self.dimension_index(name) else {
            let err = load_error!(
                ErrorKind::ConfigError,
                "Unknown dimension",
                format!("cannot prime '{name}', no such dimension is registered")
            );
            return Err(self.fail_with_source(err, source).await);
        };

        let inserted_before = self.dimensions[index].stats().inserted;
        let mut rows = 0u64;
        loop {
            let row = match source.next_row().await {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(err) => return Err(self.fail_with_source(err, source).await),
            };
            rows += 1;

            let dimension = &mut self.dimensions[index];
            let result = match mode {
                PrimeMode::Insert => dimension.insert(&row).await,
                PrimeMode::Ensure => dimension.ensure(&row).await,
            };
            if let Err(err) = result {
                return Err(self.fail_with_source(err, source).await);
            }
        }

        if let Err(err) = source.close().await {
            return Err(self.fail(vec![err]).await);
        }

        let primed = self.dimensions[index].stats().inserted - inserted_before;
        info!(
            dimension = name,
            rows,
            inserted = primed,
            skipped = rows - primed,
            "primed dimension"
        );

        Ok(primed)
    }

    /// Loads every row of `source` and commits the warehouse.
    ///
    /// The first failing row stops the run. In that case the source and the warehouse are
    /// closed without commit and the pipeline ends in [`PipelineState::Failed`].
    pub async fn run<S>(&mut self, source: &mut S) -> LoadResult<LoadReport>
    where
        S: Source,
    {
        self.require_init("run")?;
        if let Err(err) = self.prepare_tables().await {
            return Err(self.fail_with_source(err, source).await);
        }

        self.transition(PipelineState::Streaming);

        let mut rows_read = 0;
        loop {
            let mut row = match source.next_row().await {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(err) => return Err(self.fail_with_source(err, source).await),
            };
            rows_read += 1;

            if let Err(err) = self.load_row(&mut row, rows_read).await {
                return Err(self.fail_with_source(err, source).await);
            }
        }

        self.transition(PipelineState::Commit);
        if let Err(err) = self.warehouse.commit().await {
            return Err(self.fail_with_source(err, source).await);
        }

        let mut errors = Vec::new();
        if let Err(err) = source.close().await {
            errors.push(err);
        }
        if let Err(err) = self.warehouse.close().await {
            errors.push(err);
        }
        self.transition(PipelineState::Closed);

        if !errors.is_empty() {
            return Err(errors.into());
        }

        let report = self.report(rows_read);
        info!(
            rows_read = report.rows_read,
            facts_inserted = report.facts_inserted,
            facts_skipped = report.facts_skipped,
            "load completed"
        );

        Ok(report)
    }

    async fn prepare_tables(&mut self) -> LoadResult<()> {
        if self.prepared {
            return Ok(());
        }

        for step in self.plan.steps() {
            if let PlanStep::Ensure(name) | PlanStep::Lookup(name) = step
                && self.dimension_index(name).is_none()
            {
                bail!(
                    ErrorKind::ConfigError,
                    "Load plan refers to an unknown dimension",
                    format!("dimension '{name}' is not registered")
                );
            }
        }

        for dimension in self.dimensions.iter_mut() {
            dimension.prepare().await?;
        }
        self.fact.prepare().await?;

        self.prepared = true;
        info!(
            warehouse = W::name(),
            dimensions = self.dimensions.len(),
            "prepared load pipeline"
        );

        Ok(())
    }

    async fn load_row(&mut self, row: &mut AttributeRow, row_number: u64) -> LoadResult<()> {
        let Self {
            dimensions,
            fact,
            plan,
            ..
        } = self;

        for step in plan.steps() {
            match step {
                PlanStep::SplitDate { attribute } => {
                    split_date(row, attribute)?;
                }
                PlanStep::DeriveHash { target, attributes } => {
                    derive_hash_into(row, target, attributes)?;
                }
                PlanStep::Ensure(name) => {
                    let dimension = find_dimension(dimensions, name)?;
                    let key = dimension.ensure(row).await?;
                    row.set_key(dimension.key_attribute(), key)?;
                }
                PlanStep::Lookup(name) => {
                    let dimension = find_dimension(dimensions, name)?;
                    let Some(key) = dimension.lookup(row).await? else {
                        let lookup = row
                            .project(&dimension.spec().lookup_attributes)?
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join(", ");

                        bail!(
                            ErrorKind::DimensionMemberMissing,
                            "Row refers to a dimension member that does not exist",
                            format!("row {row_number}: no member of dimension '{name}' matches ({lookup})")
                        );
                    };
                    row.set_key(dimension.key_attribute(), key)?;
                }
            }
        }

        match plan.fact_mode() {
            FactWriteMode::Ensure => {
                if fact.ensure(row).await? == FactWrite::Skipped {
                    debug!(row = row_number, "fact already loaded");
                }
            }
            FactWriteMode::Insert => fact.insert(row).await?,
        }

        Ok(())
    }

    fn report(&self, rows_read: u64) -> LoadReport {
        let facts = self.fact.stats();

        LoadReport {
            rows_read,
            dimensions: self
                .dimensions
                .iter()
                .map(|dimension| (dimension.name().to_owned(), dimension.stats()))
                .collect(),
            facts_inserted: facts.inserted,
            facts_skipped: facts.skipped,
        }
    }

    fn require_init(&self, operation: &str) -> LoadResult<()> {
        if self.state != PipelineState::Init {
            bail!(
                ErrorKind::InvalidState,
                "Load pipeline is not in its initial state",
                format!("cannot {operation} in state {:?}", self.state)
            );
        }

        Ok(())
    }

    fn dimension_index(&self, name: &str) -> Option<usize> {
        self.dimensions
            .iter()
            .position(|dimension| dimension.name() == name)
    }

    fn transition(&mut self, state: PipelineState) {
        info!(from = ?self.state, to = ?state, "load pipeline state changed");
        self.state = state;
    }

    async fn fail_with_source<S>(&mut self, err: LoadError, source: &mut S) -> LoadError
    where
        S: Source,
    {
        let mut errors = vec![err];
        if let Err(err) = source.close().await {
            errors.push(err);
        }

        self.fail(errors).await
    }

    /// Moves to [`PipelineState::Failed`] and closes the warehouse without commit.
    async fn fail(&mut self, mut errors: Vec<LoadError>) -> LoadError {
        if let Some(err) = errors.first() {
            error!(error = %err, "load failed, closing warehouse without commit");
        }

        if let Err(err) = self.warehouse.close().await {
            errors.push(err);
        }
        self.transition(PipelineState::Failed);

        errors.into()
    }
}

fn find_dimension<'a, W>(
    dimensions: &'a mut [CachedDimension<W>],
    name: &str,
) -> LoadResult<&'a mut CachedDimension<W>>
where
    W: Warehouse,
{
    match dimensions.iter_mut().find(|dimension| dimension.name() == name) {
        Some(dimension) => Ok(dimension),
        None => bail!(
            ErrorKind::ConfigError,
            "Load plan refers to an unknown dimension",
            format!("dimension '{name}' is not registered")
        ),
    }
}
