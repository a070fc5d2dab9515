use dimload_config::shared::RetryConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{ErrorKind, LoadError, LoadResult};
use crate::types::{Predicate, TableName, TableRow, TableSchema, Value};
use crate::warehouse::Warehouse;

/// Bounded exponential backoff with full jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: u32,
}

impl RetryPolicy {
    /// Returns a policy that performs a single attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1,
        }
    }

    /// Returns the upper bound of the delay before retry number `attempt` (zero based).
    pub fn max_backoff(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1).saturating_pow(attempt.min(16));

        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Returns a random delay between zero and [`RetryPolicy::max_backoff`].
    pub fn backoff(&self, attempt: u32) -> Duration {
        let max = self.max_backoff(attempt).as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=max);

        Duration::from_millis(jitter)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_factor: config.backoff_factor,
        }
    }
}

/// Returns `true` for errors caused by connectivity that may succeed when retried.
pub fn is_transient(error: &LoadError) -> bool {
    matches!(
        error.kind(),
        ErrorKind::WarehouseConnectionFailed | ErrorKind::WarehouseIoError | ErrorKind::IoError
    )
}

/// Warehouse decorator retrying transient failures.
///
/// Every operation except [`Warehouse::commit`] and [`Warehouse::close`] is retried
/// according to the [`RetryPolicy`]. Those two are not idempotent from the caller's point
/// of view and fail on the first error.
#[derive(Debug, Clone)]
pub struct RetryingWarehouse<W> {
    inner: W,
    policy: RetryPolicy,
}

impl<W> RetryingWarehouse<W>
where
    W: Warehouse,
{
    pub fn new(inner: W, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &W {
        &self.inner
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut f: F) -> LoadResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LoadResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if is_transient(&err) && attempt + 1 < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        warehouse = W::name(),
                        operation,
                        attempt = attempt + 1,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient warehouse error, retrying"
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl<W> Warehouse for RetryingWarehouse<W>
where
    W: Warehouse + Sync,
{
    fn name() -> &'static str {
        W::name()
    }

    async fn create_table(&self, schema: &TableSchema) -> LoadResult<bool> {
        self.with_retry("create_table", move || self.inner.create_table(schema))
            .await
    }

    async fn insert(&self, table: &TableName, row: TableRow) -> LoadResult<()> {
        self.with_retry("insert", move || self.inner.insert(table, row.clone()))
            .await
    }

    async fn select(&self, table: &TableName, predicate: &Predicate) -> LoadResult<Vec<TableRow>> {
        self.with_retry("select", move || self.inner.select(table, predicate))
            .await
    }

    async fn update(
        &self,
        table: &TableName,
        predicate: &Predicate,
        assignments: &[(String, Value)],
    ) -> LoadResult<u64> {
        self.with_retry("update", move || {
            self.inner.update(table, predicate, assignments)
        })
        .await
    }

    async fn max_integer(&self, table: &TableName, column: &str) -> LoadResult<Option<i64>> {
        self.with_retry("max_integer", move || self.inner.max_integer(table, column))
            .await
    }

    async fn commit(&self) -> LoadResult<()> {
        self.inner.commit().await
    }

    async fn close(&self) -> LoadResult<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::load_error;
    use crate::types::{ColumnSchema, ColumnType};
    use crate::warehouse::memory::MemoryWarehouse;

    /// Fails the first `failures` selects and every commit with `kind`.
    #[derive(Debug, Clone)]
    struct FlakyWarehouse {
        inner: MemoryWarehouse,
        kind: ErrorKind,
        failures: u32,
        calls: Arc<AtomicU32>,
    }

    impl FlakyWarehouse {
        fn new(kind: ErrorKind, failures: u32) -> Self {
            Self {
                inner: MemoryWarehouse::new(),
                kind,
                failures,
                calls: Arc::new(AtomicU32::new(0)),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Warehouse for FlakyWarehouse {
        fn name() -> &'static str {
            "flaky"
        }

        async fn create_table(&self, schema: &TableSchema) -> LoadResult<bool> {
            self.inner.create_table(schema).await
        }

        async fn insert(&self, table: &TableName, row: TableRow) -> LoadResult<()> {
            self.inner.insert(table, row).await
        }

        async fn select(&self, table: &TableName, predicate: &Predicate) -> LoadResult<Vec<TableRow>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(load_error!(self.kind, "Injected failure"));
            }

            self.inner.select(table, predicate).await
        }

        async fn update(
            &self,
            table: &TableName,
            predicate: &Predicate,
            assignments: &[(String, Value)],
        ) -> LoadResult<u64> {
            self.inner.update(table, predicate, assignments).await
        }

        async fn max_integer(&self, table: &TableName, column: &str) -> LoadResult<Option<i64>> {
            self.inner.max_integer(table, column).await
        }

        async fn commit(&self) -> LoadResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(load_error!(self.kind, "Injected failure"))
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_factor: 2,
        }
    }

    async fn table(warehouse: &impl Warehouse) -> TableName {
        let schema = TableSchema::new(
            TableName::new("project", "dataset", "book"),
            vec![ColumnSchema::required("bookid", ColumnType::Integer)],
        );
        warehouse.create_table(&schema).await.unwrap();

        schema.name
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            backoff_factor: 3,
        };

        assert_eq!(policy.max_backoff(0), Duration::from_millis(100));
        assert_eq!(policy.max_backoff(1), Duration::from_millis(300));
        assert_eq!(policy.max_backoff(2), Duration::from_millis(900));
        assert_eq!(policy.max_backoff(3), Duration::from_millis(1_000));
        assert!(policy.backoff(10) <= Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let flaky = FlakyWarehouse::new(ErrorKind::WarehouseConnectionFailed, 2);
        let warehouse = RetryingWarehouse::new(flaky.clone(), policy(3));
        let table = table(&warehouse).await;

        let rows = warehouse.select(&table, &Predicate::all()).await.unwrap();

        assert!(rows.is_empty());
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn retries_stop_after_max_attempts() {
        let flaky = FlakyWarehouse::new(ErrorKind::WarehouseIoError, 10);
        let warehouse = RetryingWarehouse::new(flaky.clone(), policy(3));
        let table = table(&warehouse).await;

        let err = warehouse.select(&table, &Predicate::all()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::WarehouseIoError);
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn non_transient_errors_fail_immediately() {
        let flaky = FlakyWarehouse::new(ErrorKind::InvalidData, 10);
        let warehouse = RetryingWarehouse::new(flaky.clone(), policy(3));
        let table = table(&warehouse).await;

        warehouse.select(&table, &Predicate::all()).await.unwrap_err();

        assert_eq!(flaky.calls(), 1);
    }

    #[tokio::test]
    async fn commit_is_never_retried() {
        let flaky = FlakyWarehouse::new(ErrorKind::WarehouseConnectionFailed, 0);
        let warehouse = RetryingWarehouse::new(flaky.clone(), policy(5));

        warehouse.commit().await.unwrap_err();

        assert_eq!(flaky.calls(), 1);
    }
}
