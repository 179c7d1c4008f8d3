//! Query Executor
//!
//! Runs a translated [`FilterSpec`] against a [`DeviceDataStore`] and shapes
//! the output records:
//! 1. Fetch matching records, ordered by the sort field
//! 2. Drop storage-internal attributes (names starting with `_`)
//! 3. Rename the sort attribute to the requested alias
//!
//! # Execution Pipeline
//!
//! ```text
//! FilterSpec → Store (bounded by timeout) → Shape → Vec<Record>
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::query::error::{QueryError, QueryResult};
use crate::query::translator::FilterSpec;
use crate::storage::{DeviceDataStore, Record, StorageError};

/// Default bound on a single store query
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Query executor
pub struct QueryExecutor {
    store: Arc<dyn DeviceDataStore>,
    timeout: Duration,
}

impl QueryExecutor {
    /// Create a new query executor
    pub fn new(store: Arc<dyn DeviceDataStore>) -> Self {
        Self {
            store,
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Bound every store query by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute a translated query.
    ///
    /// An empty vector means nothing matched. A timed-out or interrupted
    /// query is [`QueryError::Aborted`], never an empty result.
    pub async fn execute(&self, spec: &FilterSpec) -> QueryResult<Vec<Record>> {
        let start = Instant::now();

        let records = match tokio::time::timeout(self.timeout, self.store.find(spec)).await {
            Ok(Ok(records)) => records,
            Ok(Err(StorageError::Interrupted)) => {
                return Err(QueryError::Aborted("store query was interrupted".to_string()))
            }
            Ok(Err(e)) => return Err(QueryError::Store(e)),
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Store query timed out");
                return Err(QueryError::Aborted(format!(
                    "store query exceeded {}ms",
                    self.timeout.as_millis()
                )));
            }
        };

        let shaped: Vec<Record> = records
            .into_iter()
            .map(|record| shape(record, &spec.sort.field, &spec.output_alias))
            .collect();

        debug!(
            records = shaped.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Query executed"
        );

        Ok(shaped)
    }
}

/// Strip internal attributes and rename the sort attribute in place,
/// keeping attribute order
fn shape(record: Record, sort_field: &str, alias: &str) -> Record {
    record
        .into_iter()
        .filter(|(key, _)| !key.starts_with('_'))
        .map(|(key, value)| {
            if key == sort_field {
                (alias.to_string(), value)
            } else {
                (key, value)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{build_query, translate};
    use crate::storage::{fixture_store, StorageResult};
    use async_trait::async_trait;
    use serde_json::Value;

    const QUERY_WHERE_AND: &str = "METAQUERY WHERE userid IS 1234 QUERY TYPE IN settings WHERE time >= 2014-10-23T07:00:00.000Z AND time < 2014-10-23T08:00:00.000Z SORT BY time AS Timestamp REVERSED";
    const QUERY_WHERE: &str = "METAQUERY WHERE userid IS 1234 QUERY TYPE IN basal WHERE time <= 2014-10-23T08:00:00.000Z SORT BY time AS Timestamp REVERSED";
    const QUERY_WHERE_IN: &str = "METAQUERY WHERE userid IS 1234 QUERY TYPE IN basal, settings WHERE uploadId NOT IN test-data3, test-data2 SORT BY time AS Timestamp REVERSED";

    fn create_test_executor() -> QueryExecutor {
        QueryExecutor::new(Arc::new(fixture_store()))
    }

    async fn run(executor: &QueryExecutor, text: &str) -> QueryResult<Vec<Record>> {
        let descriptor = build_query(text).unwrap();
        executor.execute(&translate(&descriptor, "g1234")).await
    }

    fn ids(records: &[Record]) -> Vec<&str> {
        records
            .iter()
            .map(|r| r.get("id").and_then(Value::as_str).unwrap_or(""))
            .collect()
    }

    #[tokio::test]
    async fn test_where_and_query() {
        let executor = create_test_executor();
        let records = run(&executor, QUERY_WHERE_AND).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["type"], "settings");
        assert_eq!(records[0]["Timestamp"], "2014-10-23T07:15:00.000Z");
    }

    #[tokio::test]
    async fn test_where_query() {
        let executor = create_test_executor();
        let records = run(&executor, QUERY_WHERE).await.unwrap();

        assert_eq!(ids(&records), vec!["b-0002", "b-0001"]);
        assert!(records.iter().all(|r| r["type"] == "basal"));
    }

    #[tokio::test]
    async fn test_where_not_in_query() {
        let executor = create_test_executor();
        let records = run(&executor, QUERY_WHERE_IN).await.unwrap();

        assert_eq!(
            ids(&records),
            vec!["b-0004", "b-0002", "s-0001", "b-0001", "s-0003"]
        );
        for record in &records {
            let upload = record["uploadId"].as_str().unwrap();
            assert!(upload != "test-data2" && upload != "test-data3");
        }
    }

    #[tokio::test]
    async fn test_reversed_flips_order() {
        let executor = create_test_executor();
        let forward = run(
            &executor,
            "METAQUERY WHERE userid IS 1234 QUERY TYPE IN basal, settings WHERE uploadId NOT IN test-data3, test-data2 SORT BY time AS Timestamp",
        )
        .await
        .unwrap();
        let mut reversed = run(&executor, QUERY_WHERE_IN).await.unwrap();
        reversed.reverse();

        assert_eq!(ids(&forward), ids(&reversed));
    }

    #[tokio::test]
    async fn test_in_union_and_not_in_complement() {
        let executor = create_test_executor();
        let all = run(
            &executor,
            "METAQUERY WHERE userid IS 1234 QUERY TYPE IN cbg, smbg, basal SORT BY time AS t",
        )
        .await
        .unwrap();
        let included = run(
            &executor,
            "METAQUERY WHERE userid IS 1234 QUERY TYPE IN cbg, smbg, basal WHERE uploadId IN test-data1, test-data2 SORT BY time AS t",
        )
        .await
        .unwrap();
        let excluded = run(
            &executor,
            "METAQUERY WHERE userid IS 1234 QUERY TYPE IN cbg, smbg, basal WHERE uploadId NOT IN test-data1, test-data2 SORT BY time AS t",
        )
        .await
        .unwrap();

        assert_eq!(included.len() + excluded.len(), all.len());
        let mut union: Vec<&str> = ids(&included);
        union.extend(ids(&excluded));
        union.sort_unstable();
        let mut expected = ids(&all);
        expected.sort_unstable();
        assert_eq!(union, expected);
    }

    #[tokio::test]
    async fn test_not_in_keeps_records_without_field() {
        let executor = create_test_executor();
        let records = run(
            &executor,
            "METAQUERY WHERE userid IS 1234 QUERY TYPE IN cbg WHERE uploadId NOT IN test-data1 SORT BY time AS t",
        )
        .await
        .unwrap();

        assert_eq!(ids(&records), vec!["c-0002"]);
    }

    #[tokio::test]
    async fn test_other_users_records_are_never_returned() {
        let executor = create_test_executor();
        let records = run(
            &executor,
            "METAQUERY WHERE userid IS 1234 QUERY TYPE IN basal SORT BY time AS t",
        )
        .await
        .unwrap();

        assert_eq!(records.len(), 4);
        assert!(!ids(&records).contains(&"b-9001"));
    }

    #[tokio::test]
    async fn test_no_matches_is_empty() {
        let executor = create_test_executor();
        let records = run(
            &executor,
            "METAQUERY WHERE userid IS 1234 QUERY TYPE IN food SORT BY time AS t",
        )
        .await
        .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_output_shape() {
        let executor = create_test_executor();
        let records = run(&executor, QUERY_WHERE_AND).await.unwrap();
        let record = &records[0];

        assert!(record.get("time").is_none());
        assert!(record.get("_groupId").is_none());
        assert_eq!(record["deviceTime"], "2014-10-23T07:15:00");

        // The alias takes the sort attribute's position
        let keys: Vec<&String> = record.keys().collect();
        let alias_pos = keys.iter().position(|k| *k == "Timestamp").unwrap();
        let device_time_pos = keys.iter().position(|k| *k == "deviceTime").unwrap();
        assert_eq!(alias_pos + 1, device_time_pos);

        let json = serde_json::to_string(&records).unwrap();
        assert!(json.contains("\"Timestamp\":\"2014-10-23T07:15:00.000Z\""));
    }

    #[tokio::test]
    async fn test_deterministic() {
        let executor = create_test_executor();
        let first = run(&executor, QUERY_WHERE_IN).await.unwrap();
        let second = run(&executor, QUERY_WHERE_IN).await.unwrap();
        assert_eq!(first, second);
    }

    struct SlowStore;

    #[async_trait]
    impl DeviceDataStore for SlowStore {
        async fn find(&self, _spec: &FilterSpec) -> StorageResult<Vec<Record>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }

        async fn ping(&self) -> StorageResult<()> {
            Ok(())
        }
    }

    struct FailingStore(fn() -> StorageError);

    #[async_trait]
    impl DeviceDataStore for FailingStore {
        async fn find(&self, _spec: &FilterSpec) -> StorageResult<Vec<Record>> {
            Err((self.0)())
        }

        async fn ping(&self) -> StorageResult<()> {
            Err((self.0)())
        }
    }

    #[tokio::test]
    async fn test_timeout_is_aborted_not_empty() {
        let executor =
            QueryExecutor::new(Arc::new(SlowStore)).with_timeout(Duration::from_millis(20));
        let err = run(&executor, QUERY_WHERE).await.unwrap_err();
        assert!(matches!(err, QueryError::Aborted(_)));
    }

    #[tokio::test]
    async fn test_store_faults() {
        let executor = QueryExecutor::new(Arc::new(FailingStore(|| {
            StorageError::Connection("refused".to_string())
        })));
        let err = run(&executor, QUERY_WHERE).await.unwrap_err();
        assert!(matches!(err, QueryError::Store(StorageError::Connection(_))));

        let executor = QueryExecutor::new(Arc::new(FailingStore(|| StorageError::Interrupted)));
        let err = run(&executor, QUERY_WHERE).await.unwrap_err();
        assert!(matches!(err, QueryError::Aborted(_)));
    }
}
