//! SQLite document store
//!
//! Device data records are stored as JSON text in a single table and filtered
//! with SQLite's JSON functions. Every query opens its own read-only
//! connection and runs on the blocking pool; dropping the awaiting future
//! interrupts the statement.

use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, InterruptHandle, OpenFlags};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

use crate::query::FilterSpec;
use crate::storage::sql::{self, CompiledQuery, TABLE};
use crate::storage::{DeviceDataStore, Record, StorageError, StorageResult};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the database lives
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Path(PathBuf),
    /// A `file:` URI, including private shared-cache memory databases
    Uri(String),
}

impl Target {
    fn parse(connection_string: &str) -> StorageResult<Self> {
        let s = connection_string.trim();
        if s.is_empty() {
            return Err(StorageError::Connection(
                "empty connection string".to_string(),
            ));
        }
        if s == ":memory:" || s == "sqlite::memory:" {
            // Each store gets its own named memory database so per-query
            // connections see the same data
            return Ok(Target::Uri(format!(
                "file:device-query-{}?mode=memory&cache=shared",
                uuid::Uuid::new_v4()
            )));
        }
        if s.starts_with("file:") {
            return Ok(Target::Uri(s.to_string()));
        }
        let path = s.strip_prefix("sqlite://").unwrap_or(s);
        if path.is_empty() {
            return Err(StorageError::Connection(format!(
                "no database path in '{}'",
                connection_string
            )));
        }
        Ok(Target::Path(PathBuf::from(path)))
    }

    fn is_memory(&self) -> bool {
        matches!(self, Target::Uri(uri) if uri.contains("mode=memory"))
    }

    fn open(&self, flags: OpenFlags) -> StorageResult<Connection> {
        let conn = match self {
            Target::Path(path) => Connection::open_with_flags(path, flags),
            Target::Uri(uri) => {
                Connection::open_with_flags(uri, flags | OpenFlags::SQLITE_OPEN_URI)
            }
        }
        .map_err(|e| StorageError::Connection(e.to_string()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }
}

/// Interrupts the running statement unless disarmed first
struct InterruptOnDrop {
    handle: Option<InterruptHandle>,
}

impl InterruptOnDrop {
    fn new(handle: InterruptHandle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    fn disarm(mut self) {
        self.handle = None;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("Interrupting abandoned store query");
            handle.interrupt();
        }
    }
}

/// Device data store backed by SQLite
pub struct SqliteStore {
    target: Target,
    // Memory databases vanish with their last connection
    _keepalive: Option<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (and create if needed) the store named by `connection_string`.
    ///
    /// Accepts a plain path, `sqlite://path`, a `file:` URI, or
    /// `sqlite::memory:` / `:memory:` for a private in-memory store.
    pub fn open(connection_string: &str) -> StorageResult<Self> {
        let target = Target::parse(connection_string)?;

        if let Target::Path(path) = &target {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = target.open(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        if !target.is_memory() {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                ",
            )?;
        }

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    doc TEXT NOT NULL
                )",
                TABLE
            ),
            [],
        )?;

        info!(location = ?target, "Opened device data store");

        let keepalive = target.is_memory().then(|| Mutex::new(conn));
        Ok(Self {
            target,
            _keepalive: keepalive,
        })
    }

    /// Open a store in a file at `path`
    pub fn open_path(path: &Path) -> StorageResult<Self> {
        Self::open(&path.to_string_lossy())
    }

    fn connect_read_only(&self) -> StorageResult<Connection> {
        let conn = self
            .target
            .open(OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX)?;
        conn.execute_batch("PRAGMA query_only = ON;")?;
        Ok(conn)
    }

    /// Append documents in one transaction. Every document must be a JSON
    /// object. Returns the number of documents written.
    pub fn insert_documents(&self, documents: &[Value]) -> StorageResult<usize> {
        for (i, doc) in documents.iter().enumerate() {
            if !doc.is_object() {
                return Err(StorageError::Serialization(format!(
                    "document {} is not a JSON object",
                    i
                )));
            }
        }

        let mut conn = self.target.open(
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!("INSERT INTO {} (doc) VALUES (?1)", TABLE))?;
            for doc in documents {
                stmt.execute(params![serde_json::to_string(doc)?])?;
            }
        }
        tx.commit()?;

        debug!(count = documents.len(), "Inserted documents");
        Ok(documents.len())
    }

    /// Number of stored documents
    pub fn count(&self) -> StorageResult<u64> {
        let conn = self.connect_read_only()?;
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", TABLE), [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn run_select(conn: &Connection, compiled: &CompiledQuery) -> StorageResult<Vec<Record>> {
    let mut stmt = conn.prepare(&compiled.sql)?;
    let mut rows = stmt.query(params_from_iter(compiled.params.iter()))?;

    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let seq: i64 = row.get(0)?;
        let doc: String = row.get(1)?;
        match serde_json::from_str::<Value>(&doc) {
            Ok(Value::Object(map)) => records.push(map),
            Ok(_) => {
                return Err(StorageError::MalformedDocument {
                    seq,
                    reason: "not a JSON object".to_string(),
                })
            }
            Err(e) => {
                return Err(StorageError::MalformedDocument {
                    seq,
                    reason: e.to_string(),
                })
            }
        }
    }
    Ok(records)
}

impl SqliteStore {
    /// Run a compiled select on the blocking pool. Dropping the returned
    /// future interrupts the statement.
    async fn select(&self, compiled: CompiledQuery) -> StorageResult<Vec<Record>> {
        let conn = self.connect_read_only()?;
        let guard = InterruptOnDrop::new(conn.get_interrupt_handle());

        let result = tokio::task::spawn_blocking(move || run_select(&conn, &compiled))
            .await
            .map_err(|e| StorageError::Worker(e.to_string()))?;

        guard.disarm();
        result
    }
}

#[async_trait]
impl DeviceDataStore for SqliteStore {
    async fn find(&self, spec: &FilterSpec) -> StorageResult<Vec<Record>> {
        let compiled = sql::compile(spec);
        debug!(sql = %compiled.sql, params = compiled.params.len(), "Compiled filter");
        self.select(compiled).await
    }

    async fn ping(&self) -> StorageResult<()> {
        let conn = self.connect_read_only()?;
        tokio::task::spawn_blocking(move || -> StorageResult<()> {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Worker(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{build_query, translate, QueryError, QueryExecutor};
    use crate::storage::fixture_documents;
    use std::sync::Arc;
    use serde_json::json;
    use tempfile::TempDir;

    fn ids(records: &[Record]) -> Vec<&str> {
        records
            .iter()
            .map(|r| r.get("id").and_then(Value::as_str).unwrap_or(""))
            .collect()
    }

    async fn find(store: &SqliteStore, text: &str) -> StorageResult<Vec<Record>> {
        let descriptor = build_query(text).unwrap();
        store.find(&translate(&descriptor, "g1234")).await
    }

    #[test]
    fn test_parse_connection_strings() {
        assert_eq!(
            Target::parse("/var/lib/data.db").unwrap(),
            Target::Path(PathBuf::from("/var/lib/data.db"))
        );
        assert_eq!(
            Target::parse("sqlite://data/dev.db").unwrap(),
            Target::Path(PathBuf::from("data/dev.db"))
        );
        assert!(matches!(
            Target::parse("file:shared?mode=ro").unwrap(),
            Target::Uri(_)
        ));
        assert!(Target::parse("sqlite::memory:").unwrap().is_memory());
        assert!(Target::parse("  ").is_err());
        assert!(Target::parse("sqlite://").is_err());
    }

    #[test]
    fn test_memory_stores_are_isolated() {
        let a = SqliteStore::open("sqlite::memory:").unwrap();
        let b = SqliteStore::open(":memory:").unwrap();
        a.insert_documents(&[json!({"type": "cbg"})]).unwrap();

        assert_eq!(a.count().unwrap(), 1);
        assert_eq!(b.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_file_store_persists() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("device.db");

        {
            let store = SqliteStore::open_path(&path).unwrap();
            store.insert_documents(&fixture_documents()).unwrap();
        }

        let store = SqliteStore::open_path(&path).unwrap();
        assert_eq!(store.count().unwrap(), 12);
        store.ping().await.unwrap();

        let records = find(
            &store,
            "METAQUERY WHERE userid IS 1234 QUERY TYPE IN settings WHERE time >= 2014-10-23T07:00:00.000Z AND time < 2014-10-23T08:00:00.000Z SORT BY time AS Timestamp REVERSED",
        )
        .await
        .unwrap();
        assert_eq!(ids(&records), vec!["s-0001"]);
    }

    #[tokio::test]
    async fn test_find_orders_and_breaks_ties_by_insertion() {
        let store = SqliteStore::open("sqlite::memory:").unwrap();
        store
            .insert_documents(&[
                json!({"id": "x", "_groupId": "g1234", "type": "cbg", "time": "2014-10-23T07:00:00.000Z"}),
                json!({"id": "y", "_groupId": "g1234", "type": "cbg", "time": "2014-10-23T06:00:00.000Z"}),
                json!({"id": "z", "_groupId": "g1234", "type": "cbg", "time": "2014-10-23T07:00:00.000Z"}),
            ])
            .unwrap();

        let asc = find(&store, "METAQUERY WHERE userid IS 1 QUERY TYPE IN cbg SORT BY time AS t")
            .await
            .unwrap();
        assert_eq!(ids(&asc), vec!["y", "x", "z"]);

        let desc = find(
            &store,
            "METAQUERY WHERE userid IS 1 QUERY TYPE IN cbg SORT BY time AS t REVERSED",
        )
        .await
        .unwrap();
        assert_eq!(ids(&desc), vec!["x", "z", "y"]);
    }

    #[tokio::test]
    async fn test_numeric_comparison() {
        let store = SqliteStore::open("sqlite::memory:").unwrap();
        store.insert_documents(&fixture_documents()).unwrap();

        let records = find(
            &store,
            "METAQUERY WHERE userid IS 1234 QUERY TYPE IN basal WHERE rate >= 0.85 SORT BY rate AS r",
        )
        .await
        .unwrap();
        assert_eq!(ids(&records), vec!["b-0002", "b-0004"]);
    }

    #[tokio::test]
    async fn test_malformed_document_is_reported() {
        let store = SqliteStore::open("sqlite::memory:").unwrap();
        {
            let guard = store._keepalive.as_ref().unwrap().lock().unwrap();
            guard
                .execute(
                    "INSERT INTO device_data (doc) VALUES (?1)",
                    params![r#"{"_groupId": "g1234", "type": "cbg"#],
                )
                .unwrap();
        }

        let err = find(&store, "METAQUERY WHERE userid IS 1 QUERY TYPE IN cbg SORT BY time AS t")
            .await
            .unwrap_err();
        // json_extract rejects the text before the row ever reaches us
        assert!(matches!(
            err,
            StorageError::Sqlite(_) | StorageError::MalformedDocument { .. }
        ));
    }

    #[test]
    fn test_insert_rejects_non_objects() {
        let store = SqliteStore::open("sqlite::memory:").unwrap();
        let err = store
            .insert_documents(&[json!({"type": "cbg"}), json!([1, 2])])
            .unwrap_err();
        assert!(err.to_string().contains("document 1"));
        assert_eq!(store.count().unwrap(), 0);
    }

    /// Counts for a long time and never yields a row
    fn stalled_query() -> CompiledQuery {
        CompiledQuery {
            sql: "WITH RECURSIVE counter(n) AS (
                      SELECT 1 UNION ALL SELECT n + 1 FROM counter WHERE n < 2000000000
                  )
                  SELECT n, '{}' FROM counter WHERE n < 0"
                .to_string(),
            params: Vec::new(),
        }
    }

    struct StalledStore(SqliteStore);

    #[async_trait]
    impl DeviceDataStore for StalledStore {
        async fn find(&self, _spec: &FilterSpec) -> StorageResult<Vec<Record>> {
            self.0.select(stalled_query()).await
        }

        async fn ping(&self) -> StorageResult<()> {
            self.0.ping().await
        }
    }

    #[test]
    fn test_dropped_guard_interrupts_statement() {
        let store = SqliteStore::open("sqlite::memory:").unwrap();
        let conn = store.connect_read_only().unwrap();
        let guard = InterruptOnDrop::new(conn.get_interrupt_handle());

        let worker = std::thread::spawn(move || run_select(&conn, &stalled_query()));
        std::thread::sleep(Duration::from_millis(100));
        drop(guard);

        let result = worker.join().unwrap();
        assert!(matches!(result, Err(StorageError::Interrupted)));
    }

    #[test]
    fn test_timed_out_query_is_aborted_and_interrupted() {
        // One blocking thread: the follow-up ping can only run once the
        // stalled statement has been interrupted
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .max_blocking_threads(1)
            .build()
            .unwrap();

        runtime.block_on(async {
            let store = Arc::new(StalledStore(SqliteStore::open("sqlite::memory:").unwrap()));
            let executor =
                QueryExecutor::new(store.clone()).with_timeout(Duration::from_millis(100));

            let descriptor = build_query(
                "METAQUERY WHERE userid IS 1234 QUERY TYPE IN basal SORT BY time AS t",
            )
            .unwrap();
            let err = executor
                .execute(&translate(&descriptor, "g1234"))
                .await
                .unwrap_err();
            assert!(matches!(err, QueryError::Aborted(_)), "{:?}", err);

            let ping = tokio::time::timeout(Duration::from_secs(10), store.ping()).await;
            assert!(matches!(ping, Ok(Ok(()))));
        });
    }

    #[tokio::test]
    async fn test_read_connections_cannot_write() {
        let store = SqliteStore::open("sqlite::memory:").unwrap();
        let conn = store.connect_read_only().unwrap();
        let result = conn.execute("INSERT INTO device_data (doc) VALUES ('{}')", []);
        assert!(result.is_err());
    }
}
