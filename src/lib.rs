//! # Device Query
//!
//! A query service for diabetes device data. Clients send a small
//! declarative query language over HTTP; the service checks the caller,
//! resolves the target user to the storage id their records are filed
//! under, and returns the matching records as JSON.
//!
//! ## Modules
//!
//! - [`query`]: Lexer, parser, translator and executor for the query language
//! - [`storage`]: SQLite-backed device data store
//! - [`clients`]: Identity and permission-pair collaborators
//! - [`api`]: REST API server with Axum
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use device_query::query::{build_query, translate, QueryExecutor};
//! use device_query::storage::SqliteStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(SqliteStore::open("sqlite::memory:")?);
//!     let executor = QueryExecutor::new(store);
//!
//!     let descriptor = build_query(
//!         "METAQUERY WHERE userid IS 1234 QUERY TYPE IN basal SORT BY time AS Timestamp REVERSED",
//!     )?;
//!     let records = executor.execute(&translate(&descriptor, "g1234")).await?;
//!
//!     println!("Found {} records", records.len());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod clients;
pub mod config;
pub mod query;
pub mod storage;

// Re-export top-level types for convenience
pub use storage::{DeviceDataStore, Record, SqliteStore, StorageError, StorageResult};

pub use query::{
    build_query, translate, FilterSpec, ParseErrors, QueryDescriptor, QueryError, QueryExecutor,
    QueryIssue,
};

pub use clients::{
    Caller, ClientError, IdentityProvider, PermissionPair, PermissionStore, ResolveError,
    UserResolver,
};

pub use api::{build_router, serve, ApiError, AppState};

pub use config::{Config, ConfigError, LoggingConfig};
