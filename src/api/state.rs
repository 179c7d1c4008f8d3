//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clients::{IdentityProvider, PermissionStore, UserResolver};
use crate::config::Config;
use crate::query::QueryExecutor;
use crate::storage::DeviceDataStore;

pub use crate::config::ApiConfig;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Device data store, also used for readiness checks
    pub store: Arc<dyn DeviceDataStore>,
    /// Query executor bound to the store
    pub executor: Arc<QueryExecutor>,
    /// Session token checks
    pub identity: Arc<dyn IdentityProvider>,
    /// Target user to internal storage id
    pub resolver: UserResolver,
    /// API configuration
    pub config: Arc<ApiConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    /// Wire the store and collaborators together according to `config`
    pub fn new(
        store: Arc<dyn DeviceDataStore>,
        identity: Arc<dyn IdentityProvider>,
        permissions: Arc<dyn PermissionStore>,
        config: &Config,
    ) -> Self {
        let executor = QueryExecutor::new(Arc::clone(&store))
            .with_timeout(Duration::from_millis(config.store.query_timeout_ms));
        let resolver = UserResolver::new(
            Arc::clone(&identity),
            permissions,
            config.permissions.scope.clone(),
        );

        Self {
            store,
            executor: Arc::new(executor),
            identity,
            resolver,
            config: Arc::new(config.api.clone()),
            start_time: Instant::now(),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
