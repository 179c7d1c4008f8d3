//! External Collaborators
//!
//! The query service depends on two outside services:
//! - an identity service, which checks session tokens and looks up users
//! - a permission-pair service, which maps a user to the internal storage
//!   id their device data is filed under
//!
//! Both sit behind traits so the API can run against HTTP clients in
//! production and fixed tables in development and tests.

mod identity;
mod permissions;
mod resolver;

pub use identity::{HttpIdentityProvider, StaticIdentityProvider, SESSION_TOKEN_HEADER};
pub use permissions::{HttpPermissionStore, StaticPermissionStore};
pub use resolver::{ResolveError, ResolvedUser, UserResolver};

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use crate::config::{ClientKind, IdentityConfig, PermissionsConfig};
use crate::query::UserRef;

/// An authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub is_server: bool,
    /// The session token the caller presented, reused for downstream calls
    pub token: String,
}

/// The private pair stored for a user under a scope
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PermissionPair {
    /// Internal storage id the user's records are filed under
    pub id: String,
    #[serde(default)]
    pub key: String,
}

/// Checks session tokens and looks up users
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Validate a session token. `None` when the token is not accepted.
    async fn authenticate(&self, token: &str) -> Result<Option<Caller>, ClientError>;

    /// The user id behind `user`, or `None` if no such user exists
    async fn lookup_user(
        &self,
        user: &UserRef,
        caller: &Caller,
    ) -> Result<Option<String>, ClientError>;
}

/// Looks up private permission pairs
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// The pair stored for `user_id` under `scope`, if any
    async fn private_pair(
        &self,
        user_id: &str,
        scope: &str,
        caller: &Caller,
    ) -> Result<Option<PermissionPair>, ClientError>;
}

/// Errors talking to a collaborator
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Service unavailable")]
    Unavailable,

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Request timeout")]
    Timeout,
}

impl ClientError {
    pub(crate) fn from_send(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else if e.is_connect() {
            ClientError::Unavailable
        } else {
            ClientError::Request(e)
        }
    }
}

/// Build the identity provider named by the configuration
pub fn identity_from_config(
    config: &IdentityConfig,
) -> Result<Arc<dyn IdentityProvider>, ClientError> {
    let provider: Arc<dyn IdentityProvider> = match config.kind {
        ClientKind::Http => Arc::new(HttpIdentityProvider::new(config)?),
        ClientKind::Static => Arc::new(StaticIdentityProvider::from_config(config)),
    };
    Ok(provider)
}

/// Build the permission store named by the configuration
pub fn permissions_from_config(
    config: &PermissionsConfig,
    server_token: Option<String>,
) -> Result<Arc<dyn PermissionStore>, ClientError> {
    let store: Arc<dyn PermissionStore> = match config.kind {
        ClientKind::Http => Arc::new(HttpPermissionStore::new(config, server_token)?),
        ClientKind::Static => Arc::new(StaticPermissionStore::from_config(config)),
    };
    Ok(store)
}
