//! User Resolution
//!
//! Maps the user a query targets onto the internal storage id their
//! records are filed under: identity lookup first, then the private
//! permission pair for the configured scope.

use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::{Caller, ClientError, IdentityProvider, PermissionStore};
use crate::query::UserRef;

/// Why a target user could not be resolved
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("user {0} not found")]
    UnknownUser(String),

    #[error("no {scope} pair for user {user_id}")]
    MissingPair { user_id: String, scope: String },

    #[error("collaborator error: {0}")]
    Client(#[from] ClientError),
}

/// A resolved target user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUser {
    pub user_id: String,
    pub internal_id: String,
}

/// Resolves query targets through the identity and permission services
#[derive(Clone)]
pub struct UserResolver {
    identity: Arc<dyn IdentityProvider>,
    permissions: Arc<dyn PermissionStore>,
    scope: String,
}

impl UserResolver {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        permissions: Arc<dyn PermissionStore>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            permissions,
            scope: scope.into(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Resolve `user` on behalf of `caller`
    pub async fn resolve(
        &self,
        user: &UserRef,
        caller: &Caller,
    ) -> Result<ResolvedUser, ResolveError> {
        let user_id = self
            .identity
            .lookup_user(user, caller)
            .await?
            .ok_or_else(|| ResolveError::UnknownUser(user.to_string()))?;

        let pair = self
            .permissions
            .private_pair(&user_id, &self.scope, caller)
            .await?
            .ok_or_else(|| ResolveError::MissingPair {
                user_id: user_id.clone(),
                scope: self.scope.clone(),
            })?;

        debug!(user_id = %user_id, "Resolved query target");
        Ok(ResolvedUser {
            user_id,
            internal_id: pair.id,
        })
    }
}
