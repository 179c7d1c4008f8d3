//! Query Routes
//!
//! - POST /api/v1/query - Execute a device data query
//!
//! The request body is the raw query text. The caller authenticates with a
//! session token, either `Authorization: Bearer <token>` or the session
//! token header.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap},
    Json,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::clients::{Caller, SESSION_TOKEN_HEADER};
use crate::query::{build_query, translate};
use crate::storage::Record;

/// POST /api/v1/query
///
/// Parse, resolve, translate and run a query, returning the matching
/// records as a JSON array.
pub async fn execute_query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Vec<Record>>> {
    let caller = authorize(&state, &headers).await?;

    let text = std::str::from_utf8(&body)
        .ok()
        .filter(|t| !t.trim().is_empty())
        .ok_or(ApiError::EmptyQuery)?;

    info!(caller = %caller.user_id, query = %text, "Query: starting");

    let descriptor = build_query(text)?;
    debug!(descriptor = ?descriptor, "Query: built");

    let target = state
        .resolver
        .resolve(&descriptor.meta_query.user_ref(), &caller)
        .await?;

    let spec = translate(&descriptor, &target.internal_id);
    let records = state.executor.execute(&spec).await?;

    info!(
        user_id = %target.user_id,
        records = records.len(),
        "Query: finished"
    );
    Ok(Json(records))
}

/// The session token presented with a request
fn session_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    bearer
        .or_else(|| {
            headers
                .get(SESSION_TOKEN_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
        })
        .filter(|t| !t.is_empty())
}

async fn authorize(state: &AppState, headers: &HeaderMap) -> ApiResult<Caller> {
    let token = session_token(headers).ok_or(ApiError::Unauthorized)?;

    match state.identity.authenticate(token).await {
        Ok(Some(caller)) => Ok(caller),
        Ok(None) => Err(ApiError::Unauthorized),
        Err(e) => {
            warn!(error = %e, "Token check failed");
            Err(ApiError::Unauthorized)
        }
    }
}
