//! API Error Types
//!
//! Defines error types for the API layer and implements conversion
//! to HTTP responses with appropriate status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::clients::ResolveError;
use crate::query::{ParseErrors, QueryError, QueryIssue};

/// Reason sent when there is no query text to build from
pub const ERROR_READING_QUERY: &str = "There was an issue trying to build the query to run";

/// Reason sent when the query's target user cannot be resolved
pub const ERROR_GETTING_UPLOAD_ID: &str = "userid not found";

/// Reason sent when the store fails to run a query
pub const ERROR_RUNNING_QUERY: &str = "There was an issue running the query";

/// API error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// Missing or rejected session token
    #[error("Unauthorized")]
    Unauthorized,

    /// Empty or unreadable request body
    #[error("There was an issue trying to build the query to run")]
    EmptyQuery,

    /// The query text has syntax or validation errors
    #[error("{0}")]
    Parse(ParseErrors),

    /// The query's target user could not be resolved
    #[error("User resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    /// Query execution failed or was aborted
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ParseErrors> for ApiError {
    fn from(errors: ParseErrors) -> Self {
        ApiError::Parse(errors)
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<QueryIssue>>,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::EmptyQuery
            | ApiError::Parse(_)
            | ApiError::Resolve(_)
            | ApiError::Query(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) | ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn reason(&self) -> String {
        match self {
            ApiError::Resolve(_) => ERROR_GETTING_UPLOAD_ID.to_string(),
            ApiError::Query(QueryError::Store(_)) => ERROR_RUNNING_QUERY.to_string(),
            ApiError::Internal(_) | ApiError::Io(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if matches!(self, ApiError::Unauthorized) {
            tracing::warn!("Query: failed authorization");
            return status.into_response();
        }

        let request_id = uuid::Uuid::new_v4().to_string();

        // Client mistakes are routine; collaborator and store faults are not
        match &self {
            ApiError::EmptyQuery | ApiError::Parse(_) => tracing::warn!(
                request_id = %request_id,
                status = status.as_u16(),
                error_message = %self,
                "Query rejected"
            ),
            _ => tracing::error!(
                request_id = %request_id,
                status = status.as_u16(),
                error_message = %self,
                "API error occurred"
            ),
        }

        let reason = self.reason();
        let errors = match self {
            ApiError::Parse(errors) => Some(errors.into_inner()),
            _ => None,
        };

        let body = ErrorResponse {
            code: status.as_u16(),
            reason,
            errors,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;
