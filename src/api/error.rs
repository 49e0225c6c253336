//! HTTP-facing error taxonomy.
//!
//! Every failure leaves the server as `{"error": <kind>, "message": <text>}`
//! with the matching status code. Internal details (panics, backtraces) never
//! reach the body.

use std::time::Duration;

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use super::types::ErrorBody;
use crate::agents::DispatchError;
use crate::tenant::GateError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    MethodNotAllowed(String),

    #[error("Rate limit of {limit} requests per hour exceeded")]
    RateLimited { limit: u32, retry_after: Duration },

    #[error("{0}")]
    Uninstantiable(String),

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Uninstantiable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::MethodNotAllowed(_) => "method_not_allowed",
            Self::RateLimited { .. } => "rate_limited",
            Self::Uninstantiable(_) => "agent_unavailable",
            Self::BadRequest(_) => "bad_request",
        }
    }
}

impl From<GateError> for ApiError {
    fn from(error: GateError) -> Self {
        match error {
            GateError::Unauthorized(message) => Self::Unauthorized(message),
            GateError::RateLimited { limit, retry_after } => Self::RateLimited { limit, retry_after },
            GateError::UnknownTenant(_) => Self::NotFound(error.to_string()),
            GateError::UnknownPlan(_) => Self::BadRequest(error.to_string()),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(error: DispatchError) -> Self {
        match error {
            DispatchError::NotFound { .. } => Self::NotFound(error.to_string()),
            DispatchError::Uninstantiable { .. } => Self::Uninstantiable(error.to_string()),
        }
    }
}

/// Whole seconds until retry, rounded up and at least 1.
pub(crate) fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.kind().to_string(),
            message: self.to_string(),
        };
        let mut response = (self.status(), Json(body)).into_response();

        if let Self::RateLimited { limit, retry_after } = &self {
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(*limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(0u32));
            headers.insert(
                axum::http::header::RETRY_AFTER,
                HeaderValue::from(retry_after_secs(*retry_after)),
            );
        }
        response
    }
}
