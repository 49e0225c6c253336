//! Tenant gate middleware.
//!
//! - `X-Tenant-ID` + `X-API-Key` identify the tenant
//! - No `X-Tenant-ID` means the anonymous caller (when allowed)
//! - Metered routes charge the tenant's hourly window before the handler runs
//!
//! The resolved [`Caller`] is inserted as a request extension for handlers.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::error::ApiError;
use super::routes::AppState;
use crate::tenant::{Caller, GateError};

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const API_KEY_HEADER: &str = "x-api-key";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|h| h.to_str().ok())
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Caller, GateError> {
    state
        .gate
        .authenticate(header(headers, TENANT_HEADER), header(headers, API_KEY_HEADER))
}

/// Authenticate and charge the caller's quota.
pub async fn require_tenant(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let caller = match authenticate(&state, req.headers()) {
        Ok(caller) => caller,
        Err(e) => return ApiError::from(e).into_response(),
    };

    let decision = match state.gate.admit(&caller) {
        Ok(decision) => decision,
        Err(e) => return ApiError::from(e).into_response(),
    };

    req.extensions_mut().insert(caller);
    let mut response = next.run(req).await;

    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    response
}

/// Authenticate without charging the quota (usage queries).
pub async fn identify_tenant(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    match authenticate(&state, req.headers()) {
        Ok(caller) => {
            req.extensions_mut().insert(caller);
            next.run(req).await
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}
