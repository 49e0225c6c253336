//! HTTP API for agent dispatch.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check (no credentials, not metered)
//! - `GET /cores` - List cores with agent counts
//! - `GET /cores/{category}` - Agents of one core
//! - `GET /agents/{category}/{id}` - Agent descriptor
//! - `POST /agents/{category}/{id}/execute` - Run an agent
//! - `GET /usage/{tenant_id}` - Requests recorded in the current hour (not metered)
//!
//! Requests identify the tenant with `X-Tenant-ID` / `X-API-Key`.

mod auth;
mod error;
mod routes;
pub mod types;

pub use auth::{API_KEY_HEADER, TENANT_HEADER};
pub use error::ApiError;
pub use routes::{router, serve, AppState};
pub use types::*;
