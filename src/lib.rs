//! # Agent Dispatch
//!
//! Multi-tenant HTTP service that runs business agents on demand.
//!
//! ## Request Flow
//!
//! ```text
//!   request ──▶ TenantGate ──▶ Dispatcher ──▶ AgentRegistry
//!               (auth, quota)   (timeout,       (cores, agents,
//!                               normalize)       manifests)
//! ```
//!
//! 1. Authenticate `X-Tenant-ID` / `X-API-Key` and charge the hourly window
//! 2. Resolve `<category>/<id>` in the registry
//! 3. Instantiate the agent for the tenant and call its preferred operation
//! 4. Return the result wrapped in an execution envelope
//!
//! ## Modules
//! - `agents`: registry, built-in agents, manifest templates and the dispatcher
//! - `tenant`: credentials, plans and the sliding-window rate limiter
//! - `api`: axum routes and middleware

pub mod agents;
pub mod api;
pub mod config;
pub mod tenant;
pub mod util;

pub use config::Config;
