//! HTTP route handlers.

use std::sync::Arc;

use axum::middleware;
use axum::{
    body::Bytes,
    extract::{Extension, Path, State},
    http::{Method, Uri},
    response::Json,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agents::{
    display_name_from_id, AgentDescriptor, AgentRegistry, Dispatcher, ExecutionEnvelope,
};
use crate::config::Config;
use crate::tenant::{Caller, TenantGate, UsageSnapshot, ANONYMOUS_TENANT};

use super::auth;
use super::error::ApiError;
use super::types::*;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// Agent catalog, read-only after startup
    pub registry: Arc<AgentRegistry>,
    /// Authentication and hourly quotas
    pub gate: TenantGate,
    pub dispatcher: Dispatcher,
}

impl AppState {
    /// Build the registry from the configured cores and agents directory.
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(AgentRegistry::from_config(&config));
        Self::with_registry(config, registry)
    }

    pub fn with_registry(config: Config, registry: Arc<AgentRegistry>) -> Self {
        let gate = TenantGate::new(
            config.tenants.clone(),
            config.anonymous_quota,
            config.allow_anonymous,
        );
        let dispatcher = Dispatcher::new(Arc::clone(&registry), config.agent_timeout);
        Self {
            config,
            registry,
            gate,
            dispatcher,
        }
    }
}

/// Assemble the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let public_routes =
        Router::new().route("/health", get(health).fallback(method_not_allowed));

    // Every call here counts against the tenant's hourly quota
    let metered_routes = Router::new()
        .route("/cores", get(list_cores).fallback(method_not_allowed))
        .route("/cores/:category", get(get_core).fallback(method_not_allowed))
        .route("/agents/:category/:id", get(get_agent).fallback(method_not_allowed))
        .route(
            "/agents/:category/:id/execute",
            post(execute_agent).fallback(execute_wrong_method),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_tenant,
        ));

    let usage_routes = Router::new()
        .route("/usage/:tenant_id", get(get_usage).fallback(method_not_allowed))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::identify_tenant,
        ));

    Router::new()
        .merge(public_routes)
        .merge(metered_routes)
        .merge(usage_routes)
        .fallback(not_found)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(config));
    tracing::info!(
        "Serving {} agents across {} cores for {} tenants",
        state.registry.agent_count(),
        state.registry.get_cores().len(),
        state.gate.tenant_count()
    );

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    // Setup graceful shutdown on SIGTERM/SIGINT
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining in-flight requests");
}

/// Unmatched paths.
async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("No route for {}", uri.path()))
}

/// Known path, unsupported method.
async fn method_not_allowed(method: Method, uri: Uri) -> ApiError {
    ApiError::MethodNotAllowed(format!("{} is not supported on {}", method, uri.path()))
}

/// Wrong method on the execute path. An unknown agent stays a 404.
async fn execute_wrong_method(
    State(state): State<Arc<AppState>>,
    Path((category, id)): Path<(String, String)>,
    method: Method,
) -> ApiError {
    if state.registry.get_agent(&category, &id).is_none() {
        return ApiError::NotFound(format!("Agent '{}' not found in core '{}'", id, category));
    }
    ApiError::MethodNotAllowed(format!(
        "{} is not supported, use POST to execute {}.{}",
        method, category, id
    ))
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        agents_loaded: state.registry.agent_count(),
        cores_active: state.registry.active_core_count(),
        timestamp: chrono::Utc::now(),
    })
}

async fn list_cores(State(state): State<Arc<AppState>>) -> Json<Vec<CoreSummary>> {
    let cores = state
        .registry
        .get_cores()
        .iter()
        .map(|core| CoreSummary {
            id: core.clone(),
            name: display_name_from_id(core),
            agents_count: state.registry.get_agents_by_core(core).len(),
        })
        .collect();
    Json(cores)
}

async fn get_core(
    State(state): State<Arc<AppState>>,
    Path(category): Path<String>,
) -> Result<Json<CoreDetail>, ApiError> {
    if !state.registry.get_cores().contains(&category) {
        return Err(ApiError::NotFound(format!("Core '{}' not found", category)));
    }

    let agents: Vec<AgentSummary> = state
        .registry
        .get_agents_by_core(&category)
        .into_iter()
        .map(AgentSummary::from)
        .collect();

    Ok(Json(CoreDetail {
        name: display_name_from_id(&category),
        id: category,
        agents_count: agents.len(),
        agents,
    }))
}

async fn get_agent(
    State(state): State<Arc<AppState>>,
    Path((category, id)): Path<(String, String)>,
) -> Result<Json<AgentDescriptor>, ApiError> {
    state
        .registry
        .get_agent(&category, &id)
        .map(Json)
        .ok_or_else(|| {
            ApiError::NotFound(format!("Agent '{}' not found in core '{}'", id, category))
        })
}

async fn execute_agent(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path((category, id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<ExecutionEnvelope>, ApiError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        ExecuteRequest::default()
    } else {
        serde_json::from_slice::<ExecuteRequest>(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))?
    };

    tracing::debug!(
        tenant_id = %caller.tenant_id,
        "Execute {}.{} with {} input fields",
        category,
        id,
        request.input_data.len()
    );

    let envelope = state
        .dispatcher
        .execute(&category, &id, &caller, request.input_data, request.options)
        .await?;
    Ok(Json(envelope))
}

async fn get_usage(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(tenant_id): Path<String>,
) -> Result<Json<UsageSnapshot>, ApiError> {
    if caller.tenant_id != tenant_id {
        let message = if caller.is_anonymous() {
            format!("Anonymous callers may only read '{}' usage", ANONYMOUS_TENANT)
        } else {
            format!("Tenant '{}' may not read usage of '{}'", caller.tenant_id, tenant_id)
        };
        return Err(ApiError::Forbidden(message));
    }

    Ok(Json(state.gate.usage(&tenant_id)?))
}
