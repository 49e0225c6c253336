//! Configuration management for the dispatch service.
//!
//! Configuration can be set via environment variables:
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `8000`.
//! - `AGENTS_DIR` - Optional. Directory scanned for agent manifests (`<core>/<agent>.yaml`).
//! - `AGENT_CORES` - Optional. Comma-separated list of known cores.
//!   Defaults to `marketing,finance,legal,operations,system`.
//! - `TENANTS_FILE` - Optional. YAML or JSON file with tenant credentials.
//! - `TENANTS` - Optional. Inline credentials, `tenant:key:plan` entries separated by commas.
//!   Ignored when `TENANTS_FILE` is set.
//! - `AGENT_TIMEOUT_SECS` - Optional. Default execution timeout per agent. Defaults to `30`.
//! - `ANONYMOUS_QUOTA` - Optional. Hourly quota for callers without `X-Tenant-ID`. Defaults to `100`.
//! - `ALLOW_ANONYMOUS` - Optional. Whether callers without `X-Tenant-ID` are accepted. Defaults to `true`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::tenant::{Plan, TenantCredential, ANONYMOUS_TENANT};
use crate::util::{env_var_bool, split_list};

/// Cores known to the registry when `AGENT_CORES` is not set.
pub const DEFAULT_CORES: &[&str] = &["marketing", "finance", "legal", "operations", "system"];

/// Default per-agent execution timeout.
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to read {0}: {1}")]
    Unreadable(PathBuf, String),
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Directory scanned for agent manifests at startup
    pub agents_dir: Option<PathBuf>,

    /// Statically known cores (agent categories)
    pub cores: Vec<String>,

    /// Tenant credential table
    pub tenants: Vec<TenantCredential>,

    /// Default execution timeout for an agent call
    pub agent_timeout: Duration,

    /// Hourly quota applied to anonymous callers
    pub anonymous_quota: u32,

    /// Whether requests without `X-Tenant-ID` are accepted
    pub allow_anonymous: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for unparsable numbers or credential
    /// entries, and `ConfigError::Unreadable` when `TENANTS_FILE` cannot be loaded.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?;

        let agents_dir = std::env::var("AGENTS_DIR").ok().map(PathBuf::from);

        let cores = match std::env::var("AGENT_CORES") {
            Ok(raw) => parse_cores(&raw)?,
            Err(_) => DEFAULT_CORES.iter().map(|c| c.to_string()).collect(),
        };

        let tenants = match std::env::var("TENANTS_FILE") {
            Ok(path) => crate::tenant::load_credentials(&PathBuf::from(path))?,
            Err(_) => match std::env::var("TENANTS") {
                Ok(raw) => parse_inline_tenants(&raw)?,
                Err(_) => default_tenants(),
            },
        };

        let agent_timeout = match std::env::var("AGENT_TIMEOUT_SECS") {
            Ok(raw) => {
                let secs: u64 = raw.parse().map_err(|e| {
                    ConfigError::InvalidValue("AGENT_TIMEOUT_SECS".to_string(), format!("{}", e))
                })?;
                Duration::from_secs(secs.max(1))
            }
            Err(_) => DEFAULT_AGENT_TIMEOUT,
        };

        let anonymous_quota = std::env::var("ANONYMOUS_QUOTA")
            .unwrap_or_else(|_| Plan::ANONYMOUS_QUOTA.to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("ANONYMOUS_QUOTA".to_string(), format!("{}", e)))?;

        Ok(Self {
            host,
            port,
            agents_dir,
            cores,
            tenants,
            agent_timeout,
            anonymous_quota,
            allow_anonymous: env_var_bool("ALLOW_ANONYMOUS", true),
        })
    }

    /// Create a config with custom credentials (useful for testing).
    pub fn new(tenants: Vec<TenantCredential>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            agents_dir: None,
            cores: DEFAULT_CORES.iter().map(|c| c.to_string()).collect(),
            tenants,
            agent_timeout: DEFAULT_AGENT_TIMEOUT,
            anonymous_quota: Plan::ANONYMOUS_QUOTA,
            allow_anonymous: true,
        }
    }
}

/// Parse the comma-separated core list. Core names become path segments and
/// the `<core>.<agent>` qualifier, so `.` and `/` are rejected.
fn parse_cores(raw: &str) -> Result<Vec<String>, ConfigError> {
    let cores = split_list(raw);
    if cores.is_empty() {
        return Err(ConfigError::InvalidValue(
            "AGENT_CORES".to_string(),
            "at least one core is required".to_string(),
        ));
    }
    if let Some(bad) = cores.iter().find(|c| c.contains('.') || c.contains('/')) {
        return Err(ConfigError::InvalidValue(
            "AGENT_CORES".to_string(),
            format!("core '{}' may not contain '.' or '/'", bad),
        ));
    }
    Ok(cores)
}

/// Parse `tenant:key:plan` entries separated by commas.
fn parse_inline_tenants(raw: &str) -> Result<Vec<TenantCredential>, ConfigError> {
    split_list(raw)
        .into_iter()
        .map(|entry| {
            let parts: Vec<&str> = entry.splitn(3, ':').map(str::trim).collect();
            match parts.as_slice() {
                [tenant_id, _, _] if *tenant_id == ANONYMOUS_TENANT => Err(ConfigError::InvalidValue(
                    "TENANTS".to_string(),
                    format!("tenant_id '{}' is reserved for unauthenticated callers", ANONYMOUS_TENANT),
                )),
                [tenant_id, api_key, plan] if !tenant_id.is_empty() && !api_key.is_empty() => {
                    let plan = plan.parse::<Plan>().map_err(|e| {
                        ConfigError::InvalidValue("TENANTS".to_string(), e.to_string())
                    })?;
                    Ok(TenantCredential::new(*tenant_id, *api_key, plan))
                }
                _ => Err(ConfigError::InvalidValue(
                    "TENANTS".to_string(),
                    format!("expected tenant:key:plan, got '{}'", entry),
                )),
            }
        })
        .collect()
}

/// Credential table used when nothing is configured.
fn default_tenants() -> Vec<TenantCredential> {
    tracing::warn!("No tenant credentials configured, using the built-in demo tenant");
    vec![TenantCredential::new("demo", "demo-key", Plan::Starter)]
}
