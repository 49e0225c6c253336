//! Tenant gate - authentication and per-tenant hourly quotas.
//!
//! # Flow
//! 1. [`TenantGate::authenticate`] maps the `X-Tenant-ID` / `X-API-Key` pair to a [`Caller`]
//! 2. [`TenantGate::admit`] charges the caller's window or rejects with `RateLimited`
//!
//! Callers without a tenant id are treated as the shared `anonymous` tenant
//! with the default quota, so discovery calls are still metered.

mod credentials;
mod rate_limit;

pub use credentials::{load_credentials, TenantCredential};
pub use rate_limit::{Clock, ManualClock, RateDecision, RateLimiter, RateWindow, SystemClock, RATE_WINDOW};

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{constant_time_eq, hex_sha256};

/// Tenant id used for requests that carry no `X-Tenant-ID`.
pub const ANONYMOUS_TENANT: &str = "anonymous";

/// Subscription plan of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Starter,
    Professional,
    Enterprise,
}

impl Plan {
    /// Default quota, used for anonymous callers.
    pub const ANONYMOUS_QUOTA: u32 = 100;

    /// Requests allowed per hour.
    pub fn hourly_quota(&self) -> u32 {
        match self {
            Self::Starter => 100,
            Self::Professional => 1_000,
            Self::Enterprise => 10_000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::Professional => "professional",
            Self::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "starter" => Ok(Self::Starter),
            "professional" => Ok(Self::Professional),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(GateError::UnknownPlan(other.to_string())),
        }
    }
}

/// An authenticated (or anonymous) request identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Caller {
    pub tenant_id: String,
    /// `None` for anonymous callers
    pub plan: Option<Plan>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self {
            tenant_id: ANONYMOUS_TENANT.to_string(),
            plan: None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.plan.is_none()
    }
}

/// Snapshot of a tenant's window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub tenant_id: String,
    pub requests_this_hour: usize,
    pub limit: u32,
    pub window_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limit of {limit} requests per hour exceeded")]
    RateLimited { limit: u32, retry_after: Duration },

    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("Unknown plan: {0}")]
    UnknownPlan(String),
}

/// Authenticates callers and enforces their quotas.
pub struct TenantGate {
    credentials: HashMap<String, TenantCredential>,
    limiter: RateLimiter,
    anonymous_quota: u32,
    allow_anonymous: bool,
}

impl TenantGate {
    pub fn new(credentials: Vec<TenantCredential>, anonymous_quota: u32, allow_anonymous: bool) -> Self {
        Self::with_limiter(credentials, anonymous_quota, allow_anonymous, RateLimiter::new())
    }

    pub fn with_limiter(
        credentials: Vec<TenantCredential>,
        anonymous_quota: u32,
        allow_anonymous: bool,
        limiter: RateLimiter,
    ) -> Self {
        let credentials = credentials
            .into_iter()
            .map(|c| (c.tenant_id.clone(), c))
            .collect();
        Self {
            credentials,
            limiter,
            anonymous_quota,
            allow_anonymous,
        }
    }

    pub fn tenant_count(&self) -> usize {
        self.credentials.len()
    }

    /// Plan of a configured tenant.
    pub fn plan_of(&self, tenant_id: &str) -> Option<Plan> {
        self.credentials.get(tenant_id).map(|c| c.plan)
    }

    /// Resolve the request identity.
    ///
    /// A missing (or blank) tenant id yields the anonymous caller when
    /// anonymous access is enabled. A present tenant id must be known and the
    /// key must match.
    pub fn authenticate(
        &self,
        tenant_id: Option<&str>,
        api_key: Option<&str>,
    ) -> Result<Caller, GateError> {
        let tenant_id = match tenant_id.map(str::trim).filter(|t| !t.is_empty()) {
            Some(id) => id,
            None if self.allow_anonymous => return Ok(Caller::anonymous()),
            None => {
                return Err(GateError::Unauthorized(
                    "X-Tenant-ID header is required".to_string(),
                ))
            }
        };

        let credential = self
            .credentials
            .get(tenant_id)
            .ok_or_else(|| GateError::Unauthorized(format!("unknown tenant '{}'", tenant_id)))?;

        let api_key = api_key.unwrap_or("");
        if api_key.is_empty() {
            return Err(GateError::Unauthorized("X-API-Key header is required".to_string()));
        }
        if !constant_time_eq(&hex_sha256(api_key), &credential.api_key_sha256) {
            tracing::debug!(tenant_id, "Rejected request with invalid API key");
            return Err(GateError::Unauthorized("invalid API key".to_string()));
        }

        Ok(Caller {
            tenant_id: credential.tenant_id.clone(),
            plan: Some(credential.plan),
        })
    }

    /// Hourly quota for a plan (`None` = anonymous).
    pub fn quota_for(&self, plan: Option<Plan>) -> u32 {
        plan.map(|p| p.hourly_quota()).unwrap_or(self.anonymous_quota)
    }

    /// Record a request if the tenant is under quota.
    pub fn check_and_record(&self, tenant_id: &str, plan: Option<Plan>) -> bool {
        self.check_and_record_detailed(tenant_id, plan).allowed
    }

    pub fn check_and_record_detailed(&self, tenant_id: &str, plan: Option<Plan>) -> RateDecision {
        self.limiter.check_and_record(tenant_id, self.quota_for(plan))
    }

    /// Charge the caller's window, failing with `RateLimited` when exhausted.
    pub fn admit(&self, caller: &Caller) -> Result<RateDecision, GateError> {
        let decision = self.check_and_record_detailed(&caller.tenant_id, caller.plan);
        if decision.allowed {
            Ok(decision)
        } else {
            tracing::info!(
                tenant_id = %caller.tenant_id,
                limit = decision.limit,
                "Rate limit exceeded"
            );
            Err(GateError::RateLimited {
                limit: decision.limit,
                retry_after: decision.retry_after.unwrap_or(self.limiter.window()),
            })
        }
    }

    /// Read-only view of a tenant's window (prunes, never records).
    pub fn usage(&self, tenant_id: &str) -> Result<UsageSnapshot, GateError> {
        let plan = if tenant_id == ANONYMOUS_TENANT && !self.credentials.contains_key(tenant_id) {
            None
        } else {
            Some(
                self.plan_of(tenant_id)
                    .ok_or_else(|| GateError::UnknownTenant(tenant_id.to_string()))?,
            )
        };

        Ok(UsageSnapshot {
            tenant_id: tenant_id.to_string(),
            requests_this_hour: self.limiter.requests_in_window(tenant_id),
            limit: self.quota_for(plan),
            window_seconds: self.limiter.window().as_secs(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn gate() -> TenantGate {
        TenantGate::new(
            vec![
                TenantCredential::new("demo", "demo-key", Plan::Starter),
                TenantCredential::new("acme", "acme-key", Plan::Enterprise),
            ],
            Plan::ANONYMOUS_QUOTA,
            true,
        )
    }

    #[test]
    fn quota_table() {
        assert_eq!(Plan::Starter.hourly_quota(), 100);
        assert_eq!(Plan::Professional.hourly_quota(), 1_000);
        assert_eq!(Plan::Enterprise.hourly_quota(), 10_000);
        assert_eq!(gate().quota_for(None), 100);
    }

    #[test]
    fn plan_parses_case_insensitively() {
        assert_eq!("Starter".parse::<Plan>().unwrap(), Plan::Starter);
        assert_eq!(" enterprise ".parse::<Plan>().unwrap(), Plan::Enterprise);
        assert!("gold".parse::<Plan>().is_err());
    }

    #[test]
    fn authenticate_known_tenant() {
        let caller = gate().authenticate(Some("demo"), Some("demo-key")).unwrap();
        assert_eq!(caller.tenant_id, "demo");
        assert_eq!(caller.plan, Some(Plan::Starter));
        assert!(!caller.is_anonymous());
    }

    #[test]
    fn authenticate_rejects_bad_credentials() {
        let gate = gate();
        assert!(matches!(
            gate.authenticate(Some("demo"), Some("wrong")),
            Err(GateError::Unauthorized(_))
        ));
        assert!(matches!(
            gate.authenticate(Some("demo"), None),
            Err(GateError::Unauthorized(_))
        ));
        assert!(matches!(
            gate.authenticate(Some("ghost"), Some("demo-key")),
            Err(GateError::Unauthorized(_))
        ));
    }

    #[test]
    fn missing_tenant_is_anonymous() {
        let gate = gate();
        assert_eq!(gate.authenticate(None, None).unwrap(), Caller::anonymous());
        assert_eq!(gate.authenticate(Some("  "), None).unwrap(), Caller::anonymous());
    }

    #[test]
    fn anonymous_can_be_disabled() {
        let gate = TenantGate::new(Vec::new(), 100, false);
        assert!(matches!(
            gate.authenticate(None, None),
            Err(GateError::Unauthorized(_))
        ));
    }

    #[test]
    fn starter_tenant_gets_exactly_its_quota() {
        let gate = gate();
        let caller = gate.authenticate(Some("demo"), Some("demo-key")).unwrap();
        for _ in 0..100 {
            assert!(gate.admit(&caller).is_ok());
        }
        match gate.admit(&caller) {
            Err(GateError::RateLimited { limit, .. }) => assert_eq!(limit, 100),
            other => panic!("expected RateLimited, got {:?}", other),
        }
        assert_eq!(gate.usage("demo").unwrap().requests_this_hour, 100);
    }

    #[test]
    fn usage_is_idempotent() {
        let gate = gate();
        assert!(gate.check_and_record("acme", Some(Plan::Enterprise)));
        assert!(gate.check_and_record("acme", Some(Plan::Enterprise)));
        let first = gate.usage("acme").unwrap();
        let second = gate.usage("acme").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.requests_this_hour, 2);
        assert_eq!(first.limit, 10_000);
        assert_eq!(first.window_seconds, 3600);
    }

    #[test]
    fn usage_of_unknown_tenant_fails() {
        assert!(matches!(
            gate().usage("ghost"),
            Err(GateError::UnknownTenant(_))
        ));
    }

    #[test]
    fn anonymous_usage_is_reported() {
        let gate = gate();
        let anon = Caller::anonymous();
        gate.admit(&anon).unwrap();
        let usage = gate.usage(ANONYMOUS_TENANT).unwrap();
        assert_eq!(usage.requests_this_hour, 1);
        assert_eq!(usage.limit, Plan::ANONYMOUS_QUOTA);
    }

    #[test]
    fn window_expiry_restores_quota() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(RATE_WINDOW, Arc::clone(&clock) as Arc<dyn Clock>);
        let gate = TenantGate::with_limiter(
            vec![TenantCredential::new("demo", "demo-key", Plan::Starter)],
            1,
            true,
            limiter,
        );
        let anon = Caller::anonymous();
        assert!(gate.admit(&anon).is_ok());
        assert!(gate.admit(&anon).is_err());
        clock.advance(RATE_WINDOW);
        assert!(gate.admit(&anon).is_ok());
    }
}
