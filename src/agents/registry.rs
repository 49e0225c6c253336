//! Agent registry - the read-only catalog of agents grouped by core.
//!
//! The registry is assembled once at startup by a [`RegistryBuilder`] and
//! never changes afterwards, so concurrent readers need no locking. The only
//! mutable part is each entry's diagnostic slot recording the last
//! construction failure.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;

use super::manifest::{scan_manifests, AgentManifest};
use super::template::TemplateAgent;
use super::types::{AgentError, AgentInput, AgentOutput};
use super::AgentRef;
use crate::config::Config;
use crate::tenant::Caller;

/// Handler agents are plain async functions over the input.
pub type HandlerFn =
    Arc<dyn Fn(AgentInput) -> BoxFuture<'static, Result<AgentOutput, AgentError>> + Send + Sync>;

/// Builds an agent instance for a tenant, or explains why it cannot.
pub type ConstructorFn = Arc<dyn Fn(&Caller) -> Result<AgentRef, String> + Send + Sync>;

/// How an agent is brought to life.
#[derive(Clone)]
pub enum AgentFactory {
    /// Called directly, without instantiation
    Handler(HandlerFn),
    /// Instantiated per request with the tenant context
    Constructor(ConstructorFn),
}

impl AgentFactory {
    pub fn handler<F, Fut>(f: F) -> Self
    where
        F: Fn(AgentInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<AgentOutput, AgentError>> + Send + 'static,
    {
        Self::Handler(Arc::new(move |input| f(input).boxed()))
    }

    pub fn constructor<F>(f: F) -> Self
    where
        F: Fn(&Caller) -> Result<AgentRef, String> + Send + Sync + 'static,
    {
        Self::Constructor(Arc::new(f))
    }

    /// A constructor that hands out the same stateless instance to every tenant.
    pub fn shared(agent: AgentRef) -> Self {
        Self::constructor(move |_| Ok(Arc::clone(&agent)))
    }
}

impl std::fmt::Debug for AgentFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handler(_) => f.write_str("Handler"),
            Self::Constructor(_) => f.write_str("Constructor"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Inactive,
    /// The last construction attempt failed
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentSource {
    Builtin,
    Manifest,
}

/// Public description of a registered agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentDescriptor {
    pub id: String,
    pub display_name: String,
    pub category: String,
    pub status: AgentStatus,
    pub description: String,
    pub source: AgentSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl AgentDescriptor {
    /// `<category>.<id>`
    pub fn qualified_id(&self) -> String {
        format!("{}.{}", self.category, self.id)
    }
}

/// Everything needed to add an agent to the registry.
pub struct AgentRegistration {
    pub id: String,
    pub category: String,
    pub display_name: String,
    pub description: String,
    pub enabled: bool,
    pub timeout: Option<Duration>,
    pub source: AgentSource,
    pub factory: AgentFactory,
}

impl AgentRegistration {
    pub fn new(category: impl Into<String>, id: impl Into<String>, factory: AgentFactory) -> Self {
        let id = id.into();
        Self {
            display_name: display_name_from_id(&id),
            id,
            category: category.into(),
            description: String::new(),
            enabled: true,
            timeout: None,
            source: AgentSource::Builtin,
            factory,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// `credit_scorer` -> `Credit Scorer`
pub(crate) fn display_name_from_id(id: &str) -> String {
    id.split(|c| c == '_' || c == '-')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

struct RegistryEntry {
    registration: AgentRegistration,
    last_error: RwLock<Option<String>>,
}

impl RegistryEntry {
    fn descriptor(&self) -> AgentDescriptor {
        let reg = &self.registration;
        let last_error = self
            .last_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let status = match (reg.enabled, &last_error) {
            (false, _) => AgentStatus::Inactive,
            (true, Some(_)) => AgentStatus::Error,
            (true, None) => AgentStatus::Active,
        };
        AgentDescriptor {
            id: reg.id.clone(),
            display_name: reg.display_name.clone(),
            category: reg.category.clone(),
            status,
            description: reg.description.clone(),
            source: reg.source,
            timeout_secs: reg.timeout.map(|t| t.as_secs()),
            last_error,
        }
    }

    fn set_last_error(&self, error: Option<String>) {
        *self.last_error.write().unwrap_or_else(PoisonError::into_inner) = error;
    }
}

/// Collects registrations and manifests before freezing them into a registry.
pub struct RegistryBuilder {
    cores: BTreeSet<String>,
    agents: BTreeMap<String, BTreeMap<String, AgentRegistration>>,
}

impl RegistryBuilder {
    pub fn new<I, S>(cores: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cores: BTreeSet<String> = cores.into_iter().map(Into::into).collect();
        let agents = cores.iter().map(|c| (c.clone(), BTreeMap::new())).collect();
        Self { cores, agents }
    }

    pub fn is_known_core(&self, core: &str) -> bool {
        self.cores.contains(core)
    }

    /// Add an agent. Agents for unknown cores are skipped; a duplicate id
    /// replaces the earlier registration.
    pub fn register(&mut self, registration: AgentRegistration) -> &mut Self {
        let Some(core) = self.agents.get_mut(&registration.category) else {
            tracing::warn!(
                "Skipping agent '{}': unknown core '{}'",
                registration.id,
                registration.category
            );
            return self;
        };
        if core.contains_key(&registration.id) {
            tracing::warn!(
                "Agent '{}.{}' registered twice, keeping the later registration",
                registration.category,
                registration.id
            );
        }
        core.insert(registration.id.clone(), registration);
        self
    }

    /// Apply a manifest: template manifests add an agent, the others adjust
    /// an existing one.
    pub fn apply_manifest(&mut self, manifest: AgentManifest) -> &mut Self {
        if !self.is_known_core(&manifest.category) {
            tracing::warn!(
                "Skipping manifest '{}': unknown core '{}'",
                manifest.id,
                manifest.category
            );
            return self;
        }

        if let Some(template) = manifest.template.clone() {
            let agent: AgentRef = Arc::new(TemplateAgent::new(&manifest.id, template));
            let mut registration = AgentRegistration::new(
                manifest.category.clone(),
                manifest.id.clone(),
                AgentFactory::shared(agent),
            );
            registration.source = AgentSource::Manifest;
            manifest.apply_to(&mut registration);
            tracing::debug!("Registered template agent {}.{}", manifest.category, manifest.id);
            return self.register(registration);
        }

        let existing = self
            .agents
            .get_mut(&manifest.category)
            .and_then(|core| core.get_mut(&manifest.id));
        match existing {
            Some(registration) => {
                manifest.apply_to(registration);
                tracing::debug!("Applied manifest overrides to {}.{}", manifest.category, manifest.id);
            }
            None => tracing::warn!(
                "Manifest for {}.{} has no template and matches no registered agent",
                manifest.category,
                manifest.id
            ),
        }
        self
    }

    /// Scan `<dir>/<core>/` manifests and apply them.
    pub fn load_manifests(&mut self, dir: &Path) -> &mut Self {
        let cores: Vec<String> = self.cores.iter().cloned().collect();
        for manifest in scan_manifests(dir, &cores) {
            self.apply_manifest(manifest);
        }
        self
    }

    pub fn build(self) -> AgentRegistry {
        let entries = self
            .agents
            .into_iter()
            .map(|(core, agents)| {
                let agents = agents
                    .into_iter()
                    .map(|(id, registration)| {
                        (
                            id,
                            RegistryEntry {
                                registration,
                                last_error: RwLock::new(None),
                            },
                        )
                    })
                    .collect();
                (core, agents)
            })
            .collect();
        AgentRegistry {
            cores: self.cores,
            entries,
        }
    }
}

/// Immutable catalog of agents.
pub struct AgentRegistry {
    cores: BTreeSet<String>,
    entries: BTreeMap<String, BTreeMap<String, RegistryEntry>>,
}

impl AgentRegistry {
    pub fn builder<I, S>(cores: I) -> RegistryBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RegistryBuilder::new(cores)
    }

    /// Built-in agents plus whatever the configured agents directory declares.
    pub fn from_config(config: &Config) -> Self {
        let mut builder = Self::builder(config.cores.iter().cloned());
        super::builtin::register_builtin_agents(&mut builder);
        if let Some(dir) = &config.agents_dir {
            builder.load_manifests(dir);
        }
        let registry = builder.build();
        tracing::info!(
            "Agent registry ready: {} agents across {} cores",
            registry.agent_count(),
            registry.get_cores().len()
        );
        registry
    }

    /// All known cores, including ones without agents.
    pub fn get_cores(&self) -> &BTreeSet<String> {
        &self.cores
    }

    /// Agents of a core sorted by id; empty for unknown cores.
    pub fn get_agents_by_core(&self, category: &str) -> Vec<AgentDescriptor> {
        self.entries
            .get(category)
            .map(|agents| agents.values().map(RegistryEntry::descriptor).collect())
            .unwrap_or_default()
    }

    pub fn get_agent(&self, category: &str, id: &str) -> Option<AgentDescriptor> {
        self.entry(category, id).map(RegistryEntry::descriptor)
    }

    pub fn all_agents(&self) -> Vec<AgentDescriptor> {
        self.entries
            .values()
            .flat_map(|agents| agents.values().map(RegistryEntry::descriptor))
            .collect()
    }

    pub fn agent_count(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    /// Cores with at least one active agent.
    pub fn active_core_count(&self) -> usize {
        self.entries
            .values()
            .filter(|agents| agents.values().any(|e| e.registration.enabled))
            .count()
    }

    fn entry(&self, category: &str, id: &str) -> Option<&RegistryEntry> {
        self.entries.get(category).and_then(|agents| agents.get(id))
    }

    /// Execution timeout configured for the agent, if it overrides the default.
    pub fn timeout_for(&self, category: &str, id: &str) -> Option<Duration> {
        self.entry(category, id)?.registration.timeout
    }

    /// The handler of a handler agent, for the no-instantiation path.
    pub fn handler(&self, category: &str, id: &str) -> Option<HandlerFn> {
        match &self.entry(category, id)?.registration.factory {
            AgentFactory::Handler(handler) => Some(Arc::clone(handler)),
            AgentFactory::Constructor(_) => None,
        }
    }

    /// Construct an instance of `<category>.<id>` for a tenant.
    ///
    /// Returns `None` on failure; the reason is recorded on the descriptor
    /// (`status = error`, `last_error`) until the next successful construction.
    pub fn create_instance(&self, qualified_id: &str, tenant: &Caller) -> Option<AgentRef> {
        let Some((category, id)) = qualified_id.split_once('.') else {
            tracing::warn!("Malformed agent id '{}', expected <core>.<agent>", qualified_id);
            return None;
        };
        self.instantiate(category, id, tenant).ok()
    }

    /// Construct the agent for a tenant, returning the failure reason on error.
    ///
    /// Construction failures (including constructor panics) are recorded on
    /// the descriptor like [`create_instance`](Self::create_instance) does.
    /// Unknown ids and handler agents fail without touching the descriptor.
    pub fn instantiate(&self, category: &str, id: &str, tenant: &Caller) -> Result<AgentRef, String> {
        let entry = self
            .entry(category, id)
            .ok_or_else(|| format!("agent '{}.{}' is not registered", category, id))?;

        let constructor = match &entry.registration.factory {
            AgentFactory::Constructor(constructor) => Arc::clone(constructor),
            AgentFactory::Handler(_) => {
                tracing::debug!("{}.{} is a handler agent and has no instance", category, id);
                return Err("handler agents have no instance".to_string());
            }
        };

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| constructor(tenant)));
        let reason = match outcome {
            Ok(Ok(agent)) => {
                entry.set_last_error(None);
                return Ok(agent);
            }
            Ok(Err(reason)) => reason,
            Err(panic) => format!("constructor panicked: {}", panic_message(panic.as_ref())),
        };

        tracing::warn!(
            tenant_id = %tenant.tenant_id,
            "Failed to instantiate {}.{}: {}",
            category,
            id,
            reason
        );
        entry.set_last_error(Some(reason.clone()));
        Err(reason)
    }

    /// Reason recorded by the last failed construction, if any.
    pub fn last_error(&self, category: &str, id: &str) -> Option<String> {
        self.entry(category, id).and_then(|e| {
            e.last_error
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        })
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
