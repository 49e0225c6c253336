//! Agents module - catalog, built-in agents and dispatch.
//!
//! # Pieces
//! - **AgentRegistry**: immutable catalog of agents grouped by core, built at startup
//! - **Dispatcher**: resolves, instantiates, invokes and normalizes one execution
//! - **TemplateAgent**: agents declared by manifest files instead of code
//!
//! # Agent contract
//! An agent is either a bare handler function (called directly) or a type
//! implementing [`Agent`]. The dispatcher calls the first operation from
//! [`Operation::PRIORITY`] that the agent lists in [`Agent::operations`].

mod builtin;
mod dispatch;
mod manifest;
mod registry;
mod template;
mod types;

pub use builtin::register_builtin_agents;
pub use dispatch::{DispatchError, Dispatcher, ExecutionEnvelope, ExecutionFailure, ExecutionStatus};
pub use manifest::{scan_manifests, AgentManifest, TemplateSpec};
pub use registry::{
    AgentDescriptor, AgentFactory, AgentRegistration, AgentRegistry, AgentSource, AgentStatus,
    HandlerFn, RegistryBuilder,
};
pub(crate) use registry::display_name_from_id;
pub use template::TemplateAgent;
pub use types::{AgentError, AgentInput, AgentOutput, Operation, Report};

use std::sync::Arc;

use async_trait::async_trait;

/// Shared reference to an agent instance.
pub type AgentRef = Arc<dyn Agent>;

/// Base trait for agents with an instance.
///
/// # Invariants
/// - `call()` is only invoked with an operation listed by `operations()`
/// - Input shape problems are reported as schema errors
///   (`MissingField`, `InvalidField`, `InvalidInput`), never panics
#[async_trait]
pub trait Agent: Send + Sync {
    /// Operations this agent implements. Order does not matter; the
    /// dispatcher applies [`Operation::PRIORITY`].
    fn operations(&self) -> &[Operation] {
        &[]
    }

    /// Run one operation against the input.
    async fn call(&self, operation: Operation, input: AgentInput) -> Result<AgentOutput, AgentError> {
        let _ = input;
        Err(AgentError::Unsupported(operation))
    }
}

/// First operation in priority order that the agent supports.
pub fn resolve_operation(agent: &dyn Agent) -> Option<Operation> {
    let supported = agent.operations();
    Operation::PRIORITY
        .iter()
        .copied()
        .find(|op| supported.contains(op))
}
