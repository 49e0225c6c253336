//! Dispatcher - runs one agent execution from lookup to envelope.
//!
//! # States
//! `RECEIVED → RESOLVED → INSTANTIATED → EXECUTED → NORMALIZED`
//!
//! Only resolution (`NotFound`) and instantiation (`Uninstantiable`) fail the
//! request. Everything after that, including schema mismatches, agent
//! errors, panics and timeouts, is reported inside the envelope.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::registry::{panic_message, AgentDescriptor, AgentRegistry, AgentStatus};
use super::types::{AgentError, AgentInput, AgentOutput, Operation};
use super::resolve_operation;
use crate::tenant::Caller;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Ok,
    InputSchemaError,
    Error,
}

/// Error details carried by non-`ok` envelopes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionFailure {
    pub error_type: String,
    pub message: String,
}

/// Normalized response of every execute call.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionEnvelope {
    pub execution_id: Uuid,
    pub agent_id: String,
    pub category: String,
    pub tenant_id: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: ExecutionStatus,
    /// Operation that was invoked; `None` when the agent exposes none
    pub operation: Option<Operation>,
    pub result: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionFailure>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error("Agent '{id}' not found in core '{category}'")]
    NotFound { category: String, id: String },

    #[error("Agent '{agent}' is unavailable: {reason}")]
    Uninstantiable { agent: String, reason: String },
}

/// In-flight execution bookkeeping used to build the envelope.
struct Execution<'a> {
    execution_id: Uuid,
    descriptor: &'a AgentDescriptor,
    caller: &'a Caller,
    timestamp: DateTime<Utc>,
    started: Instant,
}

impl<'a> Execution<'a> {
    fn new(descriptor: &'a AgentDescriptor, caller: &'a Caller) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            descriptor,
            caller,
            timestamp: Utc::now(),
            started: Instant::now(),
        }
    }

    fn finish(
        &self,
        operation: Option<Operation>,
        status: ExecutionStatus,
        result: Value,
        error: Option<ExecutionFailure>,
    ) -> ExecutionEnvelope {
        let duration_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            execution_id = %self.execution_id,
            agent = %self.descriptor.qualified_id(),
            tenant_id = %self.caller.tenant_id,
            status = ?status,
            duration_ms,
            "Agent execution finished"
        );
        ExecutionEnvelope {
            execution_id: self.execution_id,
            agent_id: self.descriptor.id.clone(),
            category: self.descriptor.category.clone(),
            tenant_id: self.caller.tenant_id.clone(),
            timestamp: self.timestamp,
            duration_ms,
            status,
            operation,
            result,
            error,
        }
    }

    fn failed(&self, operation: Option<Operation>, error_type: &str, message: String) -> ExecutionEnvelope {
        self.finish(
            operation,
            ExecutionStatus::Error,
            Value::Null,
            Some(ExecutionFailure {
                error_type: error_type.to_string(),
                message,
            }),
        )
    }

    fn schema_error(
        &self,
        operation: Option<Operation>,
        error: &AgentError,
        input_received: Vec<String>,
    ) -> ExecutionEnvelope {
        let result = json!({
            "error": "input_schema_error",
            "message": error.to_string(),
            "missing_attribute": error.field(),
            "input_received": input_received,
            "hint": "Check that input_data carries the fields this agent expects",
        });
        self.finish(
            operation,
            ExecutionStatus::InputSchemaError,
            result,
            Some(ExecutionFailure {
                error_type: error.kind().to_string(),
                message: error.to_string(),
            }),
        )
    }
}

/// Executes agents from the registry.
pub struct Dispatcher {
    registry: Arc<AgentRegistry>,
    default_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<AgentRegistry>, default_timeout: Duration) -> Self {
        Self {
            registry,
            default_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Run `<category>/<id>` for the caller.
    ///
    /// # Errors
    /// - `NotFound` when the agent is not registered
    /// - `Uninstantiable` when the agent is inactive or its construction fails
    pub async fn execute(
        &self,
        category: &str,
        id: &str,
        caller: &Caller,
        input_data: Map<String, Value>,
        options: Map<String, Value>,
    ) -> Result<ExecutionEnvelope, DispatchError> {
        let descriptor = self
            .registry
            .get_agent(category, id)
            .ok_or_else(|| DispatchError::NotFound {
                category: category.to_string(),
                id: id.to_string(),
            })?;

        if descriptor.status == AgentStatus::Inactive {
            return Err(DispatchError::Uninstantiable {
                agent: descriptor.qualified_id(),
                reason: "agent is inactive".to_string(),
            });
        }

        let execution = Execution::new(&descriptor, caller);
        let input = AgentInput::new(input_data, options, caller.clone());
        let input_received = input.keys();
        let timeout = self
            .registry
            .timeout_for(category, id)
            .unwrap_or(self.default_timeout);

        let (operation, future): (Operation, BoxFuture<'static, Result<AgentOutput, AgentError>>) =
            match self.registry.handler(category, id) {
                Some(handler) => {
                    // Deferred to the first poll so a panicking handler is caught below
                    let input = input.with_tenant_merged();
                    let deferred = future::lazy(move |_| handler(input)).flatten();
                    (Operation::Execute, deferred.boxed())
                }
                None => {
                    let agent = self
                        .registry
                        .instantiate(category, id, caller)
                        .map_err(|reason| DispatchError::Uninstantiable {
                            agent: descriptor.qualified_id(),
                            reason,
                        })?;

                    let Some(operation) = resolve_operation(agent.as_ref()) else {
                        tracing::debug!(
                            "{} exposes no supported operation, nothing to run",
                            descriptor.qualified_id()
                        );
                        let supported: Vec<&str> =
                            Operation::PRIORITY.iter().map(Operation::as_str).collect();
                        return Ok(execution.finish(
                            None,
                            ExecutionStatus::Ok,
                            json!({
                                "executed": false,
                                "message": "Agent exposes none of the supported operations",
                                "supported_operations": supported,
                            }),
                            None,
                        ));
                    };

                    (operation, async move { agent.call(operation, input).await }.boxed())
                }
            };

        tracing::debug!(
            execution_id = %execution.execution_id,
            "Invoking {}::{} (timeout {:?})",
            descriptor.qualified_id(),
            operation,
            timeout
        );

        let outcome = tokio::time::timeout(timeout, AssertUnwindSafe(future).catch_unwind()).await;
        let operation = Some(operation);

        let output = match outcome {
            Err(_elapsed) => {
                tracing::warn!(
                    "{} timed out after {:?}",
                    descriptor.qualified_id(),
                    timeout
                );
                return Ok(execution.failed(
                    operation,
                    "Timeout",
                    format!("agent did not finish within {} ms", timeout.as_millis()),
                ));
            }
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                tracing::error!("{} panicked: {}", descriptor.qualified_id(), message);
                return Ok(execution.failed(operation, "Panic", message));
            }
            Ok(Ok(Err(error))) if error.is_schema_error() => {
                tracing::info!(
                    "{} rejected input: {}",
                    descriptor.qualified_id(),
                    error
                );
                return Ok(execution.schema_error(operation, &error, input_received));
            }
            Ok(Ok(Err(error))) => {
                tracing::warn!("{} failed: {}", descriptor.qualified_id(), error);
                return Ok(execution.failed(operation, error.kind(), error.to_string()));
            }
            Ok(Ok(Ok(output))) => output,
        };

        match output.into_value() {
            Ok(result) => Ok(execution.finish(operation, ExecutionStatus::Ok, result, None)),
            Err(error) => {
                tracing::warn!(
                    "{} returned a result that could not be normalized: {}",
                    descriptor.qualified_id(),
                    error
                );
                Ok(execution.failed(operation, error.kind(), error.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::registry::{AgentFactory, AgentRegistration, HandlerFn};
    use crate::agents::{register_builtin_agents, Agent, AgentRef};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct Inert;

    impl Agent for Inert {}

    struct Scripted(fn() -> Result<AgentOutput, AgentError>);

    #[async_trait]
    impl Agent for Scripted {
        fn operations(&self) -> &[Operation] {
            &[Operation::Generate]
        }

        async fn call(&self, _operation: Operation, _input: AgentInput) -> Result<AgentOutput, AgentError> {
            (self.0)()
        }
    }

    struct Sleeper;

    #[async_trait]
    impl Agent for Sleeper {
        fn operations(&self) -> &[Operation] {
            &[Operation::Run]
        }

        async fn call(&self, _operation: Operation, _input: AgentInput) -> Result<AgentOutput, AgentError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(AgentOutput::Empty)
        }
    }

    fn eager_panic() -> AgentFactory {
        let handler: HandlerFn = Arc::new(|_: AgentInput| -> BoxFuture<'static, Result<AgentOutput, AgentError>> {
            panic!("handler exploded before returning a future")
        });
        AgentFactory::Handler(handler)
    }

    fn scripted(f: fn() -> Result<AgentOutput, AgentError>) -> AgentFactory {
        AgentFactory::shared(Arc::new(Scripted(f)))
    }

    fn dispatcher() -> Dispatcher {
        let mut builder = AgentRegistry::builder(["finance", "system", "test", "eu.finance"]);
        register_builtin_agents(&mut builder);
        builder
            .register(AgentRegistration::new(
                "test",
                "plain",
                scripted(|| Ok(AgentOutput::Json(json!({"a": 1, "nested": {"b": [true, null]}})))),
            ))
            .register(AgentRegistration::new("test", "inert", AgentFactory::shared(Arc::new(Inert))))
            .register(AgentRegistration::new(
                "test",
                "failing",
                scripted(|| Err(AgentError::Failed("upstream exploded".to_string()))),
            ))
            .register(AgentRegistration::new(
                "test",
                "panicking",
                scripted(|| panic!("agent bug")),
            ))
            .register(AgentRegistration::new("test", "eager_panic", eager_panic()))
            .register(AgentRegistration::new(
                "eu.finance",
                "scorer",
                scripted(|| Ok(AgentOutput::Text("scored".to_string()))),
            ))
            .register(AgentRegistration::new(
                "test",
                "unserializable",
                scripted(|| Ok(AgentOutput::report(HashMap::from([((1u8, 2u8), 3u8)])))),
            ))
            .register(
                AgentRegistration::new("test", "slow", AgentFactory::shared(Arc::new(Sleeper)))
                    .with_timeout(Duration::from_millis(50)),
            )
            .register(
                AgentRegistration::new("test", "retired", AgentFactory::shared(Arc::new(Inert))).disabled(),
            )
            .register(AgentRegistration::new(
                "test",
                "unbuildable",
                AgentFactory::constructor(|_| Err::<AgentRef, _>("missing license".to_string())),
            ));
        Dispatcher::new(Arc::new(builder.build()), Duration::from_secs(5))
    }

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn demo() -> Caller {
        Caller {
            tenant_id: "demo".to_string(),
            plan: Some(crate::tenant::Plan::Starter),
        }
    }

    #[tokio::test]
    async fn unknown_agent_is_not_found() {
        let err = dispatcher()
            .execute("marketing", "doesnotexist", &demo(), Map::new(), Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound { .. }));
    }

    #[tokio::test]
    async fn plain_results_pass_through_unchanged() {
        let envelope = dispatcher()
            .execute("test", "plain", &demo(), Map::new(), Map::new())
            .await
            .unwrap();
        assert_eq!(envelope.status, ExecutionStatus::Ok);
        assert_eq!(envelope.result, json!({"a": 1, "nested": {"b": [true, null]}}));
        assert_eq!(envelope.operation, Some(Operation::Generate));
        assert_eq!(envelope.tenant_id, "demo");
        assert_eq!(envelope.agent_id, "plain");
        assert_eq!(envelope.category, "test");
        assert!(envelope.error.is_none());
    }

    #[tokio::test]
    async fn handler_receives_tenant_context() {
        let envelope = dispatcher()
            .execute("system", "echo", &demo(), data(json!({"x": 1})), data(json!({"verbose": true})))
            .await
            .unwrap();
        assert_eq!(envelope.operation, Some(Operation::Execute));
        assert_eq!(
            envelope.result,
            json!({"input": {"x": 1, "tenant_id": "demo"}, "options": {"verbose": true}})
        );
    }

    #[tokio::test]
    async fn agent_without_operations_is_a_no_op() {
        let envelope = dispatcher()
            .execute("test", "inert", &demo(), Map::new(), Map::new())
            .await
            .unwrap();
        assert_eq!(envelope.status, ExecutionStatus::Ok);
        assert_eq!(envelope.operation, None);
        assert_eq!(envelope.result["executed"], json!(false));
    }

    #[tokio::test]
    async fn missing_attribute_yields_input_schema_error() {
        let envelope = dispatcher()
            .execute("finance", "credit_scorer", &demo(), data(json!({"income": 50000})), Map::new())
            .await
            .unwrap();
        assert_eq!(envelope.status, ExecutionStatus::InputSchemaError);
        assert_eq!(envelope.result["input_received"], json!(["income"]));
        assert_eq!(envelope.result["missing_attribute"], json!("client_id"));
        assert_eq!(envelope.error.unwrap().error_type, "MissingField");
    }

    #[tokio::test]
    async fn agent_errors_are_captured() {
        let envelope = dispatcher()
            .execute("test", "failing", &demo(), Map::new(), Map::new())
            .await
            .unwrap();
        assert_eq!(envelope.status, ExecutionStatus::Error);
        assert_eq!(
            envelope.error,
            Some(ExecutionFailure {
                error_type: "ExecutionError".to_string(),
                message: "upstream exploded".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn panics_are_captured() {
        let envelope = dispatcher()
            .execute("test", "panicking", &demo(), Map::new(), Map::new())
            .await
            .unwrap();
        assert_eq!(envelope.status, ExecutionStatus::Error);
        let error = envelope.error.unwrap();
        assert_eq!(error.error_type, "Panic");
        assert_eq!(error.message, "agent bug");
    }

    #[tokio::test]
    async fn handler_panicking_before_its_future_is_captured() {
        let envelope = dispatcher()
            .execute("test", "eager_panic", &demo(), Map::new(), Map::new())
            .await
            .unwrap();
        assert_eq!(envelope.status, ExecutionStatus::Error);
        assert_eq!(envelope.operation, Some(Operation::Execute));
        let error = envelope.error.unwrap();
        assert_eq!(error.error_type, "Panic");
        assert_eq!(error.message, "handler exploded before returning a future");
    }

    #[tokio::test]
    async fn dotted_core_agents_are_instantiated() {
        let dispatcher = dispatcher();
        let envelope = dispatcher
            .execute("eu.finance", "scorer", &demo(), Map::new(), Map::new())
            .await
            .unwrap();
        assert_eq!(envelope.status, ExecutionStatus::Ok);
        assert_eq!(envelope.result, json!("scored"));
        assert_eq!(envelope.category, "eu.finance");

        let descriptor = dispatcher.registry().get_agent("eu.finance", "scorer").unwrap();
        assert_eq!(descriptor.status, AgentStatus::Active);
        assert!(descriptor.last_error.is_none());
    }

    #[tokio::test]
    async fn normalization_failures_are_captured() {
        let envelope = dispatcher()
            .execute("test", "unserializable", &demo(), Map::new(), Map::new())
            .await
            .unwrap();
        assert_eq!(envelope.status, ExecutionStatus::Error);
        assert_eq!(envelope.error.unwrap().error_type, "SerializationError");
    }

    #[tokio::test]
    async fn slow_agents_time_out() {
        let envelope = dispatcher()
            .execute("test", "slow", &demo(), Map::new(), Map::new())
            .await
            .unwrap();
        assert_eq!(envelope.status, ExecutionStatus::Error);
        assert_eq!(envelope.error.unwrap().error_type, "Timeout");
        assert!(envelope.duration_ms < 5_000);
    }

    #[tokio::test]
    async fn inactive_agents_are_uninstantiable() {
        let err = dispatcher()
            .execute("test", "retired", &demo(), Map::new(), Map::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::Uninstantiable {
                agent: "test.retired".to_string(),
                reason: "agent is inactive".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn construction_failures_are_uninstantiable_and_visible() {
        let dispatcher = dispatcher();
        let err = dispatcher
            .execute("test", "unbuildable", &demo(), Map::new(), Map::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::Uninstantiable {
                agent: "test.unbuildable".to_string(),
                reason: "missing license".to_string(),
            }
        );
        let descriptor = dispatcher.registry().get_agent("test", "unbuildable").unwrap();
        assert_eq!(descriptor.status, AgentStatus::Error);
    }
}
