//! Template agents - canned-response agents declared by manifests.
//!
//! A template checks its required input fields and returns its configured
//! response. String values of the form `{{field}}` are replaced by the input
//! value of that field (`{{tenant_id}}` by the calling tenant).

use async_trait::async_trait;
use serde_json::Value;

use super::manifest::TemplateSpec;
use super::types::{AgentError, AgentInput, AgentOutput, Operation};
use super::Agent;

pub struct TemplateAgent {
    id: String,
    operations: [Operation; 1],
    required_fields: Vec<String>,
    response: Value,
}

impl TemplateAgent {
    pub fn new(id: &str, spec: TemplateSpec) -> Self {
        Self {
            id: id.to_string(),
            operations: [spec.operation],
            required_fields: spec.required_fields,
            response: spec.response,
        }
    }

    fn render(&self, value: &Value, input: &AgentInput) -> Value {
        match value {
            Value::String(s) => match placeholder(s) {
                Some("tenant_id") => Value::String(input.tenant.tenant_id.clone()),
                Some(field) => input.get(field).cloned().unwrap_or(Value::Null),
                None => value.clone(),
            },
            Value::Array(items) => Value::Array(items.iter().map(|v| self.render(v, input)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.render(v, input)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// `"{{name}}"` -> `Some("name")`
fn placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?.trim();
    if inner.is_empty() {
        None
    } else {
        Some(inner)
    }
}

#[async_trait]
impl Agent for TemplateAgent {
    fn operations(&self) -> &[Operation] {
        &self.operations
    }

    async fn call(&self, operation: Operation, input: AgentInput) -> Result<AgentOutput, AgentError> {
        if operation != self.operations[0] {
            return Err(AgentError::Unsupported(operation));
        }
        for field in &self.required_fields {
            input.require(field)?;
        }
        tracing::debug!(agent = %self.id, "Rendering template response");
        Ok(AgentOutput::Json(self.render(&self.response, &input)))
    }
}
