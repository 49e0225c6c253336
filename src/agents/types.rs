//! Core types for the agent system.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tenant::Caller;

/// Operations an agent can expose, in the order the dispatcher tries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Execute,
    Run,
    Process,
    Analyze,
    Score,
    Personalize,
    Optimize,
    Generate,
    Predict,
}

impl Operation {
    /// Dispatch priority: the first operation an agent supports wins.
    pub const PRIORITY: [Operation; 9] = [
        Self::Execute,
        Self::Run,
        Self::Process,
        Self::Analyze,
        Self::Score,
        Self::Personalize,
        Self::Optimize,
        Self::Generate,
        Self::Predict,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::Run => "run",
            Self::Process => "process",
            Self::Analyze => "analyze",
            Self::Score => "score",
            Self::Personalize => "personalize",
            Self::Optimize => "optimize",
            Self::Generate => "generate",
            Self::Predict => "predict",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::PRIORITY
            .iter()
            .copied()
            .find(|op| op.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| AgentError::Failed(format!("unknown operation '{}'", s)))
    }
}

/// Caller-supplied input plus the tenant it runs for.
#[derive(Debug, Clone)]
pub struct AgentInput {
    /// The `input_data` object of the request
    pub data: Map<String, Value>,
    /// The `options` object of the request
    pub options: Map<String, Value>,
    pub tenant: Caller,
}

impl AgentInput {
    pub fn new(data: Map<String, Value>, options: Map<String, Value>, tenant: Caller) -> Self {
        Self {
            data,
            options,
            tenant,
        }
    }

    /// Input keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field).filter(|v| !v.is_null())
    }

    /// Field value, or `MissingField` when absent or null.
    pub fn require(&self, field: &str) -> Result<&Value, AgentError> {
        self.get(field).ok_or_else(|| AgentError::MissingField {
            field: field.to_string(),
        })
    }

    pub fn require_str(&self, field: &str) -> Result<&str, AgentError> {
        self.require(field)?
            .as_str()
            .ok_or_else(|| AgentError::InvalidField {
                field: field.to_string(),
                expected: "string".to_string(),
            })
    }

    pub fn require_f64(&self, field: &str) -> Result<f64, AgentError> {
        self.require(field)?
            .as_f64()
            .ok_or_else(|| AgentError::InvalidField {
                field: field.to_string(),
                expected: "number".to_string(),
            })
    }

    pub fn optional_f64(&self, field: &str) -> Result<Option<f64>, AgentError> {
        match self.get(field) {
            None => Ok(None),
            Some(_) => self.require_f64(field).map(Some),
        }
    }

    /// Deserialize the whole input into a typed payload.
    ///
    /// Serde's "missing field" errors become `MissingField`, everything else
    /// becomes `InvalidInput`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, AgentError> {
        serde_json::from_value(Value::Object(self.data.clone())).map_err(|e| {
            let message = e.to_string();
            match missing_field_name(&message) {
                Some(field) => AgentError::MissingField { field },
                None => AgentError::InvalidInput(message),
            }
        })
    }

    /// Input data with `tenant_id` added, as handed to handler agents.
    pub fn with_tenant_merged(mut self) -> Self {
        self.data.insert(
            "tenant_id".to_string(),
            Value::String(self.tenant.tenant_id.clone()),
        );
        self
    }
}

/// Extract `name` from serde's "missing field `name`" message.
fn missing_field_name(message: &str) -> Option<String> {
    let rest = message.strip_prefix("missing field `")?;
    let end = rest.find('`')?;
    Some(rest[..end].to_string())
}

/// A structured result that knows how to serialize itself.
pub trait Report: Send + Sync {
    fn to_json(&self) -> Result<Value, AgentError>;
}

impl<T: Serialize + Send + Sync> Report for T {
    fn to_json(&self) -> Result<Value, AgentError> {
        serde_json::to_value(self).map_err(|e| AgentError::Serialization(e.to_string()))
    }
}

/// The closed set of result shapes an agent may return.
pub enum AgentOutput {
    /// Already-plain JSON, passed through unchanged
    Json(Value),
    Text(String),
    /// Structured value serialized on normalization
    Report(Box<dyn Report>),
    Empty,
}

impl AgentOutput {
    pub fn report(report: impl Report + 'static) -> Self {
        Self::Report(Box::new(report))
    }

    /// Normalize into a plain JSON value.
    pub fn into_value(self) -> Result<Value, AgentError> {
        match self {
            Self::Json(value) => Ok(value),
            Self::Text(text) => Ok(Value::String(text)),
            Self::Report(report) => report.to_json(),
            Self::Empty => Ok(Value::Null),
        }
    }
}

impl fmt::Debug for AgentOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Report(_) => f.write_str("Report(..)"),
            Self::Empty => f.write_str("Empty"),
        }
    }
}

/// Errors an agent can raise while running.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AgentError {
    #[error("Missing required input field '{field}'")]
    MissingField { field: String },

    #[error("Input field '{field}' must be a {expected}")]
    InvalidField { field: String, expected: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation '{0}' is not supported by this agent")]
    Unsupported(Operation),

    #[error("Failed to serialize result: {0}")]
    Serialization(String),

    #[error("{0}")]
    Failed(String),
}

impl AgentError {
    /// Whether the error means the input had the wrong shape.
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            Self::MissingField { .. } | Self::InvalidField { .. } | Self::InvalidInput(_)
        )
    }

    /// The offending input field, when known.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::MissingField { field } | Self::InvalidField { field, .. } => Some(field),
            _ => None,
        }
    }

    /// Stable label reported as `error_type` in envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingField { .. } => "MissingField",
            Self::InvalidField { .. } => "InvalidField",
            Self::InvalidInput(_) => "InvalidInput",
            Self::Unsupported(_) => "Unsupported",
            Self::Serialization(_) => "SerializationError",
            Self::Failed(_) => "ExecutionError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(data: Value) -> AgentInput {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        AgentInput::new(data, Map::new(), Caller::anonymous())
    }

    #[test]
    fn priority_starts_with_execute_and_ends_with_predict() {
        assert_eq!(Operation::PRIORITY[0], Operation::Execute);
        assert_eq!(Operation::PRIORITY[8], Operation::Predict);
        assert_eq!("Analyze".parse::<Operation>().unwrap(), Operation::Analyze);
        assert!("explode".parse::<Operation>().is_err());
    }

    #[test]
    fn require_reports_missing_and_mistyped_fields() {
        let input = input(json!({"income": 50000, "name": null}));
        assert_eq!(input.require_f64("income").unwrap(), 50000.0);
        assert_eq!(
            input.require_str("client_id"),
            Err(AgentError::MissingField {
                field: "client_id".to_string()
            })
        );
        assert!(matches!(
            input.require("name"),
            Err(AgentError::MissingField { .. })
        ));
        assert!(matches!(
            input.require_str("income"),
            Err(AgentError::InvalidField { .. })
        ));
    }

    #[test]
    fn parse_maps_missing_field() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Payload {
            client_id: String,
            income: f64,
        }

        let err = input(json!({"income": 1.0})).parse::<Payload>().unwrap_err();
        assert_eq!(
            err,
            AgentError::MissingField {
                field: "client_id".to_string()
            }
        );
        assert!(err.is_schema_error());

        let err = input(json!({"client_id": 3, "income": 1.0}))
            .parse::<Payload>()
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidInput(_)));
    }

    #[test]
    fn keys_are_sorted() {
        let input = input(json!({"b": 1, "a": 2}));
        assert_eq!(input.keys(), vec!["a", "b"]);
    }

    #[test]
    fn with_tenant_merged_adds_tenant_id() {
        let merged = input(json!({"x": 1})).with_tenant_merged();
        assert_eq!(merged.data["tenant_id"], json!("anonymous"));
        assert_eq!(merged.data["x"], json!(1));
    }

    #[test]
    fn outputs_normalize() {
        #[derive(Serialize)]
        struct Score {
            value: u32,
        }

        let plain = json!({"a": [1, 2]});
        assert_eq!(AgentOutput::Json(plain.clone()).into_value().unwrap(), plain);
        assert_eq!(
            AgentOutput::Text("hi".to_string()).into_value().unwrap(),
            json!("hi")
        );
        assert_eq!(
            AgentOutput::report(Score { value: 7 }).into_value().unwrap(),
            json!({"value": 7})
        );
        assert_eq!(AgentOutput::Empty.into_value().unwrap(), Value::Null);
    }
}
