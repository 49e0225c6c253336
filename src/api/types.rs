//! API request and response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agents::{AgentDescriptor, AgentStatus};

/// Body of `POST /agents/:category/:id/execute`. Both fields are optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecuteRequest {
    /// Business payload handed to the agent
    #[serde(default)]
    pub input_data: Map<String, Value>,

    /// Execution options, passed through untouched
    #[serde(default)]
    pub options: Map<String, Value>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Number of registered agents
    pub agents_loaded: usize,
    /// Cores with at least one active agent
    pub cores_active: usize,
    pub timestamp: DateTime<Utc>,
}

/// Entry of `GET /cores`.
#[derive(Debug, Clone, Serialize)]
pub struct CoreSummary {
    pub id: String,
    pub name: String,
    pub agents_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    pub status: AgentStatus,
}

impl From<AgentDescriptor> for AgentSummary {
    fn from(descriptor: AgentDescriptor) -> Self {
        Self {
            id: descriptor.id,
            name: descriptor.display_name,
            status: descriptor.status,
        }
    }
}

/// Response of `GET /cores/:category`.
#[derive(Debug, Clone, Serialize)]
pub struct CoreDetail {
    pub id: String,
    pub name: String,
    pub agents_count: usize,
    pub agents: Vec<AgentSummary>,
}

/// JSON body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}
