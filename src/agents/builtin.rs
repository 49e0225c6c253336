//! Built-in agents compiled into the service.
//!
//! | core       | agent                | kind        | operation |
//! |------------|----------------------|-------------|-----------|
//! | system     | `echo`               | handler     | -         |
//! | finance    | `credit_scorer`      | instance    | score     |
//! | marketing  | `campaign_optimizer` | instance    | optimize  |
//! | legal      | `contract_analyzer`  | instance    | analyze   |
//! | operations | `ticket_router`      | instance    | process   |

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::registry::{AgentFactory, AgentRegistration, RegistryBuilder};
use super::types::{AgentError, AgentInput, AgentOutput, Operation};
use super::Agent;

/// Register every built-in agent. Agents whose core is not configured are
/// skipped by the builder.
pub fn register_builtin_agents(builder: &mut RegistryBuilder) {
    builder
        .register(
            AgentRegistration::new("system", "echo", AgentFactory::handler(echo))
                .with_description("Returns its input, including the tenant context"),
        )
        .register(
            AgentRegistration::new("finance", "credit_scorer", AgentFactory::shared(Arc::new(CreditScorer)))
                .with_description("Scores applicants from income, debt and credit history"),
        )
        .register(
            AgentRegistration::new(
                "marketing",
                "campaign_optimizer",
                AgentFactory::shared(Arc::new(CampaignOptimizer)),
            )
            .with_description("Splits a campaign budget across channels"),
        )
        .register(
            AgentRegistration::new(
                "legal",
                "contract_analyzer",
                AgentFactory::shared(Arc::new(ContractAnalyzer)),
            )
            .with_description("Flags standard clauses missing from a contract"),
        )
        .register(
            AgentRegistration::new("operations", "ticket_router", AgentFactory::shared(Arc::new(TicketRouter)))
                .with_description("Assigns support tickets to a team and priority"),
        );
}

async fn echo(input: AgentInput) -> Result<AgentOutput, AgentError> {
    Ok(AgentOutput::Json(json!({
        "input": Value::Object(input.data),
        "options": Value::Object(input.options),
    })))
}

// ─────────────────────────────────────────────────────────────────────────────
// finance.credit_scorer
// ─────────────────────────────────────────────────────────────────────────────

struct CreditScorer;

#[derive(Debug, Serialize)]
struct CreditScore {
    client_id: String,
    score: u32,
    band: &'static str,
    debt_to_income: f64,
}

impl CreditScorer {
    const MIN_SCORE: f64 = 300.0;
    const MAX_SCORE: f64 = 850.0;

    fn band(score: u32) -> &'static str {
        if score >= 740 {
            "excellent"
        } else if score >= 670 {
            "good"
        } else if score >= 580 {
            "fair"
        } else {
            "poor"
        }
    }
}

#[async_trait]
impl Agent for CreditScorer {
    fn operations(&self) -> &[Operation] {
        &[Operation::Score]
    }

    async fn call(&self, operation: Operation, input: AgentInput) -> Result<AgentOutput, AgentError> {
        if operation != Operation::Score {
            return Err(AgentError::Unsupported(operation));
        }
        let client_id = input.require_str("client_id")?.to_string();
        let income = input.require_f64("income")?;
        if income <= 0.0 {
            return Err(AgentError::InvalidField {
                field: "income".to_string(),
                expected: "positive number".to_string(),
            });
        }
        let debt = input.optional_f64("debt")?.unwrap_or(0.0).max(0.0);
        let history_years = input.optional_f64("credit_history_years")?.unwrap_or(0.0).max(0.0);

        let debt_to_income = debt / income;
        let raw = Self::MIN_SCORE + (income / 1000.0).min(250.0) - (debt_to_income * 200.0).min(200.0)
            + (history_years * 10.0).min(150.0);
        let score = raw.clamp(Self::MIN_SCORE, Self::MAX_SCORE).round() as u32;

        Ok(AgentOutput::report(CreditScore {
            client_id,
            score,
            band: Self::band(score),
            debt_to_income: (debt_to_income * 1000.0).round() / 1000.0,
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// marketing.campaign_optimizer
// ─────────────────────────────────────────────────────────────────────────────

struct CampaignOptimizer;

#[derive(Debug, Deserialize)]
struct CampaignRequest {
    budget: f64,
    channels: Vec<String>,
    #[serde(default)]
    goal: Option<String>,
}

impl CampaignOptimizer {
    fn weight(channel: &str, goal: Option<&str>) -> f64 {
        let base = match channel {
            "search" => 1.5,
            "social" => 1.2,
            "video" => 1.1,
            "email" => 1.0,
            "display" => 0.8,
            _ => 1.0,
        };
        match (goal, channel) {
            (Some("awareness"), "social" | "video" | "display") => base * 1.3,
            (Some("conversion"), "search" | "email") => base * 1.3,
            _ => base,
        }
    }
}

#[async_trait]
impl Agent for CampaignOptimizer {
    fn operations(&self) -> &[Operation] {
        &[Operation::Optimize]
    }

    async fn call(&self, operation: Operation, input: AgentInput) -> Result<AgentOutput, AgentError> {
        if operation != Operation::Optimize {
            return Err(AgentError::Unsupported(operation));
        }
        let request: CampaignRequest = input.parse()?;
        if request.budget <= 0.0 {
            return Err(AgentError::InvalidField {
                field: "budget".to_string(),
                expected: "positive number".to_string(),
            });
        }
        if request.channels.is_empty() {
            return Err(AgentError::InvalidInput("channels cannot be empty".to_string()));
        }

        let goal = request.goal.as_deref();
        let weights: Vec<f64> = request
            .channels
            .iter()
            .map(|c| Self::weight(&c.to_lowercase(), goal))
            .collect();
        let total: f64 = weights.iter().sum();

        let allocation: serde_json::Map<String, Value> = request
            .channels
            .iter()
            .zip(weights.iter())
            .map(|(channel, weight)| {
                let amount = (request.budget * weight / total * 100.0).round() / 100.0;
                (channel.clone(), json!(amount))
            })
            .collect();

        Ok(AgentOutput::Json(json!({
            "budget": request.budget,
            "goal": goal.unwrap_or("balanced"),
            "allocation": allocation,
        })))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// legal.contract_analyzer
// ─────────────────────────────────────────────────────────────────────────────

struct ContractAnalyzer;

const STANDARD_CLAUSES: &[(&str, &[&str])] = &[
    ("termination", &["terminat"]),
    ("indemnification", &["indemnif"]),
    ("limitation_of_liability", &["limitation of liability", "liable"]),
    ("confidentiality", &["confidential"]),
    ("governing_law", &["governing law", "governed by"]),
];

#[derive(Debug, Serialize)]
struct ContractReport {
    clauses_found: Vec<&'static str>,
    missing_clauses: Vec<&'static str>,
    risk_level: &'static str,
    word_count: usize,
}

#[async_trait]
impl Agent for ContractAnalyzer {
    fn operations(&self) -> &[Operation] {
        &[Operation::Analyze]
    }

    async fn call(&self, operation: Operation, input: AgentInput) -> Result<AgentOutput, AgentError> {
        if operation != Operation::Analyze {
            return Err(AgentError::Unsupported(operation));
        }
        let text = input.require_str("text")?;
        let lowered = text.to_lowercase();

        let (found, missing): (Vec<_>, Vec<_>) = STANDARD_CLAUSES
            .iter()
            .partition(|(_, needles)| needles.iter().any(|n| lowered.contains(n)));

        let risk_level = match missing.len() {
            0 => "low",
            1 | 2 => "medium",
            _ => "high",
        };

        Ok(AgentOutput::report(ContractReport {
            clauses_found: found.iter().map(|(name, _)| *name).collect(),
            missing_clauses: missing.iter().map(|(name, _)| *name).collect(),
            risk_level,
            word_count: text.split_whitespace().count(),
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// operations.ticket_router
// ─────────────────────────────────────────────────────────────────────────────

struct TicketRouter;

impl TicketRouter {
    fn route(text: &str) -> (&'static str, &'static str) {
        let has = |words: &[&str]| words.iter().any(|w| text.contains(w));
        let priority = if has(&["outage", "down", "data loss"]) {
            "critical"
        } else if has(&["urgent", "asap", "blocked"]) {
            "high"
        } else {
            "normal"
        };
        let team = if has(&["billing", "invoice", "refund", "charge"]) {
            "billing"
        } else if has(&["password", "login", "access", "sso"]) {
            "identity"
        } else if has(&["outage", "down", "error", "bug"]) {
            "engineering"
        } else {
            "general"
        };
        (team, priority)
    }
}

#[async_trait]
impl Agent for TicketRouter {
    fn operations(&self) -> &[Operation] {
        &[Operation::Process]
    }

    async fn call(&self, operation: Operation, input: AgentInput) -> Result<AgentOutput, AgentError> {
        if operation != Operation::Process {
            return Err(AgentError::Unsupported(operation));
        }
        let subject = input.require_str("subject")?;
        let body = match input.get("body") {
            Some(_) => input.require_str("body")?,
            None => "",
        };
        let text = format!("{} {}", subject, body).to_lowercase();
        let (team, priority) = Self::route(&text);

        Ok(AgentOutput::Json(json!({
            "subject": subject,
            "team": team,
            "priority": priority,
        })))
    }
}
