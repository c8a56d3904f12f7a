//! # HTTP Route Handlers
//!
//! ## Optimization Pipeline
//!
//! `POST /optimize` and `POST /execute` share `run_optimization`:
//!
//! 1. **Consume**: build a fresh memo and a catalog from the JSON request.
//! 2. **Optimize**: run the Volcano search for the requested convention.
//! 3. **Generate**: turn the chosen plan into an executable fragment.
//!
//! `/execute` additionally runs the fragment over the request's inline rows.
//!
//! ## Error Handling
//!
//! - 400 Bad Request: malformed plan or unknown convention
//! - 422 Unprocessable Entity: no plan exists in the requested convention
//! - 500 Internal Server Error: code generation or execution failed

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use relx_core::codegen::CodeGenerator;
use relx_core::error::OptimizationError;
use relx_core::fragment::ExecutableFragment;
use relx_core::memo::{Memo, PhysicalPlan};
use relx_core::rule::RuleType;
use relx_core::search::{Goal, VolcanoSearch};
use relx_exec::Interpreter;

use crate::plan_json::{self, PlanRequest};
use crate::state::AppState;

type HttpError = (StatusCode, String);

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// GET /conventions: registered conventions and convertlet pairs.
pub async fn list_conventions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let traits = state.registry.traits();
    Json(ConventionsResponse {
        conventions: traits.conventions().iter().map(|c| c.name().to_string()).collect(),
        convertlets: state
            .registry
            .convertlets()
            .pairs()
            .map(|(from, to)| ConvertletInfo {
                from: from.name().to_string(),
                to: to.name().to_string(),
            })
            .collect(),
    })
}

#[derive(Serialize)]
pub struct ConventionsResponse {
    pub conventions: Vec<String>,
    pub convertlets: Vec<ConvertletInfo>,
}

#[derive(Serialize)]
pub struct ConvertletInfo {
    pub from: String,
    pub to: String,
}

/// GET /rules: registered rules in firing order.
pub async fn list_rules(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let rules = state
        .registry
        .rules()
        .iter()
        .map(|r| RuleInfo {
            name: r.name().to_string(),
            rule_type: match r.rule_type() {
                RuleType::Transformation => "transformation",
                RuleType::Implementation => "implementation",
            }
            .to_string(),
        })
        .collect();
    Json(RulesResponse { rules })
}

#[derive(Serialize)]
pub struct RulesResponse {
    pub rules: Vec<RuleInfo>,
}

#[derive(Serialize)]
pub struct RuleInfo {
    pub name: String,
    pub rule_type: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeResponse {
    pub cost: f64,
    pub truncated: bool,
    pub iterations: usize,
    pub explain: String,
    pub program: String,
    pub plan: PhysicalPlan,
}

/// POST /optimize: optimize a JSON plan, return the chosen plan and its code.
pub async fn optimize(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PlanRequest>,
) -> Result<Json<OptimizeResponse>, HttpError> {
    let (plan, iterations) = run_optimization(&state, &req)?;
    let fragment = generate(&state, &plan)?;
    Ok(Json(OptimizeResponse {
        cost: plan.cost().total,
        truncated: plan.truncated(),
        iterations,
        explain: plan.explain(),
        program: fragment.to_string(),
        plan,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub cost: f64,
    pub truncated: bool,
}

/// POST /execute: run the optimized plan over the inline table rows.
pub async fn execute(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PlanRequest>,
) -> Result<Json<ExecuteResponse>, HttpError> {
    let source = plan_json::row_source(&req.tables).map_err(|e| (StatusCode::BAD_REQUEST, e))?;
    let (plan, _) = run_optimization(&state, &req)?;
    let fragment = generate(&state, &plan)?;
    let rows = Interpreter::new(&source)
        .run(&fragment)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Execution failed: {e}")))?;
    Ok(Json(ExecuteResponse {
        columns: plan.root().row_type.names(),
        rows: rows
            .iter()
            .map(|row| row.iter().map(plan_json::json_value).collect())
            .collect(),
        cost: plan.cost().total,
        truncated: plan.truncated(),
    }))
}

/// Build a fresh memo for the request and search it.
fn run_optimization(state: &AppState, req: &PlanRequest) -> Result<(PhysicalPlan, usize), HttpError> {
    let convention = state
        .registry
        .traits()
        .lookup(&req.convention)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let mut memo = Memo::new();
    let root = plan_json::build_memo(&req.plan, &req.tables, &mut memo)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to consume plan: {e}")))?;

    let mut search = VolcanoSearch::new(
        memo,
        Arc::clone(&state.registry),
        Arc::clone(&state.cost_model),
        Arc::new(plan_json::catalog(&req.tables)),
        state.config.search.clone(),
    );
    let mut goal = Goal::new(convention);
    if let Some(ceiling) = req.cost_ceiling {
        goal = goal.with_cost_ceiling(ceiling);
    }
    let plan = search.optimize(root, &goal).map_err(|e| {
        let status = match e {
            OptimizationError::UnsatisfiableConvention { .. } | OptimizationError::BudgetExceeded { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, format!("Optimization failed: {e}"))
    })?;
    Ok((plan, search.iterations()))
}

fn generate(state: &AppState, plan: &PhysicalPlan) -> Result<ExecutableFragment, HttpError> {
    CodeGenerator::new(Arc::clone(&state.registry))
        .generate(plan)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Code generation failed: {e}")))
}
