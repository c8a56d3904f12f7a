//! # relx-server: HTTP Service for the relx Planner
//!
//! Accepts logical plans as JSON, optimizes them for a requested calling
//! convention and returns the chosen physical plan with its generated code, or runs
//! it over rows supplied inline.
//!
//! ## Endpoints
//!
//! - `GET  /health`       - Health check
//! - `GET  /conventions`  - Registered conventions and convertlets
//! - `GET  /rules`        - Registered rules in firing order
//! - `POST /optimize`     - Optimize a plan, return plan, cost and generated code
//! - `POST /execute`      - Optimize and run a plan over inline table rows
//!
//! ## Configuration
//!
//! `RELX_LISTEN_ADDR` (default `0.0.0.0:3000`), `RELX_MAX_ITERATIONS` and
//! `RELX_MAX_MEMO_GROUPS` bound the server and its searches. Logging is controlled by
//! `RUST_LOG` (defaults to `relx=debug`).

mod plan_json;
mod routes;
mod state;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("relx=debug".parse()?))
        .init();

    let config = state::OptimizerConfig::from_env();
    let addr = config.listen_addr.clone();
    let state = Arc::new(state::AppState::new(config)?);

    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/conventions", get(routes::list_conventions))
        .route("/rules", get(routes::list_rules))
        .route("/optimize", post(routes::optimize))
        .route("/execute", post(routes::execute))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("relx-server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
