//! # Application State
//!
//! Created once at startup and shared by every request through `Arc`.
//!
//! - **Registry**: conventions, convertlets, rules and implementors. Frozen at startup;
//!   every optimization reads the same instance.
//! - **Cost Model**: stateless, shared.
//! - **Optimizer Config**: search budgets, read from the environment.
//!
//! Catalogs are per request: each request describes the tables it reads.

use relx_core::cost::{CostModel, DefaultCostModel};
use relx_core::error::ConfigurationError;
use relx_core::registry::Registry;
use relx_core::search::SearchConfig;
use std::sync::Arc;

/// Server-level optimizer configuration.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub listen_addr: String,
    pub search: SearchConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            search: SearchConfig::default(),
        }
    }
}

impl OptimizerConfig {
    /// Defaults overridden by `RELX_LISTEN_ADDR`, `RELX_MAX_ITERATIONS` and
    /// `RELX_MAX_MEMO_GROUPS`. Unparsable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("RELX_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Some(n) = env_usize("RELX_MAX_ITERATIONS") {
            config.search.max_iterations = n;
        }
        if let Some(n) = env_usize("RELX_MAX_MEMO_GROUPS") {
            config.search.max_memo_groups = n;
        }
        config
    }
}

fn env_usize(name: &str) -> Option<usize> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(n) => Some(n),
        Err(e) => {
            tracing::warn!("Ignoring {name}={raw}: {e}");
            None
        }
    }
}

pub struct AppState {
    pub registry: Arc<Registry>,
    pub cost_model: Arc<dyn CostModel>,
    pub config: OptimizerConfig,
}

impl AppState {
    pub fn new(config: OptimizerConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            registry: relx_exec::default_registry()?,
            cost_model: Arc::new(DefaultCostModel::default()),
            config,
        })
    }
}
