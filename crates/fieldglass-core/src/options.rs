//! The tunables `run_task` accepts, grounded on the external-interface
//! contract. Every field here is independently
//! resolvable through [`crate::config::resolve`]'s layered precedence.

use std::sync::Arc;

use fieldglass_providers::{AppAllowlist, StaticAllowlist};

/// Runtime tunables for one `run_task` invocation. `app_allowlist` has no
/// file/env representation — it is a collaborator, supplied only via the
/// explicit override or the built-in empty default.
#[derive(Clone)]
pub struct RunOptions {
    pub max_steps_per_milestone: u32,
    pub max_retries: u32,
    pub max_milestone_attempts: u32,
    pub active_context_budget: u64,
    pub checkpoint_every: u32,
    pub enable_planner: bool,
    pub enable_verification: bool,
    pub app_allowlist: Arc<dyn AppAllowlist>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_steps_per_milestone: 15,
            max_retries: 3,
            max_milestone_attempts: 2,
            active_context_budget: 1_000_000,
            checkpoint_every: 5,
            enable_planner: true,
            enable_verification: true,
            app_allowlist: Arc::new(StaticAllowlist::new(Vec::new())),
        }
    }
}

/// The explicit, caller-supplied half of the layered resolution: any field
/// left `None` falls through to env, then file, then the built-in default.
#[derive(Clone, Default)]
pub struct RunOptionsOverrides {
    pub max_steps_per_milestone: Option<u32>,
    pub max_retries: Option<u32>,
    pub max_milestone_attempts: Option<u32>,
    pub active_context_budget: Option<u64>,
    pub checkpoint_every: Option<u32>,
    pub enable_planner: Option<bool>,
    pub enable_verification: Option<bool>,
    pub app_allowlist: Option<Arc<dyn AppAllowlist>>,
}
