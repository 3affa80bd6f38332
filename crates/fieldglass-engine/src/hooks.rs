//! Middleware hook pipeline for the step graph engine. Grounded on the
//! `tandem-core::hooks`'s priority-ordered registry and
//! `HookResult::{Continue,Cancel}` short-circuiting shape, narrowed to the
//! three node boundaries the engine actually exposes.

use std::sync::Arc;

use fieldglass_types::{ActionKind, ErrorRecord};

#[derive(Debug, Clone)]
pub enum HookResult<T> {
    Continue(T),
    Cancel(String),
}

/// Hook points around the graph's node boundaries. All methods default to a
/// pass-through no-op; implement only the ones a given hook cares about.
#[async_trait::async_trait]
pub trait EngineHook: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> i32 {
        0
    }

    async fn before_reason(&self, prompt: String) -> HookResult<String> {
        HookResult::Continue(prompt)
    }

    async fn before_act(&self, action: ActionKind) -> HookResult<ActionKind> {
        HookResult::Continue(action)
    }

    async fn after_step(&self, _step_index: u32, _error: Option<&ErrorRecord>) {}
}

pub struct HookRegistry {
    hooks: Vec<Arc<dyn EngineHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    pub fn register(&mut self, hook: Arc<dyn EngineHook>) {
        self.hooks.push(hook);
        self.hooks.sort_by_key(|h| h.priority());
    }

    pub async fn run_before_reason(&self, prompt: String) -> Option<String> {
        let mut current = prompt;
        for hook in &self.hooks {
            match hook.before_reason(current).await {
                HookResult::Continue(next) => current = next,
                HookResult::Cancel(reason) => {
                    tracing::info!(hook = hook.name(), reason = %reason, "before_reason cancelled");
                    return None;
                }
            }
        }
        Some(current)
    }

    pub async fn run_before_act(&self, action: ActionKind) -> Option<ActionKind> {
        let mut current = action;
        for hook in &self.hooks {
            match hook.before_act(current).await {
                HookResult::Continue(next) => current = next,
                HookResult::Cancel(reason) => {
                    tracing::info!(hook = hook.name(), reason = %reason, "before_act cancelled");
                    return None;
                }
            }
        }
        Some(current)
    }

    pub async fn fire_after_step(&self, step_index: u32, error: Option<&ErrorRecord>) {
        for hook in &self.hooks {
            hook.after_step(step_index, error).await;
        }
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}
