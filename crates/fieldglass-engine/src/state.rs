//! Per-worker agent state, owned by a single invocation of the step graph.

use std::collections::HashMap;

use fieldglass_types::{ErrorRecord, StepRecord, Task};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub struct AgentState {
    pub task: Task,
    pub milestone_id: Option<String>,
    pub context: HashMap<String, Value>,
    pub history: Vec<StepRecord>,
    pub step_index: u32,
    pub max_steps: u32,
    pub cancel_signal: CancellationToken,
    pub consecutive_failures: u32,
    pub result: Option<Value>,
    pub terminal_error: Option<ErrorRecord>,
    pub consecutive_no_actions: u32,
}

impl AgentState {
    pub fn new(task: Task, milestone_id: Option<String>, max_steps: u32, cancel_signal: CancellationToken) -> Self {
        let context = task.context.clone();
        Self {
            task,
            milestone_id,
            context,
            history: Vec::new(),
            step_index: 0,
            max_steps,
            cancel_signal,
            consecutive_failures: 0,
            result: None,
            terminal_error: None,
            consecutive_no_actions: 0,
        }
    }

    pub fn budget_exhausted(&self) -> bool {
        self.step_index >= self.max_steps
    }
}
