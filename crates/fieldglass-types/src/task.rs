use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::action::ActionRecord;
use crate::error::ErrorRecord;

/// The immutable user input. Created once per invocation; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub context: HashMap<String, Value>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            context: HashMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// `context["text"]` as a string, used by the intent parser's TypeText
    /// fallback chain.
    pub fn context_text(&self, key: &str) -> Option<String> {
        self.context.get(key).and_then(|v| v.as_str()).map(str::to_string)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

/// A unit of decomposed work with an explicit success criterion. Created by
/// the planner; mutated only by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub description: String,
    pub success_criteria: Vec<String>,
    pub status: MilestoneStatus,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
}

impl Milestone {
    pub fn new(id: impl Into<String>, description: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            success_criteria: Vec::new(),
            status: MilestoneStatus::Pending,
            dependencies: Vec::new(),
            attempts: 0,
            max_attempts,
            error: None,
        }
    }

    pub fn with_success_criteria(mut self, criteria: Vec<String>) -> Self {
        self.success_criteria = criteria;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// A milestone may start only when every dependency is completed.
    pub fn is_ready(&self, completed_ids: &[String]) -> bool {
        self.status == MilestoneStatus::Pending
            && self.dependencies.iter().all(|dep| completed_ids.iter().any(|c| c == dep))
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// One completed step in the observe/reason/act/verify loop. Immutable once
/// appended to the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_index: u32,
    pub observation: String,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionRecord>,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
}

impl StepRecord {
    pub fn confidence_in_range(&self) -> bool {
        (0.0..=1.0).contains(&self.confidence)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneOutcome {
    pub milestone_id: String,
    pub status: MilestoneStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub milestones: Vec<MilestoneOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_error: Option<ErrorRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn milestone_ready_when_dependencies_completed() {
        let m = Milestone::new("m2", "second", 2).with_dependencies(vec!["m1".into()]);
        assert!(!m.is_ready(&[]));
        assert!(m.is_ready(&["m1".to_string()]));
    }

    #[test]
    fn milestone_retry_bounded_by_max_attempts() {
        let mut m = Milestone::new("m1", "first", 2);
        assert!(m.can_retry());
        m.attempts = 2;
        assert!(!m.can_retry());
    }
}
