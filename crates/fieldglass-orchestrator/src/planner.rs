//! The planner: turns a task (or a failed milestone plus its error) into an
//! ordered milestone list via a low-temperature model call. Grounded on the
//! `MissionSpec` shape for what a decomposed unit of work carries
//! (`success_criteria`, `depends_on`), replacing the static spec document
//! with a model-driven one since milestones aren't known up front here.

use std::sync::Arc;

use async_trait::async_trait;
use fieldglass_providers::{GenerateOptions, ModelBackend};
use fieldglass_types::{ErrorKind, ErrorRecord, Milestone, StepRecord, Task};
use serde::Deserialize;

/// Context handed to the planner when re-planning after a milestone failed.
pub struct ReplanRequest<'a> {
    pub failed_milestone: &'a Milestone,
    pub error: &'a ErrorRecord,
    pub recent_steps: &'a [StepRecord],
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, task: &Task, replan: Option<&ReplanRequest<'_>>) -> Result<Vec<Milestone>, ErrorRecord>;
}

#[derive(Debug, Deserialize)]
struct PlannedMilestoneWire {
    #[serde(default)]
    id: Option<String>,
    description: String,
    #[serde(default)]
    success_criteria: Vec<String>,
    #[serde(default)]
    dependencies: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PlanWire {
    #[serde(default)]
    milestones: Vec<PlannedMilestoneWire>,
}

/// A [`Planner`] backed by a [`ModelBackend`], expecting a strict JSON plan
/// back. Any response that doesn't parse to a non-empty milestone list is a
/// terminal `PlanningFailure` — the coordinator never guesses at a plan.
pub struct ModelPlanner {
    model: Arc<dyn ModelBackend>,
    max_attempts_per_milestone: u32,
}

impl ModelPlanner {
    pub fn new(model: Arc<dyn ModelBackend>, max_attempts_per_milestone: u32) -> Self {
        Self {
            model,
            max_attempts_per_milestone,
        }
    }

    fn build_prompt(&self, task: &Task, replan: Option<&ReplanRequest<'_>>) -> String {
        match replan {
            None => format!(
                "Decompose the task into an ordered list of milestones, each with explicit \
                 success criteria. Respond with JSON only, matching exactly: \
                 {{\"milestones\":[{{\"description\":string,\"success_criteria\":[string],\"dependencies\":[string]}}]}}.\n\
                 Task: {}",
                task.description
            ),
            Some(r) => format!(
                "Milestone `{}` ({}) failed with {:?}: {}. Recent reasoning: {}.\n\
                 Produce a replacement JSON plan for the remaining work in the same schema. \
                 If the failed milestone should be retried, reuse id `{}` for its corrected \
                 version; otherwise omit it and describe only the new remedial milestones needed.",
                r.failed_milestone.id,
                r.failed_milestone.description,
                r.error.kind,
                r.error.message,
                r.recent_steps
                    .iter()
                    .map(|s| s.reasoning.as_str())
                    .collect::<Vec<_>>()
                    .join(" | "),
                r.failed_milestone.id,
            ),
        }
    }

    fn existing_ids(replan: Option<&ReplanRequest<'_>>) -> Vec<String> {
        replan
            .map(|r| vec![r.failed_milestone.id.clone()])
            .unwrap_or_default()
    }
}

#[async_trait]
impl Planner for ModelPlanner {
    async fn plan(&self, task: &Task, replan: Option<&ReplanRequest<'_>>) -> Result<Vec<Milestone>, ErrorRecord> {
        let prompt = self.build_prompt(task, replan);
        let options = GenerateOptions {
            temperature: 0.1,
            max_tokens: None,
        };
        let raw = self.model.generate(&prompt, &options).await?;
        parse_plan(&raw, self.max_attempts_per_milestone, &Self::existing_ids(replan))
    }
}

/// Parse a model's plan response into milestones, assigning fresh ids to any
/// entry the model didn't id itself. Non-JSON or empty-milestone responses
/// are a `PlanningFailure`, never a panic or a silent empty plan.
pub fn parse_plan(raw: &str, max_attempts: u32, existing_ids: &[String]) -> Result<Vec<Milestone>, ErrorRecord> {
    let trimmed = strip_code_fence(raw.trim());
    let wire: PlanWire = serde_json::from_str(trimmed)
        .map_err(|e| ErrorRecord::new(ErrorKind::PlanningFailure, format!("unparseable plan: {e}")))?;

    if wire.milestones.is_empty() {
        return Err(ErrorRecord::new(ErrorKind::PlanningFailure, "planner returned an empty milestone list"));
    }

    let mut used: Vec<String> = existing_ids.to_vec();
    let mut next_seq = 1usize;
    let mut milestones = Vec::with_capacity(wire.milestones.len());

    for entry in wire.milestones {
        let id = match entry.id {
            Some(id) => id,
            None => {
                let mut candidate = format!("m{next_seq}");
                while used.contains(&candidate) {
                    next_seq += 1;
                    candidate = format!("m{next_seq}");
                }
                candidate
            }
        };
        next_seq += 1;
        used.push(id.clone());

        milestones.push(
            Milestone::new(id, entry.description, max_attempts)
                .with_success_criteria(entry.success_criteria)
                .with_dependencies(entry.dependencies),
        );
    }

    Ok(milestones)
}

fn strip_code_fence(s: &str) -> &str {
    let s = s.strip_prefix("```json").or_else(|| s.strip_prefix("```")).unwrap_or(s);
    s.strip_suffix("```").unwrap_or(s).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_plan() {
        let raw = r#"{"milestones":[{"description":"open app","success_criteria":["app visible"],"dependencies":[]},{"description":"type text","success_criteria":["text entered"],"dependencies":["m1"]}]}"#;
        let plan = parse_plan(raw, 3, &[]).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].id, "m1");
        assert_eq!(plan[1].dependencies, vec!["m1".to_string()]);
    }

    #[test]
    fn strips_markdown_code_fence() {
        let raw = "```json\n{\"milestones\":[{\"description\":\"a\"}]}\n```";
        let plan = parse_plan(raw, 3, &[]).unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn empty_milestone_list_is_planning_failure() {
        let err = parse_plan(r#"{"milestones":[]}"#, 3, &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PlanningFailure);
    }

    #[test]
    fn unparseable_response_is_planning_failure() {
        let err = parse_plan("not json at all", 3, &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PlanningFailure);
    }

    #[test]
    fn explicit_ids_are_respected() {
        let raw = r#"{"milestones":[{"id":"m1","description":"retry the click"}]}"#;
        let plan = parse_plan(raw, 3, &["m1".to_string()]).unwrap();
        assert_eq!(plan[0].id, "m1");
    }
}
