//! Periodic snapshots supporting resumption after a crash or cancellation.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AuditError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone_id: Option<String>,
    pub step_index: u32,
    pub active_memory_ids: Vec<String>,
    pub consecutive_failures: u32,
    pub written_at: DateTime<Utc>,
}

pub fn write_checkpoint(path: &Path, checkpoint: &Checkpoint) -> Result<(), AuditError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(checkpoint)?;
    std::fs::write(path, text)?;
    Ok(())
}

pub fn read_checkpoint(path: &Path) -> Result<Option<Checkpoint>, AuditError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&text)?))
}

/// Find the highest `step_index` checkpoint in `checkpoints_dir`, if any.
pub fn latest_checkpoint(checkpoints_dir: &Path) -> Result<Option<Checkpoint>, AuditError> {
    if !checkpoints_dir.exists() {
        return Ok(None);
    }
    let mut best: Option<Checkpoint> = None;
    for entry in std::fs::read_dir(checkpoints_dir)? {
        let entry = entry?;
        if !entry.path().extension().map(|e| e == "json").unwrap_or(false) {
            continue;
        }
        let text = std::fs::read_to_string(entry.path())?;
        let checkpoint: Checkpoint = serde_json::from_str(&text)?;
        match &best {
            Some(current) if current.step_index >= checkpoint.step_index => {}
            _ => best = Some(checkpoint),
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(step_index: u32) -> Checkpoint {
        Checkpoint {
            task_id: "t1".to_string(),
            milestone_id: Some("m1".to_string()),
            step_index,
            active_memory_ids: vec!["a".to_string()],
            consecutive_failures: 0,
            written_at: Utc::now(),
        }
    }

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints").join("3.json");
        write_checkpoint(&path, &checkpoint(3)).unwrap();
        let loaded = read_checkpoint(&path).unwrap().unwrap();
        assert_eq!(loaded.step_index, 3);
    }

    #[test]
    fn latest_checkpoint_picks_highest_step_index() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoints_dir = dir.path().join("checkpoints");
        write_checkpoint(&checkpoints_dir.join("0.json"), &checkpoint(0)).unwrap();
        write_checkpoint(&checkpoints_dir.join("5.json"), &checkpoint(5)).unwrap();
        write_checkpoint(&checkpoints_dir.join("2.json"), &checkpoint(2)).unwrap();
        let latest = latest_checkpoint(&checkpoints_dir).unwrap().unwrap();
        assert_eq!(latest.step_index, 5);
    }

    #[test]
    fn missing_checkpoints_dir_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(latest_checkpoint(&dir.path().join("nope")).unwrap().is_none());
    }
}
