//! The append-only audit log: one redacted [`fieldglass_types::StepRecord`]
//! per line. A single producer per worker; the engine is the only writer.
//! Consumers (recovery context, re-planning) only ever read a suffix.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use fieldglass_observability::redact_text;
use fieldglass_types::{ActionKind, ActionRecord, StepRecord};

use crate::AuditError;

pub struct AuditLog {
    path: std::path::PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one record. The observation and reasoning text are redacted
    /// through the shared `redact_text` helper before they ever touch disk;
    /// structural fields (step_index, confidence, action kind) are kept
    /// plain since they carry no user content.
    pub fn append(&self, record: &StepRecord) -> Result<(), AuditError> {
        let redacted = StepRecord {
            step_index: record.step_index,
            observation: redact_text(&record.observation),
            reasoning: redact_text(&record.reasoning),
            action: record.action.clone().map(redact_action),
            confidence: record.confidence,
            timestamp: record.timestamp,
            error: record.error.clone(),
        };

        let line = serde_json::to_string(&redacted)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// The last `k` records, oldest first. Used to build retry recovery
    /// context and re-planning summaries.
    pub fn tail(&self, k: usize) -> Result<Vec<StepRecord>, AuditError> {
        let records = self.read_all()?;
        let start = records.len().saturating_sub(k);
        Ok(records[start..].to_vec())
    }

    pub fn read_all(&self) -> Result<Vec<StepRecord>, AuditError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}

fn redact_action(mut record: ActionRecord) -> ActionRecord {
    // Most action kinds carry no free text; only the two that embed a
    // user-authored string need masking before this reaches disk.
    record.action = match record.action {
        ActionKind::TypeText { text } => ActionKind::TypeText { text: redact_text(&text) },
        ActionKind::NoAction { reason } => ActionKind::NoAction { reason: redact_text(&reason) },
        other => other,
    };
    record
}

pub fn ensure_parent_exists(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(step_index: u32) -> StepRecord {
        StepRecord {
            step_index,
            observation: "desktop visible".to_string(),
            reasoning: "clicking the button".to_string(),
            action: None,
            confidence: 0.9,
            timestamp: Utc::now(),
            error: None,
        }
    }

    #[test]
    fn append_then_read_all_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.jsonl"));
        log.append(&record(0)).unwrap();
        log.append(&record(1)).unwrap();
        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].step_index, 1);
    }

    #[test]
    fn observation_text_is_redacted_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::new(&path);
        log.append(&record(0)).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("desktop visible"));
        assert!(raw.contains("redacted"));
    }

    #[test]
    fn tail_returns_last_k_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.jsonl"));
        for i in 0..5 {
            log.append(&record(i)).unwrap();
        }
        let tail = log.tail(3).unwrap();
        assert_eq!(tail.iter().map(|r| r.step_index).collect::<Vec<_>>(), vec![2, 3, 4]);
    }
}
