//! The audit & checkpoint log (C4): an append-only `StepRecord` journal plus
//! periodic checkpoints, grounded on
//! `tandem-core::storage_paths` JSON-on-disk idiom.

pub mod checkpoint;
pub mod log;
pub mod paths;

pub use checkpoint::{latest_checkpoint, read_checkpoint, write_checkpoint, Checkpoint};
pub use log::AuditLog;
pub use paths::TaskPaths;

use fieldglass_types::StepRecord;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What the engine hands the model on a retryable failure: the last `k`
/// audit records plus the most recent checkpoint, both already redacted.
#[derive(Debug, Clone)]
pub struct RecoveryContext {
    pub recent_steps: Vec<StepRecord>,
    pub checkpoint: Option<Checkpoint>,
}

pub const DEFAULT_RECOVERY_WINDOW: usize = 3;
pub const DEFAULT_CHECKPOINT_INTERVAL: u32 = 5;

/// The top-level handle a worker holds for its task's on-disk state.
pub struct AuditTrail {
    paths: TaskPaths,
    log: AuditLog,
}

impl AuditTrail {
    pub fn open(state_dir: &std::path::Path, task_id: &str) -> Result<Self, AuditError> {
        let paths = TaskPaths::new(state_dir, task_id);
        paths.ensure_created()?;
        let log = AuditLog::new(paths.audit_log_path());
        Ok(Self { paths, log })
    }

    pub fn append_step(&self, record: &StepRecord) -> Result<(), AuditError> {
        self.log.append(record)
    }

    pub fn checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), AuditError> {
        write_checkpoint(&self.paths.checkpoint_path(checkpoint.step_index), checkpoint)
    }

    pub fn latest_checkpoint(&self) -> Result<Option<Checkpoint>, AuditError> {
        latest_checkpoint(&self.paths.checkpoints_dir())
    }

    pub fn recovery_context(&self, window: usize) -> Result<RecoveryContext, AuditError> {
        Ok(RecoveryContext {
            recent_steps: self.log.tail(window)?,
            checkpoint: self.latest_checkpoint()?,
        })
    }

    pub fn archival_dir(&self) -> std::path::PathBuf {
        self.paths.archival_dir()
    }

    /// Whether a checkpoint is due at `step_index`, on the default interval
    /// or a milestone boundary.
    pub fn checkpoint_due(step_index: u32, interval: u32, at_milestone_boundary: bool) -> bool {
        at_milestone_boundary || (interval > 0 && step_index % interval == 0)
    }
}
