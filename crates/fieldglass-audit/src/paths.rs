//! Per-task directory layout, grounded on
//! `tandem-core::storage_paths` JSON-on-disk convention: one directory under
//! a configured state root, plain files, `fs::create_dir_all` on first use.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct TaskPaths {
    pub root: PathBuf,
}

impl TaskPaths {
    pub fn new(state_dir: &Path, task_id: &str) -> Self {
        Self {
            root: state_dir.join(task_id),
        }
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    pub fn checkpoint_path(&self, step_index: u32) -> PathBuf {
        self.checkpoints_dir().join(format!("{step_index}.json"))
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.root.join("audit.jsonl")
    }

    pub fn archival_dir(&self) -> PathBuf {
        self.root.join("archival")
    }

    pub fn ensure_created(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.checkpoints_dir())?;
        std::fs::create_dir_all(self.archival_dir())?;
        Ok(())
    }
}
