use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which tier a [`MemoryItem`] currently lives in. An item is in exactly one
/// tier at a time; moving tiers is the only way its `tier` field changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    Active,
    Archival,
}

/// A single unit of agent memory. `content` is opaque to the manager — it
/// never inspects or parses it, only moves, sizes, and scores it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    pub content: String,
    pub priority: u8,
    pub last_access: DateTime<Utc>,
    pub estimated_size: u64,
    pub tier: MemoryTier,
    pub tags: Vec<String>,
}

impl MemoryItem {
    pub fn new(id: impl Into<String>, content: impl Into<String>, priority: u8, estimated_size: u64) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            priority: priority.min(10),
            last_access: Utc::now(),
            estimated_size,
            tier: MemoryTier::Active,
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub active_count: usize,
    pub archival_count: usize,
    pub active_bytes: u64,
    pub page_outs: u64,
    pub page_ins: u64,
}

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("id not found: {0}")]
    NotFound(String),

    #[error("id already present in active tier: {0}")]
    DuplicateId(String),

    #[error("item of size {size} exceeds active budget {budget}")]
    ItemTooLarge { size: u64, budget: u64 },

    #[error("lock error: {0}")]
    Lock(String),
}

pub type MemoryResult<T> = Result<T, MemoryError>;
