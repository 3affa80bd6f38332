//! The hierarchical memory manager (C3): an active tier bounded by a byte
//! budget, backed by an unbounded archival tier, grounded on
//! `tandem-memory::manager::MemoryManager`, which plays the same role for a
//! session/project/global tiering — this version collapses that to the
//! two tiers the execution core actually needs and replaces embedding
//! similarity with the deterministic composite eviction score.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use fieldglass_observability::{emit_event, ObservabilityEvent, ProcessKind};
use tracing::Level;

use crate::archival::ArchivalStore;
use crate::types::{MemoryError, MemoryItem, MemoryResult, MemoryStats, MemoryTier};

const W_LRU: f64 = 0.5;
const W_PRIORITY: f64 = 0.5;

/// Bounds the active tier and mediates every page-out/page-in against the
/// archival collaborator. One instance per worker; workers running
/// concurrently each own an instance but may share the same `ArchivalStore`.
pub struct MemoryManager {
    active: std::sync::Mutex<HashMap<String, MemoryItem>>,
    insertion_order: std::sync::Mutex<Vec<String>>,
    budget_bytes: u64,
    archival: Arc<dyn ArchivalStore>,
    stats: std::sync::Mutex<MemoryStats>,
}

impl MemoryManager {
    pub fn new(budget_bytes: u64, archival: Arc<dyn ArchivalStore>) -> Self {
        Self {
            active: std::sync::Mutex::new(HashMap::new()),
            insertion_order: std::sync::Mutex::new(Vec::new()),
            budget_bytes,
            archival,
            stats: std::sync::Mutex::new(MemoryStats::default()),
        }
    }

    fn active_bytes_locked(active: &HashMap<String, MemoryItem>) -> u64 {
        active.values().map(|item| item.estimated_size).sum()
    }

    /// Insert `content` into the active tier, eagerly paging out victims
    /// until the budget is satisfied. Fails if the item alone exceeds the
    /// configured budget — no amount of eviction could make room for it.
    pub async fn add_to_active(
        &self,
        id: impl Into<String>,
        content: impl Into<String>,
        priority: u8,
        size: u64,
    ) -> MemoryResult<()> {
        let id = id.into();
        if size > self.budget_bytes {
            return Err(MemoryError::ItemTooLarge { size, budget: self.budget_bytes });
        }

        {
            let active = self.active.lock().map_err(|e| MemoryError::Lock(e.to_string()))?;
            if active.contains_key(&id) {
                return Err(MemoryError::DuplicateId(id));
            }
        }

        while self.active_bytes_over_budget_by(size)? {
            let victim = self.select_victim()?;
            match victim {
                Some(victim_id) => self.page_out(&[victim_id]).await?,
                None => break,
            }
        }

        let item = MemoryItem::new(id.clone(), content, priority, size);
        {
            let mut active = self.active.lock().map_err(|e| MemoryError::Lock(e.to_string()))?;
            active.insert(id.clone(), item);
        }
        self.insertion_order
            .lock()
            .map_err(|e| MemoryError::Lock(e.to_string()))?
            .push(id.clone());

        emit_event(
            Level::DEBUG,
            ProcessKind::Engine,
            ObservabilityEvent::new("memory.add_to_active", "memory_manager"),
        );
        Ok(())
    }

    fn active_bytes_over_budget_by(&self, incoming: u64) -> MemoryResult<bool> {
        let active = self.active.lock().map_err(|e| MemoryError::Lock(e.to_string()))?;
        Ok(Self::active_bytes_locked(&active) + incoming > self.budget_bytes)
    }

    /// Composite eviction score: higher score pages out first. Ties broken
    /// by oldest `last_access`, then by `id` lexicographically so the
    /// ordering is a total order and reproducible across runs.
    fn select_victim(&self) -> MemoryResult<Option<String>> {
        let active = self.active.lock().map_err(|e| MemoryError::Lock(e.to_string()))?;
        if active.is_empty() {
            return Ok(None);
        }

        let now = Utc::now();
        let oldest = active.values().map(|item| item.last_access).min().unwrap_or(now);
        let newest = active.values().map(|item| item.last_access).max().unwrap_or(now);
        let span = (newest - oldest).num_milliseconds().max(1) as f64;

        let mut best: Option<&MemoryItem> = None;
        let mut best_score = f64::MIN;
        for item in active.values() {
            let age_ms = (now - item.last_access).num_milliseconds().max(0) as f64;
            let normalized_recency = (age_ms / span).clamp(0.0, 1.0);
            let score = W_LRU * normalized_recency + W_PRIORITY * (1.0 - item.priority as f64 / 10.0);

            let better = match best {
                None => true,
                Some(current) => {
                    if score > best_score {
                        true
                    } else if (score - best_score).abs() < f64::EPSILON {
                        item.last_access < current.last_access
                            || (item.last_access == current.last_access && item.id < current.id)
                    } else {
                        false
                    }
                }
            };

            if better {
                best = Some(item);
                best_score = score;
            }
        }

        Ok(best.map(|item| item.id.clone()))
    }

    /// Move `ids` from active to archival, preserving content. Unknown ids
    /// are silently skipped, an idempotent cleanup
    /// helpers.
    pub async fn page_out(&self, ids: &[String]) -> MemoryResult<()> {
        for id in ids {
            let item = {
                let mut active = self.active.lock().map_err(|e| MemoryError::Lock(e.to_string()))?;
                active.remove(id)
            };
            let Some(item) = item else { continue };

            let payload = serde_json::to_vec(&item)?;
            self.archival.put(id, payload).await?;

            self.insertion_order
                .lock()
                .map_err(|e| MemoryError::Lock(e.to_string()))?
                .retain(|existing| existing != id);
        }
        let mut stats = self.stats.lock().map_err(|e| MemoryError::Lock(e.to_string()))?;
        stats.page_outs += ids.len() as u64;
        emit_event(
            Level::DEBUG,
            ProcessKind::Engine,
            ObservabilityEvent::new("memory.page_out", "memory_manager"),
        );
        Ok(())
    }

    /// Search archival for up to `k` matches and page them back into active,
    /// evicting further victims as needed to stay within budget.
    pub async fn search_and_page_in(&self, query: &str, k: usize) -> MemoryResult<Vec<String>> {
        let ids = self.archival.search(query, k).await?;
        let mut paged_in = Vec::new();

        for id in &ids {
            let Some(bytes) = self.archival.get(id).await? else { continue };
            let mut item: MemoryItem = serde_json::from_slice(&bytes)?;

            while self.active_bytes_over_budget_by(item.estimated_size)? {
                let victim = self.select_victim()?;
                match victim {
                    Some(victim_id) if &victim_id != id => self.page_out(&[victim_id]).await?,
                    _ => break,
                }
            }

            item.tier = MemoryTier::Active;
            item.last_access = Utc::now();
            {
                let mut active = self.active.lock().map_err(|e| MemoryError::Lock(e.to_string()))?;
                active.insert(id.clone(), item);
            }
            self.insertion_order
                .lock()
                .map_err(|e| MemoryError::Lock(e.to_string()))?
                .push(id.clone());
            self.archival.remove(id).await?;
            paged_in.push(id.clone());
        }

        let mut stats = self.stats.lock().map_err(|e| MemoryError::Lock(e.to_string()))?;
        stats.page_ins += paged_in.len() as u64;
        Ok(paged_in)
    }

    /// Active items in insertion order, suitable for prompt assembly.
    pub fn read_active(&self) -> MemoryResult<Vec<MemoryItem>> {
        let active = self.active.lock().map_err(|e| MemoryError::Lock(e.to_string()))?;
        let order = self.insertion_order.lock().map_err(|e| MemoryError::Lock(e.to_string()))?;
        Ok(order.iter().filter_map(|id| active.get(id).cloned()).collect())
    }

    pub fn stats(&self) -> MemoryResult<MemoryStats> {
        let active = self.active.lock().map_err(|e| MemoryError::Lock(e.to_string()))?;
        let mut stats = self.stats.lock().map_err(|e| MemoryError::Lock(e.to_string()))?.clone();
        stats.active_count = active.len();
        stats.active_bytes = Self::active_bytes_locked(&active);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archival::InMemoryArchivalStore;

    fn manager(budget: u64) -> MemoryManager {
        MemoryManager::new(budget, Arc::new(InMemoryArchivalStore::new()))
    }

    #[tokio::test]
    async fn add_under_budget_stays_active() {
        let mgr = manager(100);
        mgr.add_to_active("a", "hello", 5, 40).await.unwrap();
        let active = mgr.read_active().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "a");
    }

    #[tokio::test]
    async fn oversized_item_rejected() {
        let mgr = manager(10);
        let err = mgr.add_to_active("a", "x", 5, 20).await.unwrap_err();
        assert!(matches!(err, MemoryError::ItemTooLarge { .. }));
    }

    #[tokio::test]
    async fn paging_under_pressure_matches_scenario() {
        // budget=100, four 40-byte items at priorities 1, 5, 5, 9.
        let mgr = manager(100);
        mgr.add_to_active("p1", "low priority", 1, 40).await.unwrap();
        mgr.add_to_active("p5a", "mid priority a", 5, 40).await.unwrap();
        // p1 (lowest priority) should page out before either mid-priority
        // item once a third item cannot fit otherwise.
        mgr.add_to_active("p5b", "mid priority b", 5, 40).await.unwrap();
        mgr.add_to_active("p9", "high priority", 9, 40).await.unwrap();

        let active_ids: Vec<String> = mgr.read_active().unwrap().into_iter().map(|i| i.id).collect();
        assert!(!active_ids.contains(&"p1".to_string()), "lowest-priority item should have paged out");
        assert!(active_ids.contains(&"p9".to_string()));

        let paged_in = mgr.search_and_page_in("low priority", 1).await.unwrap();
        assert_eq!(paged_in, vec!["p1".to_string()]);
        let active_ids: Vec<String> = mgr.read_active().unwrap().into_iter().map(|i| i.id).collect();
        assert!(active_ids.contains(&"p1".to_string()));
    }

    #[tokio::test]
    async fn page_out_preserves_content() {
        let mgr = manager(100);
        mgr.add_to_active("a", "preserved content", 5, 40).await.unwrap();
        mgr.page_out(&["a".to_string()]).await.unwrap();
        let paged_in = mgr.search_and_page_in("preserved", 1).await.unwrap();
        assert_eq!(paged_in, vec!["a".to_string()]);
        let active = mgr.read_active().unwrap();
        assert_eq!(active[0].content, "preserved content");
    }
}
