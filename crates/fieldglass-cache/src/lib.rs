//! The tool result cache (C2): keyed memoization with TTL, strict LRU
//! eviction over a bounded item count, and tag-based invalidation. Grounded
//! on `ResponseCache` (same key/TTL/LRU shape), but kept
//! in-process rather than SQLite-backed since cache values here are opaque
//! observation payloads, not a durability requirement, and invalidation by
//! tag set has no direct SQL-table analogue worth the indirection.
//!
//! Correctness property: a cached observation may never survive an action
//! that could have mutated the screen. The engine enforces this by calling
//! [`ToolCache::invalidate`] with the mutating action's tags *before* the
//! next `get`.

pub mod key;

pub use key::cache_key;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use fieldglass_observability::{emit_event, ObservabilityEvent, ProcessKind};
use serde_json::Value;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    created_at: Instant,
    ttl: Duration,
    hit_count: u64,
    last_access: u64,
    tags: Vec<String>,
}

impl CacheEntry {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) > self.ttl
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub entries: usize,
}

struct Inner {
    entries: HashMap<String, CacheEntry>,
    clock: u64,
    stats: CacheStats,
}

/// A mapping from a mutating action label to the cache tags it invalidates.
/// Defaults invalidate perception-tagged entries after any input action —
/// `Scroll` is NOT exempted.
pub struct InvalidationRules {
    rules: HashMap<String, Vec<String>>,
}

pub const SCREEN_TAG: &str = "screen";
pub const OCR_TAG: &str = "ocr";
pub const SCREEN_ANALYZER_TAG: &str = "screen_analyzer";

impl Default for InvalidationRules {
    fn default() -> Self {
        let default_tags = vec![
            SCREEN_TAG.to_string(),
            OCR_TAG.to_string(),
            SCREEN_ANALYZER_TAG.to_string(),
        ];
        let mutating = [
            "click",
            "type_text",
            "press_key",
            "hotkey",
            "scroll",
            "launch_app",
        ];
        let rules = mutating
            .into_iter()
            .map(|label| (label.to_string(), default_tags.clone()))
            .collect();
        Self { rules }
    }
}

impl InvalidationRules {
    pub fn tags_for(&self, action_label: &str) -> Vec<String> {
        self.rules.get(action_label).cloned().unwrap_or_default()
    }

    pub fn set(&mut self, action_label: impl Into<String>, tags: Vec<String>) {
        self.rules.insert(action_label.into(), tags);
    }
}

/// The tool result cache. Shared across workers; all operations are
/// linearized through a single mutex — a stale read is a correctness bug
/// here, so there is no lock-free fast path.
pub struct ToolCache {
    inner: Mutex<Inner>,
    max_entries: usize,
}

impl ToolCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                clock: 0,
                stats: CacheStats::default(),
            }),
            max_entries,
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let now = Instant::now();
        inner.clock += 1;
        let tick = inner.clock;

        let hit = match inner.entries.get_mut(key) {
            Some(entry) if !entry.expired(now) => {
                entry.hit_count += 1;
                entry.last_access = tick;
                Some(entry.value.clone())
            }
            Some(_) => None,
            None => None,
        };

        if hit.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
            inner.entries.remove(key);
        }
        inner.stats.entries = inner.entries.len();
        hit
    }

    pub fn put(&self, key: impl Into<String>, value: Value, ttl: Duration, tags: Vec<String>) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let now = Instant::now();
        inner.clock += 1;
        let tick = inner.clock;

        sweep_expired(&mut inner, now);

        inner.entries.insert(
            key.into(),
            CacheEntry {
                value,
                created_at: now,
                ttl,
                hit_count: 0,
                last_access: tick,
                tags,
            },
        );

        while inner.entries.len() > self.max_entries {
            let Some(victim) = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            inner.entries.remove(&victim);
            inner.stats.evictions += 1;
        }
        inner.stats.entries = inner.entries.len();
    }

    /// Drop every entry tagged with any of `tags`. Called by the engine
    /// before executing a mutating action and before the next `Observe`.
    pub fn invalidate(&self, tags: &[String]) {
        if tags.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, entry| !entry.tags.iter().any(|t| tags.contains(t)));
        let removed = before - inner.entries.len();
        if removed > 0 {
            inner.stats.invalidations += 1;
        }
        inner.stats.entries = inner.entries.len();
        emit_event(
            tracing::Level::DEBUG,
            ProcessKind::Engine,
            ObservabilityEvent::new("cache.invalidate", "tool_cache"),
        );
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().expect("cache lock poisoned").stats
    }
}

fn sweep_expired(inner: &mut Inner, now: Instant) {
    const SWEEP_SAMPLE: usize = 16;
    let expired_keys: Vec<String> = inner
        .entries
        .iter()
        .take(SWEEP_SAMPLE)
        .filter(|(_, entry)| entry.expired(now))
        .map(|(k, _)| k.clone())
        .collect();
    for key in expired_keys {
        inner.entries.remove(&key);
    }
}
