//! Process-wide, TTL-expiring cache of per-project firewall rules (C2).
//!
//! Purely a read-through optimization in front of the `Store`: a miss or a
//! stale entry just means the evaluator re-loads from the store, so staleness
//! only delays rule changes from taking effect by at most `CACHE_TTL`.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::models::{FirewallRule, Id};

pub const CACHE_TTL: Duration = Duration::from_secs(60);

struct Entry {
    rules: Vec<FirewallRule>,
    loaded_at: Instant,
}

pub struct RuleCache {
    entries: DashMap<Id, Entry>,
}

impl Default for RuleCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Returns `None` on a miss or a stale entry (caller should reload and
    /// call `set`), `Some` on a fresh hit.
    pub fn get(&self, project_id: Id) -> Option<Vec<FirewallRule>> {
        self.get_at(project_id, Instant::now())
    }

    fn get_at(&self, project_id: Id, now: Instant) -> Option<Vec<FirewallRule>> {
        let entry = self.entries.get(&project_id)?;
        if now.duration_since(entry.loaded_at) > CACHE_TTL {
            return None;
        }
        Some(entry.rules.clone())
    }

    pub fn set(&self, project_id: Id, rules: Vec<FirewallRule>) {
        self.entries.insert(
            project_id,
            Entry {
                rules,
                loaded_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, project_id: Id) {
        self.entries.remove(&project_id);
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
    }
}
