//! Availability Index (§3, §4.1): a score-ordered view of AVAILABLE agents
//! keyed by idle-seconds, supporting O(log n) upsert/remove and pop-longest-
//! idle without removal (selection is advisory — §4.1).
//!
//! The teacher crate reaches for `DashMap`/`DashSet` for its own concurrent
//! indices (`orchestrator/core.rs`); here the ordering requirement (sorted by
//! score, not just membership) means a `DashMap` alone can't serve
//! `pop_longest_idle`, so the index pairs a `DashMap<agent_id, score>` for
//! O(1) membership/removal-by-id with a `parking_lot::RwLock<BTreeSet<(score,
//! agent_id)>>` for the ordered view, mirroring the sorted-set (`zadd`/
//! `zrevrange`) semantics of `original_source/.../redis_client.py`.

use dashmap::DashMap;
use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use std::collections::BTreeSet;

use crate::types::Agent;

/// `(idle_seconds, agent_id)` — ordered first by score so `BTreeSet`
/// iteration yields ascending idle time; `pop_longest_idle` reads from the
/// back for descending order (longest idle first).
type ScoreEntry = (OrderedFloat<f64>, String);

/// Score-ordered set of AVAILABLE agent-ids keyed by idle-seconds (§3).
#[derive(Debug, Default)]
pub struct AvailabilityIndex {
    scores: DashMap<String, OrderedFloat<f64>>,
    ordered: RwLock<BTreeSet<ScoreEntry>>,
}

impl AvailabilityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place an AVAILABLE agent at its current idle-seconds score, or remove
    /// it if it's no longer AVAILABLE (§4.1 contract).
    pub fn upsert(&self, agent: &Agent) {
        if agent.is_available() {
            self.insert(&agent.id, agent.idle_seconds());
        } else {
            self.remove(&agent.id);
        }
    }

    /// Insert or reposition an agent-id at the given score directly, used by
    /// the scheduler on release without needing a full `Agent` in hand.
    pub fn insert(&self, agent_id: &str, idle_seconds: f64) {
        let score = OrderedFloat(idle_seconds);
        if let Some(old) = self.scores.get(agent_id) {
            if *old == score {
                return;
            }
        }
        let previous = self.scores.insert(agent_id.to_string(), score);
        let mut ordered = self.ordered.write();
        if let Some(prev_score) = previous {
            ordered.remove(&(prev_score, agent_id.to_string()));
        }
        ordered.insert((score, agent_id.to_string()));
    }

    /// Idempotent removal (§4.1 contract).
    pub fn remove(&self, agent_id: &str) {
        if let Some((_, score)) = self.scores.remove(agent_id) {
            self.ordered.write().remove(&(score, agent_id.to_string()));
        }
    }

    /// Up to `n` agent-ids in descending idle-seconds order, without
    /// removing them from the index (§4.1: selection is purely advisory).
    pub fn pop_longest_idle(&self, n: usize) -> Vec<String> {
        self.ordered
            .read()
            .iter()
            .rev()
            .take(n)
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.scores.contains_key(agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentStatus;

    #[test]
    fn pop_longest_idle_returns_descending_order() {
        let index = AvailabilityIndex::new();
        index.insert("a", 10.0);
        index.insert("b", 200.0);
        index.insert("c", 5.0);

        assert_eq!(index.pop_longest_idle(3), vec!["b", "a", "c"]);
    }

    #[test]
    fn never_served_sentinel_outranks_finite_idle() {
        let index = AvailabilityIndex::new();
        index.insert("finite", 200.0);
        index.insert("never-served", crate::types::NEVER_SERVED_IDLE_SECONDS);

        assert_eq!(index.pop_longest_idle(1), vec!["never-served"]);
    }

    #[test]
    fn upsert_removes_non_available_agents() {
        let index = AvailabilityIndex::new();
        let mut agent = Agent::new("Agent_001", "agente_tipo_1", AgentStatus::Available);
        index.upsert(&agent);
        assert!(index.contains(&agent.id));

        agent.assign_call("call-1").unwrap();
        index.upsert(&agent);
        assert!(!index.contains(&agent.id));
    }

    #[test]
    fn remove_is_idempotent() {
        let index = AvailabilityIndex::new();
        index.insert("a", 1.0);
        index.remove("a");
        index.remove("a");
        assert!(index.is_empty());
    }

    #[test]
    fn pop_longest_idle_does_not_remove() {
        let index = AvailabilityIndex::new();
        index.insert("a", 1.0);
        let _ = index.pop_longest_idle(1);
        assert_eq!(index.len(), 1);
        assert!(index.contains("a"));
    }

    #[test]
    fn reinsert_updates_score_without_duplicate_entries() {
        let index = AvailabilityIndex::new();
        index.insert("a", 10.0);
        index.insert("a", 500.0);
        assert_eq!(index.len(), 1);
        assert_eq!(index.pop_longest_idle(1), vec!["a"]);
    }
}
