//! State Store (§3, §4.6): authoritative per-entity state with a two-tier
//! read/write policy.
//!
//! - **Fast tier**: `DashMap`s keyed by entity id, O(1) point lookups,
//!   authoritative for every in-flight dispatch decision.
//! - **Durable tier**: sqlite via [`durable::DurableTier`], fed by
//!   write-through on every `put`. Read only on a fast-tier cache miss
//!   (cold start) — never on the hot path (§4.6).
//!
//! Write policy: fast tier first, then durable tier; a durable-tier error is
//! logged and counted but never fails the calling dispatch (§4.6, §7 item 5).
//! This is the same asymmetric durability trade the teacher's own
//! `DatabaseManager` makes implicitly by being `Option<Arc<DatabaseManager>>`
//! in `CallCenterState` — persistence is a best-effort side channel, not a
//! gate on the in-memory decision path.

pub mod durable;

use dashmap::DashMap;
use tracing::warn;

use crate::error::{DispatchError, Result};
use crate::metrics::MetricsRegistry;
use crate::types::{Agent, Assignment, Call};
use durable::DurableTier;

/// Combined fast + durable tier state store for the three core entities.
pub struct StateStore {
    agents: DashMap<String, Agent>,
    calls: DashMap<String, Call>,
    assignments: DashMap<String, Assignment>,
    durable: DurableTier,
    metrics: MetricsRegistry,
}

impl StateStore {
    pub fn new(durable: DurableTier, metrics: MetricsRegistry) -> Self {
        Self {
            agents: DashMap::new(),
            calls: DashMap::new(),
            assignments: DashMap::new(),
            durable,
            metrics,
        }
    }

    pub fn durable(&self) -> &DurableTier {
        &self.durable
    }

    // --- Agents -----------------------------------------------------

    pub async fn put_agent(&self, agent: Agent) -> Result<()> {
        self.agents.insert(agent.id.clone(), agent.clone());
        self.write_through_agent(&agent).await;
        Ok(())
    }

    async fn write_through_agent(&self, agent: &Agent) {
        if let Err(e) = self.durable.put_agent(agent).await {
            warn!(agent_id = %agent.id, error = %e, "durable-tier write-through failed for agent");
            self.metrics.inc("durable_tier_errors", 1.0);
        }
    }

    /// Atomically claims `agent_id` for `call_id` iff it is still AVAILABLE,
    /// returning the bound agent on success. This is the sole serialization
    /// point for the binding race described in §4.1/§4.3 step 4 and §7 item
    /// 3: two different calls (each under their own per-call lock) can both
    /// target the same longest-idle agent, so the per-call lock alone cannot
    /// prevent a double-bind — the check-and-flip on the agent entry must be
    /// atomic. `DashMap::entry` holds a per-shard lock across the
    /// check-then-mutate, which is exactly the primitive this needs.
    pub async fn bind_agent_if_available(&self, agent_id: &str, call_id: &str) -> Option<Agent> {
        let bound = {
            match self.agents.entry(agent_id.to_string()) {
                dashmap::mapref::entry::Entry::Occupied(mut occ) => {
                    let agent = occ.get_mut();
                    if agent.is_available() && agent.assign_call(call_id).is_ok() {
                        Some(agent.clone())
                    } else {
                        None
                    }
                }
                dashmap::mapref::entry::Entry::Vacant(_) => None,
            }
        };
        if let Some(agent) = &bound {
            self.write_through_agent(agent).await;
        }
        bound
    }

    /// Atomically releases a BUSY agent back to AVAILABLE (call completion
    /// or abandonment, §4.4). Returns the released agent, or `None` if the
    /// agent was missing or not BUSY (already released by a racing path).
    pub async fn release_agent_if_busy(&self, agent_id: &str) -> Option<Agent> {
        let released = {
            match self.agents.entry(agent_id.to_string()) {
                dashmap::mapref::entry::Entry::Occupied(mut occ) => {
                    let agent = occ.get_mut();
                    if agent.release().is_ok() {
                        Some(agent.clone())
                    } else {
                        None
                    }
                }
                dashmap::mapref::entry::Entry::Vacant(_) => None,
            }
        };
        if let Some(agent) = &released {
            self.write_through_agent(agent).await;
        }
        released
    }

    /// Fast-tier read, populating from the durable tier on miss (§4.6 read
    /// policy — the only path on which the durable tier is ever consulted
    /// from the dispatch-adjacent code).
    pub async fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        if let Some(agent) = self.agents.get(id) {
            return Ok(Some(agent.clone()));
        }
        match self.durable.get_agent(id).await {
            Ok(Some(agent)) => {
                self.agents.insert(id.to_string(), agent.clone());
                Ok(Some(agent))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DispatchError::FastTier(format!(
                "fast-tier miss and durable-tier lookup failed for agent {id}: {e}"
            ))),
        }
    }

    pub fn get_agent_cached(&self, id: &str) -> Option<Agent> {
        self.agents.get(id).map(|a| a.clone())
    }

    pub async fn delete_agent(&self, id: &str) -> Result<()> {
        self.agents.remove(id);
        if let Err(e) = self.durable.delete_agent(id).await {
            warn!(agent_id = %id, error = %e, "durable-tier delete failed for agent");
            self.metrics.inc("durable_tier_errors", 1.0);
        }
        Ok(())
    }

    pub fn all_agents(&self) -> Vec<Agent> {
        self.agents.iter().map(|e| e.value().clone()).collect()
    }

    // --- Calls --------------------------------------------------------

    pub async fn put_call(&self, call: Call) -> Result<()> {
        self.calls.insert(call.id.clone(), call.clone());
        if let Err(e) = self.durable.put_call(&call).await {
            warn!(call_id = %call.id, error = %e, "durable-tier write-through failed for call");
            self.metrics.inc("durable_tier_errors", 1.0);
        }
        Ok(())
    }

    pub async fn get_call(&self, id: &str) -> Result<Option<Call>> {
        if let Some(call) = self.calls.get(id) {
            return Ok(Some(call.clone()));
        }
        match self.durable.get_call(id).await {
            Ok(Some(call)) => {
                self.calls.insert(id.to_string(), call.clone());
                Ok(Some(call))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DispatchError::FastTier(format!(
                "fast-tier miss and durable-tier lookup failed for call {id}: {e}"
            ))),
        }
    }

    pub fn get_call_cached(&self, id: &str) -> Option<Call> {
        self.calls.get(id).map(|c| c.clone())
    }

    pub fn all_calls(&self) -> Vec<Call> {
        self.calls.iter().map(|e| e.value().clone()).collect()
    }

    // --- Assignments ----------------------------------------------------

    pub async fn put_assignment(&self, assignment: Assignment) -> Result<()> {
        self.assignments.insert(assignment.id.clone(), assignment.clone());
        if let Err(e) = self.durable.put_assignment(&assignment).await {
            warn!(assignment_id = %assignment.id, error = %e, "durable-tier write-through failed for assignment");
            self.metrics.inc("durable_tier_errors", 1.0);
        }
        Ok(())
    }

    pub fn get_assignment_cached(&self, id: &str) -> Option<Assignment> {
        self.assignments.get(id).map(|a| a.clone())
    }

    pub fn all_assignments(&self) -> Vec<Assignment> {
        self.assignments.iter().map(|e| e.value().clone()).collect()
    }

    pub fn active_assignment_count(&self) -> usize {
        self.assignments
            .iter()
            .filter(|e| e.value().status == crate::types::AssignmentStatus::Active)
            .count()
    }

    /// Clears every in-memory entity and the durable tier's rows (§4.14
    /// `cleanup`, supplemented from `event_generator.py: cleanup_test_data`).
    pub async fn clear_all(&self) -> Result<()> {
        self.agents.clear();
        self.calls.clear();
        self.assignments.clear();
        self.durable.clear_all().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentStatus;

    async fn test_store() -> StateStore {
        let durable = DurableTier::in_memory().await.unwrap();
        StateStore::new(durable, MetricsRegistry::new())
    }

    #[tokio::test]
    async fn put_then_get_round_trips_through_fast_tier() {
        let store = test_store().await;
        let agent = Agent::new("Agent_001", "agente_tipo_1", AgentStatus::Available);
        store.put_agent(agent.clone()).await.unwrap();

        let fetched = store.get_agent(&agent.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, agent.id);
        assert_eq!(fetched.name, "Agent_001");
    }

    #[tokio::test]
    async fn get_missing_agent_returns_none() {
        let store = test_store().await;
        assert!(store.get_agent("does-not-exist").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cold_fast_tier_falls_back_to_durable_tier() {
        let durable = DurableTier::in_memory().await.unwrap();
        let agent = Agent::new("Agent_001", "agente_tipo_1", AgentStatus::Available);
        durable.put_agent(&agent).await.unwrap();

        // A fresh StateStore (empty fast tier) backed by the same durable pool.
        let store = StateStore::new(durable, MetricsRegistry::new());
        let fetched = store.get_agent(&agent.id).await.unwrap();
        assert!(fetched.is_some());
        // Second read now hits the fast-tier cache that the first read populated.
        assert!(store.get_agent_cached(&agent.id).is_some());
    }

    #[tokio::test]
    async fn clear_all_empties_both_tiers() {
        let store = test_store().await;
        let agent = Agent::new("Agent_001", "agente_tipo_1", AgentStatus::Available);
        store.put_agent(agent.clone()).await.unwrap();
        store.clear_all().await.unwrap();
        assert!(store.all_agents().is_empty());
        assert!(store.durable().get_agent(&agent.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bind_agent_if_available_fails_once_agent_is_busy() {
        let store = test_store().await;
        let agent = Agent::new("Agent_001", "agente_tipo_1", AgentStatus::Available);
        store.put_agent(agent.clone()).await.unwrap();

        let first = store.bind_agent_if_available(&agent.id, "call-1").await;
        assert!(first.is_some());

        let second = store.bind_agent_if_available(&agent.id, "call-2").await;
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn concurrent_binds_for_same_agent_yield_exactly_one_winner() {
        let store = std::sync::Arc::new(test_store().await);
        let agent = Agent::new("Agent_001", "agente_tipo_1", AgentStatus::Available);
        store.put_agent(agent.clone()).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            let agent_id = agent.id.clone();
            handles.push(tokio::spawn(async move {
                store.bind_agent_if_available(&agent_id, &format!("call-{i}")).await
            }));
        }

        let mut winners = 0;
        for h in handles {
            if h.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
