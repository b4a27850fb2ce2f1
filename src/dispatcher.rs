//! Dispatch Protocol (§4.3) and the Lifecycle Scheduler's completion action
//! (§4.4) — the heart of the engine, wired together as [`DispatchEngine`].
//!
//! Grounded on `original_source/.../orchestrator.py: CallOrchestrator`, which
//! plays the same role (`assign_call`, `_complete_call`, `cancel_call`,
//! `get_system_status`) over Redis + a webhook client. This crate swaps
//! Redis's sorted set / `SET NX EX` / hash primitives for the in-process
//! [`AvailabilityIndex`] / [`AssignmentLockTable`] / [`StateStore`], and
//! structures the engine itself the way the teacher crate structures
//! `CallCenterEngine` (`orchestrator/core.rs`): a single struct wrapping
//! `Arc`-shared subsystems behind async methods, constructed once and shared
//! via `Arc<DispatchEngine>`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::availability_index::AvailabilityIndex;
use crate::config::DispatchConfig;
use crate::lock_table::AssignmentLockTable;
use crate::metrics::MetricsRegistry;
use crate::notifier::Notifier;
use crate::qualification::QualificationSampler;
use crate::scheduler::LifecycleScheduler;
use crate::store::durable::DurableTier;
use crate::store::StateStore;
use crate::types::{Agent, AgentStatus, Assignment, Call, CallStatus, Qualification};

/// Outcome of a single [`DispatchEngine::assign_call`] attempt (§4.3
/// contract: `{success, assignment, agent, latency_ms, message}`).
#[derive(Debug, Clone)]
pub struct AssignmentResult {
    pub success: bool,
    pub assignment: Option<Assignment>,
    pub agent: Option<Agent>,
    pub message: String,
    pub assignment_time_ms: f64,
}

impl AssignmentResult {
    fn failure(message: impl Into<String>, assignment_time_ms: f64) -> Self {
        Self {
            success: false,
            assignment: None,
            agent: None,
            message: message.into(),
            assignment_time_ms,
        }
    }
}

/// The dispatch engine: owns every core subsystem in §2's component table
/// except the load generator (which drives the engine from the outside).
pub struct DispatchEngine {
    config: DispatchConfig,
    store: StateStore,
    availability: AvailabilityIndex,
    locks: AssignmentLockTable,
    scheduler: LifecycleScheduler,
    sampler: QualificationSampler,
    notifier: Notifier,
    metrics: MetricsRegistry,
    /// call_id -> assignment_id, so abandonment and completion can locate the
    /// ACTIVE assignment for a call without scanning the whole table.
    active_by_call: dashmap::DashMap<String, String>,
}

impl DispatchEngine {
    pub async fn new(config: DispatchConfig) -> crate::error::Result<Arc<Self>> {
        config.validate()?;
        let metrics = MetricsRegistry::new();
        let durable = DurableTier::connect(&config.database.url).await?;
        let store = StateStore::new(durable, metrics.clone());
        let notifier = Notifier::new(
            config.webhook.url.clone(),
            Duration::from_secs(config.webhook.timeout_seconds),
            metrics.clone(),
        );
        let sampler = QualificationSampler::new(config.conversion_matrix.clone());

        Ok(Arc::new(Self {
            config,
            store,
            availability: AvailabilityIndex::new(),
            locks: AssignmentLockTable::new(),
            scheduler: LifecycleScheduler::new(),
            sampler,
            notifier,
            metrics,
            active_by_call: dashmap::DashMap::new(),
        }))
    }

    /// In-memory engine for tests: an in-memory durable tier and a loopback
    /// webhook URL that will simply fail to connect (fine — notifier
    /// failures never affect the call lifecycle, §7 item 6).
    pub async fn new_in_memory(config: DispatchConfig) -> crate::error::Result<Arc<Self>> {
        let mut config = config;
        config.database.url = "sqlite::memory:".to_string();
        Self::new(config).await
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn availability(&self) -> &AvailabilityIndex {
        &self.availability
    }

    /// Registers a freshly created agent and, if AVAILABLE, makes it visible
    /// to the availability index (§3 lifecycle: created by the factory).
    pub async fn register_agent(&self, agent: Agent) -> crate::error::Result<()> {
        self.availability.upsert(&agent);
        self.store.put_agent(agent).await
    }

    /// Explicit status transition outside the dispatch/scheduler paths (the
    /// churn generator, or an operator via the HTTP surface), emitting
    /// `AGENT_STATUS_CHANGED` (§6, §4.8).
    pub async fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> crate::error::Result<()> {
        let Some(mut agent) = self.store.get_agent(agent_id).await? else {
            return Err(crate::error::DispatchError::NotFound {
                kind: "agent",
                id: agent_id.to_string(),
            });
        };
        let previous = agent.status;
        if previous == status {
            return Ok(());
        }
        agent.set_status(status);
        self.availability.upsert(&agent);
        self.store.put_agent(agent.clone()).await?;
        self.notifier.notify_agent_status_change(&agent, previous).await;
        Ok(())
    }

    /// The Dispatch Protocol (§4.3): lock -> select -> bind -> schedule
    /// release -> notify -> release lock.
    pub async fn assign_call(self: &Arc<Self>, mut call: Call) -> AssignmentResult {
        let start = Instant::now();
        let elapsed_ms = |start: Instant| start.elapsed().as_secs_f64() * 1000.0;

        // Step 1: register the call in PENDING.
        if let Err(e) = self.store.put_call(call.clone()).await {
            warn!(call_id = %call.id, error = %e, "failed to register call");
            self.metrics.inc("assignment_errors", 1.0);
            return AssignmentResult::failure(format!("registration error: {e}"), elapsed_ms(start));
        }

        // Step 2: acquire the per-call assignment lock.
        let ttl = Duration::from_secs(self.config.assignment.lock_ttl_seconds);
        if !self.locks.try_acquire(&call.id, ttl) {
            let latency = elapsed_ms(start);
            info!(call_id = %call.id, "race detected — call already being processed");
            return AssignmentResult::failure("race condition detected - call is being processed", latency);
        }

        let result = self.assign_call_locked(&mut call, start).await;
        self.locks.release(&call.id);
        result
    }

    async fn assign_call_locked(self: &Arc<Self>, call: &mut Call, start: Instant) -> AssignmentResult {
        let elapsed_ms = || start.elapsed().as_secs_f64() * 1000.0;
        let max_candidates = self.config.assignment.max_candidates;

        // Step 3: enumerate available agents (bounded candidate list, §4.3
        // step 4 / §9 — keeps the pop-then-skip loop's tail latency bounded).
        let candidates = self.availability.pop_longest_idle(max_candidates);
        if candidates.is_empty() {
            let latency = elapsed_ms();
            self.handle_saturation(call, latency).await;
            return AssignmentResult::failure("no agents available - system saturated", latency);
        }

        // Step 4/5: walk candidates in longest-idle order, skipping anyone
        // who lost the AVAILABLE race since the index snapshot was taken
        // (§4.3 step 4, §7 item 3 "binding race").
        let mut bound_agent = None;
        for agent_id in &candidates {
            match self.store.bind_agent_if_available(agent_id, &call.id).await {
                Some(agent) => {
                    bound_agent = Some(agent);
                    break;
                }
                None => {
                    // Stale entry: the agent is no longer AVAILABLE. Drop it
                    // from the index so future reads don't re-pick it.
                    self.availability.remove(agent_id);
                }
            }
        }

        let Some(agent) = bound_agent else {
            let latency = elapsed_ms();
            self.handle_saturation(call, latency).await;
            return AssignmentResult::failure("no agents available - system saturated", latency);
        };

        // The agent is now BUSY; it must leave the availability index.
        self.availability.remove(&agent.id);

        if let Err(e) = call.assign_to_agent(&agent.id) {
            self.metrics.inc("assignment_errors", 1.0);
            return AssignmentResult::failure(format!("assignment failed: {e}"), elapsed_ms());
        }

        let assignment_time_ms = elapsed_ms();
        if assignment_time_ms > self.config.assignment.max_assignment_time_ms as f64 {
            warn!(call_id = %call.id, assignment_time_ms, "assignment time exceeds configured budget");
        }

        let expected_duration = self
            .sampler
            .duration(self.config.call_duration.mean_seconds, self.config.call_duration.std_seconds);

        let mut assignment = Assignment::new(call.id.clone(), agent.id.clone());
        if let Err(e) = assignment.activate(assignment_time_ms, expected_duration) {
            self.metrics.inc("assignment_errors", 1.0);
            return AssignmentResult::failure(format!("assignment activation failed: {e}"), assignment_time_ms);
        }

        // Step 6: persist.
        if let Err(e) = self.store.put_call(call.clone()).await {
            warn!(call_id = %call.id, error = %e, "failed to persist assigned call");
        }
        if let Err(e) = self.store.put_assignment(assignment.clone()).await {
            warn!(assignment_id = %assignment.id, error = %e, "failed to persist assignment");
        }
        self.active_by_call.insert(call.id.clone(), assignment.id.clone());

        // Step 7: schedule the release timer.
        let engine = self.clone();
        let call_id = call.id.clone();
        let agent_id = agent.id.clone();
        let assignment_id = assignment.id.clone();
        self.scheduler.schedule(call.id.clone(), Duration::from_secs_f64(expected_duration), async move {
            engine.complete_call(&call_id, &agent_id, &assignment_id, expected_duration).await;
        });

        // Step 8: notify (fire-and-forget — don't hold the lock-acquire path
        // open waiting on the webhook's own up-to-5s timeout).
        let engine = self.clone();
        let assignment_for_notify = assignment.clone();
        let agent_for_notify = agent.clone();
        let call_for_notify = call.clone();
        tokio::spawn(async move {
            engine
                .notifier
                .notify_assignment(&assignment_for_notify, &agent_for_notify, &call_for_notify)
                .await;
        });

        self.metrics.inc("calls_assigned", 1.0);
        self.metrics.set("last_assignment_time_ms", assignment_time_ms);

        info!(call_id = %call.id, agent_id = %agent.id, assignment_time_ms, "call assigned");

        AssignmentResult {
            success: true,
            assignment: Some(assignment),
            agent: Some(agent),
            message: "assignment successful".to_string(),
            assignment_time_ms,
        }
    }

    async fn handle_saturation(&self, call: &mut Call, assignment_time_ms: f64) {
        call.fail_saturated();
        if let Err(e) = self.store.put_call(call.clone()).await {
            warn!(call_id = %call.id, error = %e, "failed to persist saturated call");
        }
        self.notifier.notify_saturation(call, assignment_time_ms).await;
        self.metrics.inc("calls_saturated", 1.0);
        warn!(call_id = %call.id, "call failed due to saturation");
    }

    /// Lifecycle Scheduler completion action (§4.4 steps a-f), invoked by the
    /// timer `schedule`d in [`Self::assign_call`].
    async fn complete_call(&self, call_id: &str, agent_id: &str, assignment_id: &str, actual_duration: f64) {
        let Some(mut call) = self.store.get_call(call_id).await.ok().flatten() else {
            warn!(call_id, "scheduler fault: call not found at completion");
            self.metrics.inc("completion_errors", 1.0);
            return;
        };

        // (§4.4 state machine) firing on an already-abandoned call is a no-op.
        if !matches!(call.status, CallStatus::Assigned | CallStatus::InProgress) {
            info!(call_id, status = %call.status, "completion fired for a call no longer in-flight, skipping");
            return;
        }

        let Some(agent) = self.store.get_agent(agent_id).await.ok().flatten() else {
            warn!(call_id, agent_id, "scheduler fault: agent not found at completion");
            self.metrics.inc("completion_errors", 1.0);
            return;
        };

        // (b) draw qualification.
        let qualification = self.sampler.qualify(&agent.agent_type, &call.call_type);

        // (c) mutate call -> COMPLETED, agent -> AVAILABLE, assignment -> COMPLETED.
        if let Err(e) = call.complete(actual_duration, qualification) {
            warn!(call_id, error = %e, "scheduler fault: call completion transition failed");
            self.metrics.inc("completion_errors", 1.0);
            return;
        }

        let Some(released_agent) = self.store.release_agent_if_busy(agent_id).await else {
            warn!(call_id, agent_id, "scheduler fault: agent was not BUSY at completion");
            self.metrics.inc("completion_errors", 1.0);
            return;
        };

        if let Some(mut assignment) = self.store.get_assignment_cached(assignment_id) {
            let _ = assignment.complete(actual_duration);
            if let Err(e) = self.store.put_assignment(assignment).await {
                warn!(assignment_id, error = %e, "failed to persist completed assignment");
            }
        }

        if let Err(e) = self.store.put_call(call.clone()).await {
            warn!(call_id, error = %e, "failed to persist completed call");
        }
        self.active_by_call.remove(call_id);

        // (d) re-insert agent into the availability index.
        self.availability.upsert(&released_agent);

        // (e) emit completion event.
        self.notifier.notify_completion(&call, &released_agent, qualification).await;

        // (f) bump counters and the duration gauge.
        self.metrics.inc("calls_completed", 1.0);
        match qualification {
            Qualification::Ok => self.metrics.inc("calls_ok", 1.0),
            Qualification::Ko => self.metrics.inc("calls_ko", 1.0),
            Qualification::Pending => {}
        }
        self.metrics.set("last_call_duration", actual_duration);

        info!(call_id, qualification = %qualification, actual_duration, "call completed");
    }

    /// Abandon a call before natural completion (§4.4 cancellation
    /// semantics): cancels the pending timer, returns the agent to
    /// AVAILABLE immediately without drawing a qualification, and emits no
    /// `CALL_COMPLETED` event.
    pub async fn abandon_call(&self, call_id: &str) -> crate::error::Result<bool> {
        self.scheduler.cancel(call_id);

        let Some(mut call) = self.store.get_call(call_id).await? else {
            return Ok(false);
        };
        if matches!(
            call.status,
            CallStatus::Completed | CallStatus::Abandoned | CallStatus::Failed
        ) {
            return Ok(false);
        }

        call.abandon();
        self.store.put_call(call.clone()).await?;

        if let Some((_, assignment_id)) = self.active_by_call.remove(call_id) {
            if let Some(mut assignment) = self.store.get_assignment_cached(&assignment_id) {
                if let Some(agent) = self.store.release_agent_if_busy(&assignment.agent_id).await {
                    self.availability.upsert(&agent);
                }
                assignment.fail();
                self.store.put_assignment(assignment).await?;
            }
        } else if let Some(agent_id) = call.assigned_agent_id.clone() {
            // Call was assigned but our call_id index missed it (shouldn't
            // normally happen); fall back to releasing by agent id directly.
            if let Some(agent) = self.store.release_agent_if_busy(&agent_id).await {
                self.availability.upsert(&agent);
            }
        }

        self.metrics.inc("calls_abandoned", 1.0);
        info!(call_id, "call abandoned");
        Ok(true)
    }

    /// Agent/call/queue counts and health, matching
    /// `orchestrator.py: get_system_status` (§6 `GET /system/status`).
    pub async fn system_status(&self) -> serde_json::Value {
        let agents = self.store.all_agents();
        let available = agents.iter().filter(|a| a.status == AgentStatus::Available).count();
        let busy = agents.iter().filter(|a| a.status == AgentStatus::Busy).count();
        let paused = agents.iter().filter(|a| a.status == AgentStatus::Paused).count();
        let offline = agents.iter().filter(|a| a.status == AgentStatus::Offline).count();

        let metrics = self.metrics.snapshot();
        let last_assignment_time_ms = metrics.get("last_assignment_time_ms").copied().unwrap_or(0.0);

        serde_json::json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "agents": {
                "total": agents.len(),
                "available": available,
                "busy": busy,
                "paused": paused,
                "offline": offline,
            },
            "active_assignments": self.store.active_assignment_count(),
            "metrics": metrics,
            "system_health": {
                "durable_tier_connected": self.store.durable().health_check().await,
                "performance_target_met": last_assignment_time_ms <= self.config.assignment.max_assignment_time_ms as f64,
            },
        })
    }

    pub async fn health_check(&self) -> bool {
        self.notifier.health_check().await
    }

    /// Clears in-memory state and durable-tier test rows (§4.14 `cleanup`).
    pub async fn cleanup(&self) -> crate::error::Result<()> {
        self.active_by_call.clear();
        self.store.clear_all().await
    }
}
