//! Core data model — Agent, Call, Assignment and their status enums (§3).
//!
//! These mirror `original_source/src/domain/entities/*.py` one for one, but
//! as owned Rust structs with the invariants enforced by the mutation
//! methods rather than left to callers. IDs are plain `String`s (UUID v4
//! text) — the source straddled UUID- and string-typed id columns across two
//! parallel entity definitions; this crate picks strings and keeps it that
//! way everywhere (§9 open question (a)).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DispatchError, Result};

/// A large finite idle-seconds sentinel for agents that have never taken a
/// call, so the availability index never needs to special-case infinity
/// (§9 "Sentinel for never-served agents").
pub const NEVER_SERVED_IDLE_SECONDS: f64 = 1_000_000_000.0;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// §3 Agent.status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentStatus {
    Available,
    Busy,
    Paused,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Available => "AVAILABLE",
            AgentStatus::Busy => "BUSY",
            AgentStatus::Paused => "PAUSED",
            AgentStatus::Offline => "OFFLINE",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A human agent: identity, type (used only for qualification sampling, never
/// for selection — §1 Non-goals), and availability status.
///
/// Invariant: `current_call_id.is_some() <=> status == Busy`. Enforced by
/// [`Agent::assign_call`] / [`Agent::release`], never by direct field
/// mutation outside this module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub agent_type: String,
    pub status: AgentStatus,
    pub last_call_end_time: Option<DateTime<Utc>>,
    pub current_call_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(name: impl Into<String>, agent_type: impl Into<String>, status: AgentStatus) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            name: name.into(),
            agent_type: agent_type.into(),
            status,
            last_call_end_time: None,
            current_call_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == AgentStatus::Available
    }

    /// Idle-seconds since the agent's last call ended, or the never-served
    /// sentinel if it has never taken one (§3 Availability Index).
    pub fn idle_seconds(&self) -> f64 {
        match self.last_call_end_time {
            Some(t) => (Utc::now() - t).num_milliseconds().max(0) as f64 / 1000.0,
            None => NEVER_SERVED_IDLE_SECONDS,
        }
    }

    /// Bind a call to this agent: AVAILABLE -> BUSY (§4.3 step 5b).
    pub fn assign_call(&mut self, call_id: &str) -> Result<()> {
        if !self.is_available() {
            return Err(DispatchError::InvalidTransition {
                kind: "agent",
                id: self.id.clone(),
                reason: format!("agent is not AVAILABLE (status={})", self.status),
            });
        }
        self.status = AgentStatus::Busy;
        self.current_call_id = Some(call_id.to_string());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Release this agent back to the pool on call completion or abandonment
    /// (§4.4 step c, §4.4 cancellation semantics).
    pub fn release(&mut self) -> Result<()> {
        if self.status != AgentStatus::Busy {
            return Err(DispatchError::InvalidTransition {
                kind: "agent",
                id: self.id.clone(),
                reason: format!("agent is not BUSY (status={})", self.status),
            });
        }
        self.status = AgentStatus::Available;
        self.last_call_end_time = Some(Utc::now());
        self.current_call_id = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// AVAILABLE <-> PAUSED, OFFLINE -> AVAILABLE (§3 status transitions,
    /// used by the load generator's churn loop, §4.8).
    pub fn set_status(&mut self, status: AgentStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// §3 Call.status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Abandoned,
    Failed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Pending => "PENDING",
            CallStatus::Assigned => "ASSIGNED",
            CallStatus::InProgress => "IN_PROGRESS",
            CallStatus::Completed => "COMPLETED",
            CallStatus::Abandoned => "ABANDONED",
            CallStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// §3 Call.qualification_result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Qualification {
    Ok,
    Ko,
    Pending,
}

impl Qualification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Qualification::Ok => "OK",
            Qualification::Ko => "KO",
            Qualification::Pending => "PENDING",
        }
    }
}

impl std::fmt::Display for Qualification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inbound call, from arrival through terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub id: String,
    pub phone_number: String,
    pub call_type: String,
    pub status: CallStatus,
    pub assigned_agent_id: Option<String>,
    pub qualification_result: Qualification,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
}

impl Call {
    pub fn new(phone_number: impl Into<String>, call_type: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            phone_number: phone_number.into(),
            call_type: call_type.into(),
            status: CallStatus::Pending,
            assigned_agent_id: None,
            qualification_result: Qualification::Pending,
            created_at: Utc::now(),
            assigned_at: None,
            started_at: None,
            completed_at: None,
            duration_seconds: None,
        }
    }

    /// PENDING -> ASSIGNED (§4.3 step 5a).
    pub fn assign_to_agent(&mut self, agent_id: &str) -> Result<()> {
        if self.status != CallStatus::Pending {
            return Err(DispatchError::InvalidTransition {
                kind: "call",
                id: self.id.clone(),
                reason: format!("call is not PENDING (status={})", self.status),
            });
        }
        self.status = CallStatus::Assigned;
        self.assigned_agent_id = Some(agent_id.to_string());
        self.assigned_at = Some(Utc::now());
        Ok(())
    }

    /// ASSIGNED/IN_PROGRESS -> COMPLETED, settling qualification (§4.4 step c).
    pub fn complete(&mut self, duration_seconds: f64, qualification: Qualification) -> Result<()> {
        if !matches!(self.status, CallStatus::Assigned | CallStatus::InProgress) {
            return Err(DispatchError::InvalidTransition {
                kind: "call",
                id: self.id.clone(),
                reason: format!("call cannot complete from status={}", self.status),
            });
        }
        self.status = CallStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.duration_seconds = Some(duration_seconds);
        self.qualification_result = qualification;
        Ok(())
    }

    /// Terminated before natural completion (§4.4 cancellation semantics).
    pub fn abandon(&mut self) {
        self.status = CallStatus::Abandoned;
        self.completed_at = Some(Utc::now());
    }

    /// Saturation at arrival: zero AVAILABLE agents (§4.3 step 3).
    pub fn fail_saturated(&mut self) {
        self.status = CallStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    /// Wait time from creation to assignment, if assigned (supplemented from
    /// `original_source/.../call.py: get_wait_time_seconds`).
    pub fn wait_time_seconds(&self) -> Option<f64> {
        self.assigned_at
            .map(|t| (t - self.created_at).num_milliseconds() as f64 / 1000.0)
    }

    /// Total time from creation to completion, if completed (supplemented
    /// from `original_source/.../call.py: get_total_duration_seconds`).
    pub fn total_duration_seconds(&self) -> Option<f64> {
        self.completed_at
            .map(|t| (t - self.created_at).num_milliseconds() as f64 / 1000.0)
    }
}

/// §3 Assignment.status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssignmentStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "PENDING",
            AssignmentStatus::Active => "ACTIVE",
            AssignmentStatus::Completed => "COMPLETED",
            AssignmentStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The binding record between a call and an agent during the call's active
/// lifetime. Exactly one ACTIVE assignment exists per call-id and per
/// agent-id at any moment (§3 invariant) — enforced by the dispatcher, which
/// is the only writer that ever activates one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: String,
    pub call_id: String,
    pub agent_id: String,
    pub status: AssignmentStatus,
    pub assignment_time_ms: Option<f64>,
    pub expected_duration_seconds: Option<f64>,
    pub actual_duration_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Assignment {
    pub fn new(call_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            call_id: call_id.into(),
            agent_id: agent_id.into(),
            status: AssignmentStatus::Pending,
            assignment_time_ms: None,
            expected_duration_seconds: None,
            actual_duration_seconds: None,
            created_at: Utc::now(),
            activated_at: None,
            completed_at: None,
        }
    }

    /// PENDING -> ACTIVE (§4.3 step 5c).
    pub fn activate(&mut self, assignment_time_ms: f64, expected_duration_seconds: f64) -> Result<()> {
        if self.status != AssignmentStatus::Pending {
            return Err(DispatchError::InvalidTransition {
                kind: "assignment",
                id: self.id.clone(),
                reason: format!("assignment is not PENDING (status={})", self.status),
            });
        }
        self.status = AssignmentStatus::Active;
        self.assignment_time_ms = Some(assignment_time_ms);
        self.expected_duration_seconds = Some(expected_duration_seconds);
        self.activated_at = Some(Utc::now());
        Ok(())
    }

    /// ACTIVE -> COMPLETED (§4.4 step c).
    pub fn complete(&mut self, actual_duration_seconds: f64) -> Result<()> {
        if self.status != AssignmentStatus::Active {
            return Err(DispatchError::InvalidTransition {
                kind: "assignment",
                id: self.id.clone(),
                reason: format!("assignment is not ACTIVE (status={})", self.status),
            });
        }
        self.status = AssignmentStatus::Completed;
        self.actual_duration_seconds = Some(actual_duration_seconds);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self) {
        self.status = AssignmentStatus::Failed;
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_served_agent_has_sentinel_idle_time() {
        let agent = Agent::new("Agent_001", "agente_tipo_1", AgentStatus::Available);
        assert_eq!(agent.idle_seconds(), NEVER_SERVED_IDLE_SECONDS);
    }

    #[test]
    fn assign_call_requires_available_status() {
        let mut agent = Agent::new("Agent_001", "agente_tipo_1", AgentStatus::Offline);
        assert!(agent.assign_call("call-1").is_err());
    }

    #[test]
    fn agent_assign_then_release_round_trips() {
        let mut agent = Agent::new("Agent_001", "agente_tipo_1", AgentStatus::Available);
        agent.assign_call("call-1").unwrap();
        assert_eq!(agent.status, AgentStatus::Busy);
        assert_eq!(agent.current_call_id.as_deref(), Some("call-1"));

        agent.release().unwrap();
        assert_eq!(agent.status, AgentStatus::Available);
        assert!(agent.current_call_id.is_none());
        assert!(agent.last_call_end_time.is_some());
    }

    #[test]
    fn call_lifecycle_happy_path() {
        let mut call = Call::new("+15550001", "llamada_tipo_1");
        call.assign_to_agent("agent-1").unwrap();
        assert_eq!(call.status, CallStatus::Assigned);

        call.complete(42.0, Qualification::Ok).unwrap();
        assert_eq!(call.status, CallStatus::Completed);
        assert_eq!(call.qualification_result, Qualification::Ok);
        assert_eq!(call.duration_seconds, Some(42.0));
    }

    #[test]
    fn call_cannot_assign_twice() {
        let mut call = Call::new("+15550001", "llamada_tipo_1");
        call.assign_to_agent("agent-1").unwrap();
        assert!(call.assign_to_agent("agent-2").is_err());
    }

    #[test]
    fn assignment_lifecycle_happy_path() {
        let mut a = Assignment::new("call-1", "agent-1");
        a.activate(12.5, 180.0).unwrap();
        assert_eq!(a.status, AssignmentStatus::Active);
        a.complete(190.0).unwrap();
        assert_eq!(a.status, AssignmentStatus::Completed);
        assert_eq!(a.actual_duration_seconds, Some(190.0));
    }
}
