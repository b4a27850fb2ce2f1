//! Notifier (§4.7): fire-and-forget HTTP POST of JSON events to an external
//! observer, with a hard timeout. Failures are logged and counted but never
//! block or roll back the caller — this module is the one place in the crate
//! that is allowed to fully swallow an error (§7 item 6).
//!
//! Grounded on `original_source/.../webhook_client.py`: same five event kinds,
//! same payload shape, same "never raise past this boundary" policy. The
//! teacher crate doesn't carry an HTTP client dependency of its own (SIP
//! signaling is its wire protocol), so the client choice here is drawn from
//! the wider pack: `auth-core`'s `Cargo.toml` already depends on `reqwest`
//! with the `json`/`rustls-tls` features, which this module reuses.

use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::metrics::MetricsRegistry;
use crate::types::{Agent, AgentStatus, Assignment, Call, Qualification};

/// The five notification kinds the spec enumerates (§4.7, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    CallAssigned,
    CallCompleted,
    SystemSaturated,
    AgentStatusChanged,
    HealthCheck,
}

impl EventKind {
    fn as_str(&self) -> &'static str {
        match self {
            EventKind::CallAssigned => "CALL_ASSIGNED",
            EventKind::CallCompleted => "CALL_COMPLETED",
            EventKind::SystemSaturated => "SYSTEM_SATURATED",
            EventKind::AgentStatusChanged => "AGENT_STATUS_CHANGED",
            EventKind::HealthCheck => "HEALTH_CHECK",
        }
    }
}

/// Posts JSON payloads to a configured webhook URL with a bounded timeout.
pub struct Notifier {
    client: reqwest::Client,
    url: String,
    metrics: MetricsRegistry,
}

impl Notifier {
    pub fn new(url: impl Into<String>, timeout: Duration, metrics: MetricsRegistry) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client build should not fail with a timeout-only builder");
        Self {
            client,
            url: url.into(),
            metrics,
        }
    }

    /// §6 `CALL_ASSIGNED` payload.
    pub async fn notify_assignment(&self, assignment: &Assignment, agent: &Agent, call: &Call) {
        let payload = json!({
            "event_type": EventKind::CallAssigned.as_str(),
            "timestamp": Utc::now().to_rfc3339(),
            "assignment": {
                "id": assignment.id,
                "call_id": assignment.call_id,
                "agent_id": assignment.agent_id,
                "assignment_time_ms": assignment.assignment_time_ms,
                "expected_duration_seconds": assignment.expected_duration_seconds,
            },
            "call": {
                "id": call.id,
                "phone_number": call.phone_number,
                "call_type": call.call_type,
                "created_at": call.created_at.to_rfc3339(),
                "assigned_at": call.assigned_at.map(|t| t.to_rfc3339()),
            },
            "agent": {
                "id": agent.id,
                "name": agent.name,
                "agent_type": agent.agent_type,
                "status": agent.status.as_str(),
            },
        });
        self.emit(EventKind::CallAssigned, payload).await;
    }

    /// §6 `CALL_COMPLETED` payload.
    pub async fn notify_completion(&self, call: &Call, agent: &Agent, qualification: Qualification) {
        let payload = json!({
            "event_type": EventKind::CallCompleted.as_str(),
            "timestamp": Utc::now().to_rfc3339(),
            "call": {
                "id": call.id,
                "phone_number": call.phone_number,
                "call_type": call.call_type,
                "status": call.status.as_str(),
                "qualification_result": qualification.as_str(),
                "duration_seconds": call.duration_seconds,
                "created_at": call.created_at.to_rfc3339(),
                "assigned_at": call.assigned_at.map(|t| t.to_rfc3339()),
                "completed_at": call.completed_at.map(|t| t.to_rfc3339()),
            },
            "agent": {
                "id": agent.id,
                "name": agent.name,
                "agent_type": agent.agent_type,
                "status": agent.status.as_str(),
            },
        });
        self.emit(EventKind::CallCompleted, payload).await;
    }

    /// §6 `SYSTEM_SATURATED` payload.
    pub async fn notify_saturation(&self, call: &Call, assignment_time_ms: f64) {
        let payload = json!({
            "event_type": EventKind::SystemSaturated.as_str(),
            "timestamp": Utc::now().to_rfc3339(),
            "call": {
                "id": call.id,
                "phone_number": call.phone_number,
                "call_type": call.call_type,
                "created_at": call.created_at.to_rfc3339(),
            },
            "assignment_attempt": {
                "assignment_time_ms": assignment_time_ms,
                "status": "NO_AGENTS_AVAILABLE",
            },
        });
        self.emit(EventKind::SystemSaturated, payload).await;
    }

    /// §6 `AGENT_STATUS_CHANGED` payload.
    pub async fn notify_agent_status_change(&self, agent: &Agent, previous_status: AgentStatus) {
        let payload = json!({
            "event_type": EventKind::AgentStatusChanged.as_str(),
            "timestamp": Utc::now().to_rfc3339(),
            "agent": {
                "id": agent.id,
                "name": agent.name,
                "agent_type": agent.agent_type,
                "previous_status": previous_status.as_str(),
                "current_status": agent.status.as_str(),
                "updated_at": agent.updated_at.to_rfc3339(),
            },
        });
        self.emit(EventKind::AgentStatusChanged, payload).await;
    }

    /// Posts a `HEALTH_CHECK` event and reports whether the sink was
    /// reachable (ported from `webhook_client.py: health_check`).
    pub async fn health_check(&self) -> bool {
        let payload = json!({
            "event_type": EventKind::HealthCheck.as_str(),
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.post(payload).await.is_ok()
    }

    async fn emit(&self, kind: EventKind, payload: Value) {
        if self.post(payload).await.is_ok() {
            debug!(event_type = kind.as_str(), "webhook delivered");
        } else {
            warn!(event_type = kind.as_str(), "webhook delivery failed");
            self.metrics.inc("notifier_errors", 1.0);
        }
    }

    async fn post(&self, payload: Value) -> Result<(), ()> {
        match self.client.post(&self.url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => {
                warn!(status = %resp.status(), url = %self.url, "webhook endpoint returned non-success status");
                Err(())
            }
            Err(e) => {
                warn!(error = %e, url = %self.url, "webhook request failed");
                Err(())
            }
        }
    }
}
