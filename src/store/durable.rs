//! Durable tier (§4.6): sqlite via sqlx, fed via write-through on every
//! `put`. Never consulted on the hot path — only on fast-tier cache miss
//! (cold start) and by the `status`/`cleanup` CLI paths (§4.14, §9).
//!
//! Grounded on `crates/users-core/src/auth/mod.rs`'s own `SqlitePool` +
//! runtime query shape. Queries use the runtime `query`/`query_as` builders
//! rather than the `query!`/`query_as!` macros — those require a live
//! database at crate build time, which this repo's toolchain-free build
//! process cannot provide.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::types::{
    Agent, AgentStatus, Assignment, AssignmentStatus, Call, CallStatus, Qualification,
};

/// Thin wrapper around a sqlite connection pool, write-through target for
/// the fast tier.
#[derive(Clone)]
pub struct DurableTier {
    pool: SqlitePool,
}

impl DurableTier {
    pub async fn connect(database_url: &str) -> sqlx::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn in_memory() -> sqlx::Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    pub async fn put_agent(&self, agent: &Agent) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO agents (id, name, agent_type, status, last_call_end_time, current_call_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                agent_type = excluded.agent_type,
                status = excluded.status,
                last_call_end_time = excluded.last_call_end_time,
                current_call_id = excluded.current_call_id,
                updated_at = excluded.updated_at",
        )
        .bind(&agent.id)
        .bind(&agent.name)
        .bind(&agent.agent_type)
        .bind(agent.status.as_str())
        .bind(agent.last_call_end_time.map(|t| t.to_rfc3339()))
        .bind(&agent.current_call_id)
        .bind(agent.created_at.to_rfc3339())
        .bind(agent.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_agent(&self, id: &str) -> sqlx::Result<Option<Agent>> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| agent_from_row(&r)))
    }

    pub async fn delete_agent(&self, id: &str) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM agents WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn put_call(&self, call: &Call) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO calls (id, phone_number, call_type, status, assigned_agent_id, qualification_result, created_at, assigned_at, started_at, completed_at, duration_seconds)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                assigned_agent_id = excluded.assigned_agent_id,
                qualification_result = excluded.qualification_result,
                assigned_at = excluded.assigned_at,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                duration_seconds = excluded.duration_seconds",
        )
        .bind(&call.id)
        .bind(&call.phone_number)
        .bind(&call.call_type)
        .bind(call.status.as_str())
        .bind(&call.assigned_agent_id)
        .bind(call.qualification_result.as_str())
        .bind(call.created_at.to_rfc3339())
        .bind(call.assigned_at.map(|t| t.to_rfc3339()))
        .bind(call.started_at.map(|t| t.to_rfc3339()))
        .bind(call.completed_at.map(|t| t.to_rfc3339()))
        .bind(call.duration_seconds)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_call(&self, id: &str) -> sqlx::Result<Option<Call>> {
        let row = sqlx::query("SELECT * FROM calls WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| call_from_row(&r)))
    }

    pub async fn delete_call(&self, id: &str) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM calls WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn put_assignment(&self, assignment: &Assignment) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO assignments (id, call_id, agent_id, status, assignment_time_ms, expected_duration_seconds, actual_duration_seconds, created_at, activated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                assignment_time_ms = excluded.assignment_time_ms,
                expected_duration_seconds = excluded.expected_duration_seconds,
                actual_duration_seconds = excluded.actual_duration_seconds,
                activated_at = excluded.activated_at,
                completed_at = excluded.completed_at",
        )
        .bind(&assignment.id)
        .bind(&assignment.call_id)
        .bind(&assignment.agent_id)
        .bind(assignment.status.as_str())
        .bind(assignment.assignment_time_ms)
        .bind(assignment.expected_duration_seconds)
        .bind(assignment.actual_duration_seconds)
        .bind(assignment.created_at.to_rfc3339())
        .bind(assignment.activated_at.map(|t| t.to_rfc3339()))
        .bind(assignment.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_assignment(&self, id: &str) -> sqlx::Result<Option<Assignment>> {
        let row = sqlx::query("SELECT * FROM assignments WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| assignment_from_row(&r)))
    }

    /// Deletes every row created during a test/load run (§4.14 `cleanup`,
    /// supplemented from `event_generator.py: cleanup_test_data`).
    pub async fn clear_all(&self) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM assignments").execute(&self.pool).await?;
        sqlx::query("DELETE FROM calls").execute(&self.pool).await?;
        sqlx::query("DELETE FROM agents").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_opt_dt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|s| parse_dt(&s))
}

fn agent_status_from_str(s: &str) -> AgentStatus {
    match s {
        "AVAILABLE" => AgentStatus::Available,
        "BUSY" => AgentStatus::Busy,
        "PAUSED" => AgentStatus::Paused,
        _ => AgentStatus::Offline,
    }
}

fn call_status_from_str(s: &str) -> CallStatus {
    match s {
        "ASSIGNED" => CallStatus::Assigned,
        "IN_PROGRESS" => CallStatus::InProgress,
        "COMPLETED" => CallStatus::Completed,
        "ABANDONED" => CallStatus::Abandoned,
        "FAILED" => CallStatus::Failed,
        _ => CallStatus::Pending,
    }
}

fn qualification_from_str(s: &str) -> Qualification {
    match s {
        "OK" => Qualification::Ok,
        "KO" => Qualification::Ko,
        _ => Qualification::Pending,
    }
}

fn assignment_status_from_str(s: &str) -> AssignmentStatus {
    match s {
        "ACTIVE" => AssignmentStatus::Active,
        "COMPLETED" => AssignmentStatus::Completed,
        "FAILED" => AssignmentStatus::Failed,
        _ => AssignmentStatus::Pending,
    }
}

fn agent_from_row(row: &sqlx::sqlite::SqliteRow) -> Agent {
    Agent {
        id: row.get("id"),
        name: row.get("name"),
        agent_type: row.get("agent_type"),
        status: agent_status_from_str(row.get::<String, _>("status").as_str()),
        last_call_end_time: parse_opt_dt(row.get("last_call_end_time")),
        current_call_id: row.get("current_call_id"),
        created_at: parse_dt(&row.get::<String, _>("created_at")),
        updated_at: parse_dt(&row.get::<String, _>("updated_at")),
    }
}

fn call_from_row(row: &sqlx::sqlite::SqliteRow) -> Call {
    Call {
        id: row.get("id"),
        phone_number: row.get("phone_number"),
        call_type: row.get("call_type"),
        status: call_status_from_str(row.get::<String, _>("status").as_str()),
        assigned_agent_id: row.get("assigned_agent_id"),
        qualification_result: qualification_from_str(row.get::<String, _>("qualification_result").as_str()),
        created_at: parse_dt(&row.get::<String, _>("created_at")),
        assigned_at: parse_opt_dt(row.get("assigned_at")),
        started_at: parse_opt_dt(row.get("started_at")),
        completed_at: parse_opt_dt(row.get("completed_at")),
        duration_seconds: row.get("duration_seconds"),
    }
}

fn assignment_from_row(row: &sqlx::sqlite::SqliteRow) -> Assignment {
    Assignment {
        id: row.get("id"),
        call_id: row.get("call_id"),
        agent_id: row.get("agent_id"),
        status: assignment_status_from_str(row.get::<String, _>("status").as_str()),
        assignment_time_ms: row.get("assignment_time_ms"),
        expected_duration_seconds: row.get("expected_duration_seconds"),
        actual_duration_seconds: row.get("actual_duration_seconds"),
        created_at: parse_dt(&row.get::<String, _>("created_at")),
        activated_at: parse_opt_dt(row.get("activated_at")),
        completed_at: parse_opt_dt(row.get("completed_at")),
    }
}
