//! Crate-wide error types
//!
//! Errors are grouped the way the dispatch protocol fails (§7 of the spec):
//! configuration errors are fatal at startup, store/lock/scheduler faults are
//! recoverable per-call failures the dispatcher folds into its typed result,
//! and notifier failures never escape their own boundary at all (they are
//! logged and counted by the [`crate::notifier::Notifier`] directly and never
//! constructed as a [`DispatchError`]).

use thiserror::Error;

/// Result type alias used throughout the crate's public API.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors that can cross a public API boundary.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A configuration value failed validation at load time (§7 item 8).
    /// Fatal: the process must not start with an invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The fast-tier (in-memory) store failed a point operation. Fatal to
    /// the dispatch in progress (§7 item 4).
    #[error("state store fast-tier error: {0}")]
    FastTier(String),

    /// The durable tier failed a write-through. Never fatal to the dispatch
    /// (§7 item 5); surfaced here only for callers that explicitly want to
    /// observe durable-tier health (e.g. the `status`/`cleanup` CLI paths).
    #[error("state store durable-tier error: {0}")]
    DurableTier(#[from] sqlx::Error),

    /// The requested entity does not exist in the fast tier.
    #[error("entity not found: {kind} {id}")]
    NotFound { kind: &'static str, id: String },

    /// The assignment lock for a call-id was already held (§4.2). Not
    /// retried by the caller; reported back as `race-detected`.
    #[error("race detected for call {0} — already being processed")]
    RaceDetected(String),

    /// No AVAILABLE agent existed at the moment of selection (§4.3 step 3).
    #[error("no agents available for call {0}")]
    Saturated(String),

    /// The lifecycle scheduler could not complete a call because the agent
    /// or call record had vanished from the state store (§4.4, §7 item 7).
    #[error("scheduler fault completing call {0}: {1}")]
    SchedulerFault(String, String),

    /// An entity transitioned out of order, violating a data-model invariant
    /// (§3). Indicates a bug in the caller, not a runtime race.
    #[error("invalid state transition for {kind} {id}: {reason}")]
    InvalidTransition {
        kind: &'static str,
        id: String,
        reason: String,
    },
}

impl DispatchError {
    /// Stable category label for metrics grouping, mirroring the `category()`
    /// helper the teacher crate attaches to its own error enum.
    pub fn category(&self) -> &'static str {
        match self {
            DispatchError::InvalidConfig(_) => "config",
            DispatchError::FastTier(_) => "fast_tier",
            DispatchError::DurableTier(_) => "durable_tier",
            DispatchError::NotFound { .. } => "not_found",
            DispatchError::RaceDetected(_) => "race_detected",
            DispatchError::Saturated(_) => "saturated",
            DispatchError::SchedulerFault(_, _) => "scheduler_fault",
            DispatchError::InvalidTransition { .. } => "invalid_transition",
        }
    }
}
