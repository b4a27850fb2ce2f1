//! Lifecycle Scheduler (§4.4): deferred one-shot call-completion timers,
//! cancellable on abandonment.
//!
//! Grounded on `original_source/.../orchestrator.py: _schedule_call_completion`,
//! which keeps a `Dict[str, asyncio.Task]` of per-call timers and cancels the
//! task on abandon. The Rust equivalent is a per-call `tokio::spawn` plus a
//! `JoinHandle` stored in a `DashMap` — the same per-call-task shape the
//! source uses, scaled with Tokio's own task scheduler rather than a
//! hand-rolled one. §9 notes that a single min-heap timer wheel is the right
//! choice at very high call volumes without changing this external contract;
//! this crate takes the simpler per-call-task route the source itself uses,
//! since the external `schedule`/`cancel` contract is unchanged either way.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;

/// SCHEDULED -> (FIRED | CANCELLED) per call-id (§4.4 state machine).
#[derive(Clone)]
pub struct LifecycleScheduler {
    timers: Arc<DashMap<String, JoinHandle<()>>>,
}

impl LifecycleScheduler {
    pub fn new() -> Self {
        Self {
            timers: Arc::new(DashMap::new()),
        }
    }

    /// Registers a one-shot deferred action that runs `action` after `after`
    /// elapses (§4.4 contract). Overwrites (and aborts) any existing timer
    /// for the same call-id — callers are expected to schedule at most one
    /// pending release per call.
    pub fn schedule<Fut>(&self, call_id: String, after: Duration, action: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let timers = self.timers.clone();
        let id_for_cleanup = call_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            action.await;
            timers.remove(&id_for_cleanup);
        });
        if let Some(old) = self.timers.insert(call_id, handle) {
            old.abort();
        }
    }

    /// Cancels a pending timer, returning `true` if one was live. A no-op
    /// (returns `false`) if the timer already fired or never existed —
    /// matches the §4.4 cancellation semantics exactly.
    pub fn cancel(&self, call_id: &str) -> bool {
        match self.timers.remove(call_id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.timers.len()
    }

    pub fn is_scheduled(&self, call_id: &str) -> bool {
        self.timers.contains_key(call_id)
    }
}

impl Default for LifecycleScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn fires_after_delay() {
        let scheduler = LifecycleScheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();

        scheduler.schedule("call-1".to_string(), Duration::from_millis(10), async move {
            fired_clone.store(true, Ordering::SeqCst);
        });

        assert!(scheduler.is_scheduled("call-1"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fired.load(Ordering::SeqCst));
        assert!(!scheduler.is_scheduled("call-1"));
    }

    #[tokio::test]
    async fn cancel_before_fire_prevents_action() {
        let scheduler = LifecycleScheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();

        scheduler.schedule("call-1".to_string(), Duration::from_millis(50), async move {
            fired_clone.store(true, Ordering::SeqCst);
        });

        assert!(scheduler.cancel("call-1"));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_after_fire_is_a_noop() {
        let scheduler = LifecycleScheduler::new();
        scheduler.schedule("call-1".to_string(), Duration::from_millis(5), async move {});
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!scheduler.cancel("call-1"));
    }

    #[tokio::test]
    async fn cancel_unknown_call_is_a_noop() {
        let scheduler = LifecycleScheduler::new();
        assert!(!scheduler.cancel("never-scheduled"));
    }
}
