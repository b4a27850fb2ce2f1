//! Load Generator (§4.8): agent/call factories, arrival pacing, background
//! status churn, and the drain poll used to wait out an in-flight test run.
//!
//! Grounded on `original_source/.../event_generator.py: EventGenerator` —
//! `generate_test_agents`/`generate_test_calls` become [`make_agents`]/
//! [`make_calls`], `simulate_call_arrivals` becomes [`drive_arrivals`],
//! `simulate_agent_login_logout` becomes [`churn_agents`], and
//! `wait_for_all_calls_completion` becomes [`drain`]. The semaphore-bounded
//! concurrency and per-call `tokio::spawn` mirror the source's
//! `asyncio.Semaphore` + `asyncio.create_task` shape, swapped for Tokio's
//! own primitives the way the rest of this crate swaps asyncio for Tokio.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::dispatcher::DispatchEngine;
use crate::types::{Agent, AgentStatus, Call};

/// Report returned by [`LoadGenerator::drive_arrivals`], supplementing the
/// spec's literal `{totals, successes, failures, saturations,
/// per-assignment latencies, wall duration}` contract with the derived
/// performance-compliance figures `original_source/.../event_generator.py:
/// generate_realistic_load` computes over the full sample (§9 open question
/// (b), §10 supplemented features).
#[derive(Debug, Clone, Default)]
pub struct ArrivalReport {
    pub total_calls: usize,
    pub successful_assignments: usize,
    pub failed_assignments: usize,
    pub saturated_calls: usize,
    pub assignment_times_ms: Vec<f64>,
    pub wall_duration_seconds: f64,
}

impl ArrivalReport {
    pub fn calls_per_second(&self) -> f64 {
        if self.wall_duration_seconds > 0.0 {
            self.total_calls as f64 / self.wall_duration_seconds
        } else {
            0.0
        }
    }

    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }
        let idx = ((p * sorted.len() as f64) as usize).min(sorted.len() - 1);
        sorted[idx]
    }

    /// avg/max/min/p95 assignment latency and `performance_compliance` (share
    /// of assignments at or under `max_assignment_time_ms`), computed over
    /// the entire sample rather than the last single assignment (§9 open
    /// question (b), §10).
    pub fn performance_metrics(&self, max_assignment_time_ms: f64) -> PerformanceMetrics {
        if self.assignment_times_ms.is_empty() {
            return PerformanceMetrics::default();
        }
        let mut sorted = self.assignment_times_ms.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let sum: f64 = sorted.iter().sum();
        let n = sorted.len() as f64;
        let compliant = sorted.iter().filter(|&&t| t <= max_assignment_time_ms).count();

        PerformanceMetrics {
            avg_assignment_time_ms: sum / n,
            min_assignment_time_ms: sorted[0],
            max_assignment_time_ms: sorted[sorted.len() - 1],
            p95_assignment_time_ms: Self::percentile(&sorted, 0.95),
            success_rate: self.successful_assignments as f64
                / (self.successful_assignments + self.failed_assignments).max(1) as f64,
            performance_compliance: compliant as f64 / n,
        }
    }
}

/// Derived performance figures over a full [`ArrivalReport`] sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerformanceMetrics {
    pub avg_assignment_time_ms: f64,
    pub min_assignment_time_ms: f64,
    pub max_assignment_time_ms: f64,
    pub p95_assignment_time_ms: f64,
    pub success_rate: f64,
    pub performance_compliance: f64,
}

/// Drives a [`DispatchEngine`] to exercise and measure its own SLOs (§4.8).
pub struct LoadGenerator {
    engine: Arc<DispatchEngine>,
    running: Arc<AtomicBool>,
}

impl LoadGenerator {
    pub fn new(engine: Arc<DispatchEngine>) -> Self {
        Self {
            engine,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Signals any running [`churn_agents`]/[`drive_arrivals`] loop to stop
    /// accepting new work, letting in-flight dispatches drain (§5
    /// cancellation).
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// The engine this generator drives, for spawning a second generator
    /// (e.g. a background churn task) against the same dispatch state.
    pub fn engine(&self) -> Arc<DispatchEngine> {
        self.engine.clone()
    }

    /// `n` agents sampled uniformly across the declared agent types,
    /// starting AVAILABLE, registered with the engine (§4.8
    /// `make_agents`/`generate_test_agents`).
    pub async fn make_agents(&self, n: usize) -> crate::error::Result<Vec<Agent>> {
        let types = &self.engine.config().agent_types;
        let mut rng = rand::thread_rng();
        let mut agents = Vec::with_capacity(n);
        for i in 0..n {
            let agent_type = types.choose(&mut rng).expect("agent_types validated non-empty at startup");
            let agent = Agent::new(format!("Agent_{:03}", i + 1), agent_type.clone(), AgentStatus::Available);
            self.engine.register_agent(agent.clone()).await?;
            agents.push(agent);
        }
        info!(count = n, "generated test agents");
        Ok(agents)
    }

    /// `n` calls in equal shares across the declared call types (remainder
    /// spread across the first few types), phone numbers deterministic then
    /// shuffled uniformly (§4.8 `make_calls`/`generate_test_calls`).
    pub fn make_calls(&self, n: usize) -> Vec<Call> {
        let types = &self.engine.config().call_types;
        let per_type = n / types.len();
        let remainder = n % types.len();

        let mut calls = Vec::with_capacity(n);
        let mut call_count = 0usize;
        for (i, call_type) in types.iter().enumerate() {
            let count = per_type + if i < remainder { 1 } else { 0 };
            for _ in 0..count {
                calls.push(Call::new(format!("+1555{call_count:06}"), call_type.clone()));
                call_count += 1;
            }
        }

        let mut rng = rand::thread_rng();
        calls.shuffle(&mut rng);
        info!(count = n, "generated test calls");
        calls
    }

    /// Pumps `calls` into the dispatcher at the given arrival rate, bounding
    /// concurrency with a counting semaphore (§4.8 `drive_arrivals`).
    /// Returns totals/successes/failures/saturations, per-assignment
    /// latencies, and wall duration.
    pub async fn drive_arrivals(
        &self,
        calls: Vec<Call>,
        rate_per_second: f64,
        max_concurrent: usize,
    ) -> ArrivalReport {
        let start = Instant::now();
        let total = calls.len();
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let inter_arrival = if rate_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / rate_per_second)
        } else {
            Duration::ZERO
        };

        let mut handles = Vec::with_capacity(total);
        for (i, call) in calls.into_iter().enumerate() {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            if i > 0 && !inter_arrival.is_zero() {
                tokio::time::sleep(inter_arrival).await;
            }

            let engine = self.engine.clone();
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                engine.assign_call(call).await
            }));
        }

        let mut report = ArrivalReport {
            total_calls: total,
            ..Default::default()
        };
        for handle in handles {
            match handle.await {
                Ok(result) => {
                    report.assignment_times_ms.push(result.assignment_time_ms);
                    if result.success {
                        report.successful_assignments += 1;
                    } else {
                        report.failed_assignments += 1;
                        if result.message.contains("saturated") {
                            report.saturated_calls += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "dispatch task panicked during arrival drive");
                    report.failed_assignments += 1;
                }
            }
        }

        report.wall_duration_seconds = start.elapsed().as_secs_f64();
        info!(
            successes = report.successful_assignments,
            failures = report.failed_assignments,
            saturations = report.saturated_calls,
            "arrival drive complete"
        );
        report
    }

    /// Background churn loop (§4.8 `churn_agents`): every random 5-15s, pick
    /// a random agent and roll its status transition. Never mutates a BUSY
    /// agent. Runs until [`stop`](Self::stop) is called; intended to be
    /// spawned as its own task.
    pub async fn churn_agents(&self, agents: Vec<Agent>, login_probability: f64) {
        let mut rng = rand::thread_rng();
        while self.running.load(Ordering::SeqCst) {
            let sleep_secs = rng.gen_range(5.0..=15.0);
            tokio::time::sleep(Duration::from_secs_f64(sleep_secs)).await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let Some(agent) = agents.choose(&mut rng) else {
                continue;
            };
            let Some(current) = self
                .engine
                .store()
                .get_agent(&agent.id)
                .await
                .ok()
                .flatten()
                .map(|a| a.status)
            else {
                continue;
            };

            let new_status = match current {
                AgentStatus::Busy => None,
                AgentStatus::Available if rng.gen_bool(0.1) => Some(AgentStatus::Paused),
                AgentStatus::Paused if rng.gen_bool(0.7) => Some(AgentStatus::Available),
                AgentStatus::Offline if rng.gen_bool(login_probability.clamp(0.0, 1.0)) => Some(AgentStatus::Available),
                _ => None,
            };

            if let Some(status) = new_status {
                if let Err(e) = self.engine.set_agent_status(&agent.id, status).await {
                    warn!(agent_id = %agent.id, error = %e, "churn status update failed");
                }
            }
        }
    }

    /// Polls system status until active assignments reach zero or `timeout`
    /// elapses (§4.8 `drain`/`wait_for_all_calls_completion`). Returns
    /// whether the system drained before the timeout.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if self.engine.store().active_assignment_count() == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        warn!(timeout_seconds = timeout.as_secs(), "drain timed out with active assignments remaining");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;

    async fn test_engine() -> Arc<DispatchEngine> {
        DispatchEngine::new_in_memory(DispatchConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn make_agents_produces_requested_count_all_available() {
        let engine = test_engine().await;
        let generator = LoadGenerator::new(engine);
        let agents = generator.make_agents(10).await.unwrap();
        assert_eq!(agents.len(), 10);
        assert!(agents.iter().all(|a| a.status == AgentStatus::Available));
    }

    #[tokio::test]
    async fn make_calls_distributes_equally_across_call_types() {
        let engine = test_engine().await;
        let generator = LoadGenerator::new(engine.clone());
        let calls = generator.make_calls(100);
        assert_eq!(calls.len(), 100);

        let mut counts = std::collections::HashMap::new();
        for call in &calls {
            *counts.entry(call.call_type.clone()).or_insert(0) += 1;
        }
        assert_eq!(counts.len(), engine.config().call_types.len());
        for count in counts.values() {
            assert_eq!(*count, 25);
        }
    }

    #[tokio::test]
    async fn drive_arrivals_reports_all_successes_with_ample_agents() {
        let engine = test_engine().await;
        let generator = LoadGenerator::new(engine.clone());
        generator.make_agents(20).await.unwrap();
        let calls = generator.make_calls(20);

        let report = generator.drive_arrivals(calls, 1000.0, 10).await;
        assert_eq!(report.total_calls, 20);
        assert_eq!(report.successful_assignments, 20);
        assert_eq!(report.failed_assignments, 0);
    }

    #[tokio::test]
    async fn drive_arrivals_saturates_with_no_agents() {
        let engine = test_engine().await;
        let generator = LoadGenerator::new(engine.clone());
        let calls = generator.make_calls(5);

        let report = generator.drive_arrivals(calls, 1000.0, 10).await;
        assert_eq!(report.saturated_calls, 5);
        assert_eq!(report.successful_assignments, 0);
    }

    #[tokio::test]
    async fn drain_returns_true_when_no_active_assignments() {
        let engine = test_engine().await;
        let generator = LoadGenerator::new(engine);
        assert!(generator.drain(Duration::from_millis(50)).await);
    }
}
