//! Qualification Sampler (§4.5): the binomial OK/KO draw from the conversion
//! matrix and the normal-distribution call-duration draw.
//!
//! Grounded on `original_source/.../qualification_service.py`, which uses
//! `numpy.random.default_rng().binomial(n=1, p=probability)` and
//! `.normal(mean, std)` clamped to a 1-second floor. Rust's idiomatic
//! equivalent is `rand`/`rand_distr` (already in the teacher workspace's
//! dependency table) rather than hand-rolling a PRNG.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::types::Qualification;

/// A process-wide Bernoulli/Normal sampler over the configured conversion
/// matrix (§4.5 contract). The source describes "a single process-wide
/// generator" with a seed hook for tests; `Mutex<StdRng>` gives the same
/// shape without requiring `Send + Sync` gymnastics around a raw RNG.
pub struct QualificationSampler {
    matrix: HashMap<String, HashMap<String, f64>>,
    rng: Mutex<StdRng>,
}

impl std::fmt::Debug for QualificationSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualificationSampler")
            .field("matrix", &self.matrix)
            .finish()
    }
}

impl QualificationSampler {
    pub fn new(matrix: HashMap<String, HashMap<String, f64>>) -> Self {
        Self {
            matrix,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic construction for property tests that need a fixed seed.
    pub fn with_seed(matrix: HashMap<String, HashMap<String, f64>>, seed: u64) -> Self {
        Self {
            matrix,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Conversion probability for `(agent_type, call_type)`, 0.0 if either
    /// key is unknown (§4.5 contract).
    pub fn conversion_probability(&self, agent_type: &str, call_type: &str) -> f64 {
        self.matrix
            .get(agent_type)
            .and_then(|row| row.get(call_type))
            .copied()
            .unwrap_or(0.0)
    }

    /// Bernoulli draw with p = `Matrix[agent_type][call_type]` (§4.5).
    pub fn qualify(&self, agent_type: &str, call_type: &str) -> Qualification {
        let p = self.conversion_probability(agent_type, call_type);
        let mut rng = self.rng.lock().expect("qualification rng poisoned");
        if rng.gen_bool(p.clamp(0.0, 1.0)) {
            Qualification::Ok
        } else {
            Qualification::Ko
        }
    }

    /// Normal(mean, std) draw clamped to >= 1.0 seconds (§4.5).
    pub fn duration(&self, mean_seconds: f64, std_seconds: f64) -> f64 {
        let std = std_seconds.max(0.0);
        let mut rng = self.rng.lock().expect("qualification rng poisoned");
        let sample = if std == 0.0 {
            mean_seconds
        } else {
            let normal = Normal::new(mean_seconds, std).expect("invalid normal distribution params");
            normal.sample(&mut *rng)
        };
        sample.max(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> HashMap<String, HashMap<String, f64>> {
        let mut m = HashMap::new();
        let mut row = HashMap::new();
        row.insert("llamada_tipo_1".to_string(), 0.3);
        m.insert("agente_tipo_1".to_string(), row);
        m
    }

    #[test]
    fn unknown_combination_yields_zero_probability() {
        let sampler = QualificationSampler::with_seed(matrix(), 1);
        assert_eq!(sampler.conversion_probability("unknown", "unknown"), 0.0);
    }

    #[test]
    fn qualify_rate_is_within_tolerance_over_large_sample() {
        let sampler = QualificationSampler::with_seed(matrix(), 42);
        let n = 5000;
        let ok_count = (0..n)
            .filter(|_| sampler.qualify("agente_tipo_1", "llamada_tipo_1") == Qualification::Ok)
            .count();
        let observed_rate = ok_count as f64 / n as f64;
        assert!(
            (observed_rate - 0.3).abs() < 0.05,
            "observed OK rate {observed_rate} too far from 0.3"
        );
    }

    #[test]
    fn duration_never_drops_below_one_second() {
        let sampler = QualificationSampler::with_seed(matrix(), 7);
        for _ in 0..2000 {
            let d = sampler.duration(1.0, 5.0);
            assert!(d >= 1.0);
        }
    }

    #[test]
    fn duration_sample_statistics_match_configured_distribution() {
        let sampler = QualificationSampler::with_seed(matrix(), 99);
        let n = 5000;
        let samples: Vec<f64> = (0..n).map(|_| sampler.duration(180.0, 30.0)).collect();
        let mean: f64 = samples.iter().sum::<f64>() / n as f64;
        let variance: f64 = samples.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n as f64;
        let std = variance.sqrt();

        assert!((mean - 180.0).abs() < 180.0 * 0.1);
        assert!((std - 30.0).abs() < 30.0 * 0.2);
    }

    #[test]
    fn zero_std_is_deterministic() {
        let sampler = QualificationSampler::with_seed(matrix(), 5);
        assert_eq!(sampler.duration(42.0, 0.0), 42.0);
    }
}
