//! Configuration surface (§4.10, §6), loaded from environment variables with
//! defaults mirroring `original_source/src/config/settings.py`. Validated
//! eagerly at startup — an invalid configuration is fatal (§7 item 8).

use std::collections::HashMap;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};

/// `host:port` the HTTP front-end binds to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub api_host: String,
    pub api_port: u16,
    pub max_concurrent_dispatches: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            api_host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: std::env::var("API_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
            max_concurrent_dispatches: std::env::var("MAX_CONCURRENT_DISPATCHES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(64),
        }
    }
}

impl GeneralConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .map_err(|e| DispatchError::InvalidConfig(format!("invalid api bind address: {e}")))
    }
}

/// Durable-tier connection settings (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string()),
        }
    }
}

/// Assignment protocol timing (§4.3 latency budget, §4.2 lock TTL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentConfig {
    pub max_assignment_time_ms: u64,
    pub lock_ttl_seconds: u64,
    /// Cap on how many candidates the dispatcher will skip past before
    /// collapsing a binding race into saturation (§4.3 step 4, §9).
    pub max_candidates: usize,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            max_assignment_time_ms: std::env::var("MAX_ASSIGNMENT_TIME_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            lock_ttl_seconds: std::env::var("ASSIGNMENT_LOCK_TTL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            max_candidates: std::env::var("MAX_ASSIGNMENT_CANDIDATES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(16),
        }
    }
}

/// Simulated call-duration distribution (§4.5, §6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CallDurationConfig {
    pub mean_seconds: f64,
    pub std_seconds: f64,
}

impl Default for CallDurationConfig {
    fn default() -> Self {
        Self {
            mean_seconds: std::env::var("CALL_DURATION_MEAN")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(180.0),
            std_seconds: std::env::var("CALL_DURATION_STD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(180.0),
        }
    }
}

/// External notification sink settings (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    pub timeout_seconds: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("WEBHOOK_URL")
                .unwrap_or_else(|_| "http://localhost:8001/webhook".to_string()),
            timeout_seconds: std::env::var("WEBHOOK_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        }
    }
}

/// Top-level dispatch engine configuration (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub general: GeneralConfig,
    pub database: DatabaseConfig,
    pub assignment: AssignmentConfig,
    pub call_duration: CallDurationConfig,
    pub webhook: WebhookConfig,
    pub agent_types: Vec<String>,
    pub call_types: Vec<String>,
    pub conversion_matrix: HashMap<String, HashMap<String, f64>>,
    pub test_num_calls: usize,
    pub test_num_agents: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            database: DatabaseConfig::default(),
            assignment: AssignmentConfig::default(),
            call_duration: CallDurationConfig::default(),
            webhook: WebhookConfig::default(),
            agent_types: default_agent_types(),
            call_types: default_call_types(),
            conversion_matrix: default_conversion_matrix(),
            test_num_calls: std::env::var("TEST_NUM_CALLS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            test_num_agents: std::env::var("TEST_NUM_AGENTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        }
    }
}

impl DispatchConfig {
    /// Validate matrix entries lie in [0,1] and the declared type sets are
    /// non-empty (§7 item 8: invalid configuration is fatal at startup).
    pub fn validate(&self) -> Result<()> {
        if self.agent_types.is_empty() {
            return Err(DispatchError::InvalidConfig("agent_types must not be empty".into()));
        }
        if self.call_types.is_empty() {
            return Err(DispatchError::InvalidConfig("call_types must not be empty".into()));
        }
        for (agent_type, by_call_type) in &self.conversion_matrix {
            for (call_type, probability) in by_call_type {
                if !(0.0..=1.0).contains(probability) {
                    return Err(DispatchError::InvalidConfig(format!(
                        "conversion_matrix[{agent_type}][{call_type}] = {probability} is out of [0,1]"
                    )));
                }
            }
        }
        if self.call_duration.mean_seconds <= 0.0 {
            return Err(DispatchError::InvalidConfig(
                "call_duration.mean_seconds must be positive".into(),
            ));
        }
        if self.call_duration.std_seconds < 0.0 {
            return Err(DispatchError::InvalidConfig(
                "call_duration.std_seconds must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

fn default_agent_types() -> Vec<String> {
    vec![
        "agente_tipo_1".to_string(),
        "agente_tipo_2".to_string(),
        "agente_tipo_3".to_string(),
        "agente_tipo_4".to_string(),
    ]
}

fn default_call_types() -> Vec<String> {
    vec![
        "llamada_tipo_1".to_string(),
        "llamada_tipo_2".to_string(),
        "llamada_tipo_3".to_string(),
        "llamada_tipo_4".to_string(),
    ]
}

/// Default conversion matrix (§6): a monotone gradient tapering from 0.30
/// down to 0.02, matching `original_source/src/config/settings.py` verbatim
/// since the Spanish labels and the probabilities are data, not code.
fn default_conversion_matrix() -> HashMap<String, HashMap<String, f64>> {
    let rows: [(&str, [f64; 4]); 4] = [
        ("agente_tipo_1", [0.30, 0.20, 0.10, 0.05]),
        ("agente_tipo_2", [0.20, 0.15, 0.07, 0.04]),
        ("agente_tipo_3", [0.15, 0.12, 0.06, 0.03]),
        ("agente_tipo_4", [0.12, 0.10, 0.04, 0.02]),
    ];
    let call_types = default_call_types();
    rows.into_iter()
        .map(|(agent_type, rates)| {
            let by_call_type = call_types
                .iter()
                .cloned()
                .zip(rates)
                .collect::<HashMap<_, _>>();
            (agent_type.to_string(), by_call_type)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = DispatchConfig::default();
        config.validate().expect("default config must be valid");
    }

    #[test]
    fn out_of_range_matrix_entry_rejected() {
        let mut config = DispatchConfig::default();
        config
            .conversion_matrix
            .get_mut("agente_tipo_1")
            .unwrap()
            .insert("llamada_tipo_1".to_string(), 1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_agent_types_rejected() {
        let mut config = DispatchConfig::default();
        config.agent_types.clear();
        assert!(config.validate().is_err());
    }
}
