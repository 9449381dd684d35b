// src/config.rs
use crate::error::{ProcessingError, Result};
use serde::{Deserialize, Serialize};
use std::fs; // For reading the file
use std::path::Path; // For path handling

pub mod cli;
pub mod rules;

fn default_max_concurrent() -> usize {
    10
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_circuit_breaker_threshold() -> u32 {
    5
}
fn default_circuit_breaker_cooldown_secs() -> u64 {
    30
}
fn default_chunk_delay_ms() -> u64 {
    1_000
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_classification_workers() -> usize {
    4
}
fn default_escalation_threshold() -> f64 {
    0.7
}

/// Batch-orchestration configuration read from YAML (all fields optional,
/// falling back to the defaults above).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Chunk size: how many entities are in flight concurrently.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Total analysis attempts per entity (first try included).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff; the nth retry waits base * 2^(n-1).
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Consecutive entity failures before the circuit breaker opens.
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,
    #[serde(default = "default_circuit_breaker_cooldown_secs")]
    pub circuit_breaker_cooldown_secs: u64,
    /// Fixed pause between chunks so the analysis service is not overloaded.
    #[serde(default = "default_chunk_delay_ms")]
    pub chunk_delay_ms: u64,
    /// Per-request timeout enforced by the analysis client.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Size of the bounded blocking pool for CPU-bound classification.
    #[serde(default = "default_classification_workers")]
    pub classification_workers: usize,
    /// Heuristic confidence below which the classifier escalates.
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: f64,
    #[serde(default)]
    pub priority_thresholds: PriorityThresholds,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            circuit_breaker_cooldown_secs: default_circuit_breaker_cooldown_secs(),
            chunk_delay_ms: default_chunk_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            classification_workers: default_classification_workers(),
            escalation_threshold: default_escalation_threshold(),
            priority_thresholds: PriorityThresholds::default(),
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(ProcessingError::ConfigValidationError(
                "BatchConfig: max_concurrent must be greater than 0".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(ProcessingError::ConfigValidationError(
                "BatchConfig: max_retries must be greater than 0".to_string(),
            ));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(ProcessingError::ConfigValidationError(
                "BatchConfig: circuit_breaker_threshold must be greater than 0".to_string(),
            ));
        }
        if self.classification_workers == 0 {
            return Err(ProcessingError::ConfigValidationError(
                "BatchConfig: classification_workers must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.escalation_threshold) {
            return Err(ProcessingError::ConfigValidationError(format!(
                "BatchConfig: escalation_threshold must be between 0.0 and 1.0, got {}",
                self.escalation_threshold
            )));
        }
        self.priority_thresholds.validate()
    }
}

/// Priority cutoffs, centralized so the classifier never hard-codes them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriorityThresholds {
    /// Wage change (percent) at which a wage adjustment becomes HIGH priority.
    pub wage_change_pct: f64,
    /// Lead time (hours) below which a lead-time issue becomes HIGH priority.
    pub lead_time_hours: i64,
}

impl Default for PriorityThresholds {
    fn default() -> Self {
        PriorityThresholds {
            wage_change_pct: 20.0,
            lead_time_hours: 24,
        }
    }
}

impl PriorityThresholds {
    pub fn validate(&self) -> Result<()> {
        if self.wage_change_pct <= 0.0 {
            return Err(ProcessingError::ConfigValidationError(format!(
                "PriorityThresholds: wage_change_pct must be positive, got {}",
                self.wage_change_pct
            )));
        }
        if self.lead_time_hours <= 0 {
            return Err(ProcessingError::ConfigValidationError(format!(
                "PriorityThresholds: lead_time_hours must be positive, got {}",
                self.lead_time_hours
            )));
        }
        Ok(())
    }
}

/// Loads and parses the batch configuration YAML file.
pub fn load_batch_config<P: AsRef<Path>>(config_path: P) -> Result<BatchConfig> {
    let path_ref = config_path.as_ref();
    let config_content = fs::read_to_string(path_ref).map_err(|e| {
        ProcessingError::ConfigError(format!(
            "Failed to read batch config file '{}': {}",
            path_ref.display(),
            e
        ))
    })?;

    let config: BatchConfig = serde_yaml::from_str(&config_content).map_err(|e| {
        ProcessingError::ConfigError(format!(
            "Failed to parse batch config YAML from '{}': {}",
            path_ref.display(),
            e
        ))
    })?;

    config.validate()?; // Validate the loaded configuration

    Ok(config)
}
