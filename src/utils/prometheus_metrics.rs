// src/utils/prometheus_metrics.rs

use once_cell::sync::Lazy;
use prometheus::{register_counter, register_gauge, register_histogram, Counter, Gauge, Histogram};

// Metrics from the batch orchestrator
pub static ENTITIES_COMPLETED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "batch_entities_completed_total",
        "Total number of entities processed to COMPLETED."
    )
    .expect("Failed to register batch_entities_completed_total counter")
});

pub static ENTITIES_FAILED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "batch_entities_failed_total",
        "Total number of entities that ended FAILED after exhausting retries."
    )
    .expect("Failed to register batch_entities_failed_total counter")
});

pub static ANALYSIS_RETRIES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "batch_analysis_retries_total",
        "Total number of analysis retry attempts across all entities."
    )
    .expect("Failed to register batch_analysis_retries_total counter")
});

pub static CIRCUIT_BREAKER_OPENS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "batch_circuit_breaker_opens_total",
        "Total number of times the circuit breaker opened."
    )
    .expect("Failed to register batch_circuit_breaker_opens_total counter")
});

pub static ENTITY_PROCESSING_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "batch_entity_processing_duration_seconds",
        "Histogram of per-entity processing durations (analysis through classification)."
    )
    .expect("Failed to register batch_entity_processing_duration_seconds histogram")
});

pub static ACTIVE_ENTITY_TASKS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "batch_active_entity_tasks",
        "Number of entities currently being processed concurrently."
    )
    .expect("Failed to register batch_active_entity_tasks gauge")
});

// Metrics from the classifier
pub static CLASSIFICATIONS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "classifier_classifications_total",
        "Total number of recommendations classified."
    )
    .expect("Failed to register classifier_classifications_total counter")
});

pub static ESCALATION_CALLS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "classifier_escalation_calls_total",
        "Total number of escalations to the external text-classification capability."
    )
    .expect("Failed to register classifier_escalation_calls_total counter")
});

pub static ESCALATION_DISCARDED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "classifier_escalation_discarded_total",
        "Total number of escalation responses discarded as malformed or failed."
    )
    .expect("Failed to register classifier_escalation_discarded_total counter")
});
