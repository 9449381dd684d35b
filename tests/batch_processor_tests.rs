// tests/batch_processor_tests.rs

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;

use RecTriage::classification::classifier::RecommendationClassifier;
use RecTriage::client::analysis::AnalysisClient;
use RecTriage::config::rules::default_rules;
use RecTriage::config::BatchConfig;
use RecTriage::data_model::{AnalysisResponse, AnalysisType, Category, Priority, ProcessingStatus};
use RecTriage::error::{ProcessingError, Result};
use RecTriage::pipeline::batch_processor::{
    export_job, prioritized_actions, ExportFormat,
};
use RecTriage::BatchProcessor;

/// Stub analysis client with per-entity scripted behavior and call counting.
struct StubAnalysisClient {
    /// Entities that fail on every attempt.
    always_fail: HashSet<String>,
    /// Entities that fail this many times before succeeding.
    fail_first_attempts: HashMap<String, u32>,
    /// Recommendations returned per entity (missing => empty list).
    recommendations: HashMap<String, Vec<String>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl StubAnalysisClient {
    fn new() -> Self {
        StubAnalysisClient {
            always_fail: HashSet::new(),
            fail_first_attempts: HashMap::new(),
            recommendations: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn with_recommendations(mut self, entity_id: &str, recs: &[&str]) -> Self {
        self.recommendations.insert(
            entity_id.to_string(),
            recs.iter().map(|r| r.to_string()).collect(),
        );
        self
    }

    fn with_always_failing(mut self, entity_id: &str) -> Self {
        self.always_fail.insert(entity_id.to_string());
        self
    }

    fn with_transient_failures(mut self, entity_id: &str, failures: u32) -> Self {
        self.fail_first_attempts.insert(entity_id.to_string(), failures);
        self
    }

    fn call_count(&self, entity_id: &str) -> u32 {
        *self.calls.lock().unwrap().get(entity_id).unwrap_or(&0)
    }
}

#[async_trait]
impl AnalysisClient for StubAnalysisClient {
    async fn analyze(
        &self,
        entity_id: &str,
        analysis_type: AnalysisType,
    ) -> Result<AnalysisResponse> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            let counter = calls.entry(entity_id.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };

        if self.always_fail.contains(entity_id) {
            return Err(ProcessingError::TransientNetwork(format!(
                "injected failure for {}",
                entity_id
            )));
        }
        if let Some(failures) = self.fail_first_attempts.get(entity_id) {
            if attempt <= *failures {
                return Err(ProcessingError::Service {
                    status: 503,
                    message: format!("temporary outage (attempt {})", attempt),
                });
            }
        }

        Ok(AnalysisResponse {
            entity_id: entity_id.to_string(),
            analysis_type,
            recommendations: self
                .recommendations
                .get(entity_id)
                .cloned()
                .unwrap_or_default(),
            fill_rate: Some(0.72),
            risk_level: Some("MEDIUM".to_string()),
            timestamp: chrono::Utc::now(),
        })
    }
}

/// Small delays so the retry/backoff machinery is exercised without slowing
/// the suite down.
fn fast_config() -> BatchConfig {
    BatchConfig {
        max_concurrent: 4,
        max_retries: 2,
        backoff_base_ms: 5,
        circuit_breaker_threshold: 5,
        circuit_breaker_cooldown_secs: 1,
        chunk_delay_ms: 0,
        ..BatchConfig::default()
    }
}

fn build_processor(client: StubAnalysisClient, config: BatchConfig) -> (Arc<StubAnalysisClient>, BatchProcessor) {
    let client = Arc::new(client);
    let classifier = Arc::new(RecommendationClassifier::new(default_rules(), &config));
    let processor = BatchProcessor::new(client.clone(), classifier, config)
        .expect("config should be valid");
    (client, processor)
}

fn entity_ids(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("entity-{:02}", i)).collect()
}

#[tokio::test]
async fn test_partial_failures_do_not_abort_job() {
    // Spec example: 10 entities, 2 exhaust retries -> completed=8, failed=2,
    // and with 2 < threshold 5 the breaker never opens.
    let mut client = StubAnalysisClient::new();
    for id in entity_ids(10) {
        client = client.with_recommendations(&id, &["Expand radius to 30 miles"]);
    }
    client = client
        .with_always_failing("entity-03")
        .with_always_failing("entity-04");

    let (client, processor) = build_processor(client, fast_config());
    let job = processor
        .process_batch(entity_ids(10), AnalysisType::Past, None)
        .await
        .expect("job should run");

    assert_eq!(job.completed_count(), 8);
    assert_eq!(job.failed_count(), 2);
    assert_eq!(job.completed_count() + job.failed_count(), job.total_entities());
    assert_eq!(job.progress_percentage(), 100.0);

    let failed = &job.results["entity-03"];
    assert_eq!(failed.status, ProcessingStatus::Failed);
    assert!(failed.error.as_deref().unwrap().contains("injected failure"));
    assert_eq!(failed.retry_count, 1); // one retry after the first attempt
    assert_eq!(client.call_count("entity-03"), 2); // attempts == max_retries

    // Completed entities keep their results regardless of sibling failures.
    let completed = &job.results["entity-05"];
    assert_eq!(completed.status, ProcessingStatus::Completed);
    assert_eq!(completed.classifications.len(), 1);
}

#[tokio::test]
async fn test_zero_recommendations_still_completes() {
    let client = StubAnalysisClient::new(); // no scripted recs => empty lists
    let (_, processor) = build_processor(client, fast_config());

    let job = processor
        .process_batch(vec!["quiet-entity".to_string()], AnalysisType::Past, None)
        .await
        .expect("job should run");

    let result = &job.results["quiet-entity"];
    assert_eq!(result.status, ProcessingStatus::Completed);
    assert!(result.classifications.is_empty());
    assert!(result.error.is_none());

    let summary = job.summary.as_ref().expect("summary should be attached");
    assert_eq!(summary.high_priority_actions, 0);
    assert_eq!(summary.total_recommendations, 0);
    assert_eq!(summary.completion_rate, 100.0);
}

#[tokio::test]
async fn test_transient_failure_recovers_via_retry() {
    let client = StubAnalysisClient::new()
        .with_recommendations("flaky", &["Post shifts 48 hours earlier"])
        .with_transient_failures("flaky", 1);

    let (client, processor) = build_processor(client, fast_config());
    let job = processor
        .process_batch(vec!["flaky".to_string()], AnalysisType::Risk, None)
        .await
        .expect("job should run");

    let result = &job.results["flaky"];
    assert_eq!(result.status, ProcessingStatus::Completed);
    assert_eq!(result.retry_count, 1);
    assert_eq!(client.call_count("flaky"), 2);
    assert_eq!(result.classifications.len(), 1);
    assert_eq!(result.classifications[0].category, Category::LeadTime);
}

#[tokio::test]
async fn test_attempts_never_exceed_max_retries() {
    let client = StubAnalysisClient::new().with_always_failing("doomed");
    let mut config = fast_config();
    config.max_retries = 3;

    let (client, processor) = build_processor(client, config);
    let job = processor
        .process_batch(vec!["doomed".to_string()], AnalysisType::Past, None)
        .await
        .expect("job should run");

    assert_eq!(job.results["doomed"].status, ProcessingStatus::Failed);
    assert_eq!(client.call_count("doomed"), 3);
    assert_eq!(job.results["doomed"].retry_count, 2);
}

#[tokio::test]
async fn test_empty_entity_list_is_config_error() {
    let (_, processor) = build_processor(StubAnalysisClient::new(), fast_config());
    let result = processor
        .process_batch(Vec::new(), AnalysisType::Past, None)
        .await;
    assert!(matches!(
        result,
        Err(ProcessingError::ConfigValidationError(_))
    ));
}

#[tokio::test]
async fn test_duplicate_entity_ids_are_config_error() {
    let (_, processor) = build_processor(StubAnalysisClient::new(), fast_config());
    let result = processor
        .process_batch(
            vec!["same".to_string(), "same".to_string()],
            AnalysisType::Past,
            None,
        )
        .await;
    assert!(matches!(
        result,
        Err(ProcessingError::ConfigValidationError(_))
    ));
}

#[tokio::test]
async fn test_invalid_config_override_is_rejected() {
    let (_, processor) = build_processor(StubAnalysisClient::new(), fast_config());
    let bad = BatchConfig {
        max_concurrent: 0,
        ..BatchConfig::default()
    };
    let result = processor
        .process_batch(vec!["e".to_string()], AnalysisType::Past, Some(bad))
        .await;
    assert!(matches!(
        result,
        Err(ProcessingError::ConfigValidationError(_))
    ));
}

#[tokio::test]
async fn test_circuit_breaker_pause_between_chunks() {
    // 6 always-failing entities in chunks of 2 with threshold 3: the breaker
    // opens mid-run, so a later chunk must wait out the 1s cooldown. The job
    // still finishes with every entity accounted for.
    let mut client = StubAnalysisClient::new();
    for id in entity_ids(6) {
        client = client.with_always_failing(&id);
    }
    let mut config = fast_config();
    config.max_concurrent = 2;
    config.max_retries = 1;
    config.circuit_breaker_threshold = 3;
    config.circuit_breaker_cooldown_secs = 1;

    let (_, processor) = build_processor(client, config);
    let started = Instant::now();
    let job = processor
        .process_batch(entity_ids(6), AnalysisType::Past, None)
        .await
        .expect("job should run");

    assert_eq!(job.failed_count(), 6);
    assert_eq!(job.completed_count() + job.failed_count(), 6);
    assert!(
        started.elapsed().as_millis() >= 900,
        "expected the open breaker to pause chunk starts"
    );
}

#[tokio::test]
async fn test_summary_statistics() {
    let client = StubAnalysisClient::new()
        .with_recommendations(
            "alpha",
            &[
                "Increase pay from $15.00 to $18.50 to improve fill rate",
                "Expand radius to 30 miles",
            ],
        )
        .with_recommendations("beta", &["Urgent: call worker 99887 about reliability"]);

    let (_, processor) = build_processor(client, fast_config());
    let job = processor
        .process_batch(
            vec!["alpha".to_string(), "beta".to_string()],
            AnalysisType::Past,
            None,
        )
        .await
        .expect("job should run");

    let summary = job.summary.as_ref().expect("summary should be attached");
    assert_eq!(summary.total_entities, 2);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.total_recommendations, 3);
    assert_eq!(
        summary.recommendations_by_category.get(&Category::WageAdjustment),
        Some(&1)
    );
    assert_eq!(
        summary.recommendations_by_category.get(&Category::GeographicExpansion),
        Some(&1)
    );
    // The wage jump (>20%) and the urgent worker call are both HIGH.
    assert_eq!(summary.high_priority_actions, 2);
    assert_eq!(summary.completion_rate, 100.0);
    assert!(summary.processing_time_percentiles.p99 >= summary.processing_time_percentiles.p50);
    assert!(summary.average_processing_time >= 0.0);
}

#[tokio::test]
async fn test_prioritized_actions_ordering_and_top_n() {
    let client = StubAnalysisClient::new()
        .with_recommendations("alpha", &["Expand radius to 30 miles"])
        .with_recommendations(
            "beta",
            &["Increase pay from $15.00 to $18.50 to improve fill rate"],
        );

    let (_, processor) = build_processor(client, fast_config());
    let job = processor
        .process_batch(
            vec!["alpha".to_string(), "beta".to_string()],
            AnalysisType::Past,
            None,
        )
        .await
        .expect("job should run");

    let actions = prioritized_actions(&job, None);
    assert_eq!(actions.len(), 2);
    // The HIGH priority wage adjustment sorts ahead of the MEDIUM expansion.
    assert_eq!(actions[0].0, "beta");
    assert_eq!(actions[0].1.priority, Priority::High);
    assert_eq!(actions[1].0, "alpha");

    let top_one = prioritized_actions(&job, Some(1));
    assert_eq!(top_one.len(), 1);
    assert_eq!(top_one[0].0, "beta");
}

#[tokio::test]
async fn test_export_csv_has_fixed_columns() {
    let client = StubAnalysisClient::new()
        .with_recommendations(
            "good",
            &["Increase pay from $15.00 to $18.50 to improve fill rate"],
        )
        .with_always_failing("bad");

    let (_, processor) = build_processor(client, fast_config());
    let job = processor
        .process_batch(
            vec!["good".to_string(), "bad".to_string()],
            AnalysisType::Past,
            None,
        )
        .await
        .expect("job should run");

    let csv = export_job(&job, ExportFormat::Csv).expect("csv export");
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(
        lines[0],
        "entity_id,status,category,priority,confidence,specific_action,processing_time,error"
    );
    // One row per classification plus one blank-ish row for the failed entity.
    assert_eq!(lines.len(), 3);

    let good_row = lines.iter().find(|l| l.starts_with("good,")).unwrap();
    assert!(good_row.contains(",completed,"));
    assert!(good_row.contains("wage_adjustment"));
    assert!(good_row.contains("HIGH"));
    assert!(good_row.contains("Update wage from $15 to $18.5"));

    let bad_row = lines.iter().find(|l| l.starts_with("bad,")).unwrap();
    assert!(bad_row.contains(",failed,"));
    assert!(bad_row.contains("injected failure"));
    // Category/priority/confidence/action columns stay empty on failures.
    assert!(bad_row.contains(",,,,"));
}

#[tokio::test]
async fn test_export_json_contains_summary_and_results() {
    let client =
        StubAnalysisClient::new().with_recommendations("solo", &["Expand radius to 30 miles"]);
    let (_, processor) = build_processor(client, fast_config());
    let job = processor
        .process_batch(vec!["solo".to_string()], AnalysisType::Past, None)
        .await
        .expect("job should run");

    let json = export_job(&job, ExportFormat::Json).expect("json export");
    let value: serde_json::Value = serde_json::from_str(&json).expect("valid JSON");
    assert_eq!(value["job_id"], serde_json::json!(job.job_id.to_string()));
    assert_eq!(value["results"]["solo"]["status"], "completed");
    assert_eq!(value["summary"]["completed"], 1);
    assert_eq!(
        value["results"]["solo"]["classifications"][0]["category"],
        "geographic_expansion"
    );
}

#[tokio::test]
async fn test_job_tracker_reports_progress_and_finish() {
    let client =
        StubAnalysisClient::new().with_recommendations("tracked", &["Expand radius to 30 miles"]);
    let (_, processor) = build_processor(client, fast_config());
    let job = processor
        .process_batch(vec!["tracked".to_string()], AnalysisType::Past, None)
        .await
        .expect("job should run");

    let status = processor
        .get_job_status(&job.job_id)
        .await
        .expect("job should be tracked");
    assert!(status.finished);
    assert_eq!(status.total, 1);
    assert_eq!(status.completed, 1);
    assert_eq!(status.failed, 0);
    assert_eq!(status.progress, 100.0);
}

#[tokio::test]
async fn test_unsupported_export_format_parse_fails() {
    assert!("json".parse::<ExportFormat>().is_ok());
    assert!("CSV".parse::<ExportFormat>().is_ok());
    assert!("xml".parse::<ExportFormat>().is_err());
}
