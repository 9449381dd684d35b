//! Batch orchestration: fans a list of entity ids out to the analysis
//! service with bounded concurrency, classifies the returned
//! recommendations, and aggregates everything into a `BatchJob`.
//!
//! Entities are processed in chunks of `max_concurrent`. Chunks run strictly
//! one after another; inside a chunk every entity is an independent task and
//! a failing task never cancels its siblings. The circuit breaker and the
//! job's result map are only touched at the sequential chunk-commit
//! boundary, so a single running job needs no extra locking around them.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use itertools::Itertools;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::classification::classifier::RecommendationClassifier;
use crate::client::analysis::AnalysisClient;
use crate::config::BatchConfig;
use crate::data_model::{
    AnalysisResponse, AnalysisType, BatchJob, Category, ClassificationResult, JobSummary,
    Priority, ProcessingResult, ProcessingStatus, ProcessingTimePercentiles,
};
use crate::error::{ProcessingError, Result};
use crate::utils::prometheus_metrics::{
    ACTIVE_ENTITY_TASKS, ANALYSIS_RETRIES_TOTAL, ENTITIES_COMPLETED_TOTAL, ENTITIES_FAILED_TOTAL,
    ENTITY_PROCESSING_DURATION_SECONDS,
};
use crate::utils::text::csv_escape;

/// Point-in-time view of a running (or finished) job, served to status
/// queries while the job itself is still owned by the processing loop.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobStatus {
    pub job_id: Uuid,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// processed / total * 100
    pub progress: f64,
    pub finished: bool,
}

/// Shared registry of job snapshots. Cloned handles all see the same map;
/// queries may race a running job, hence the RwLock.
#[derive(Clone, Default)]
pub struct JobTracker {
    jobs: Arc<RwLock<HashMap<Uuid, JobStatus>>>,
}

impl JobTracker {
    pub fn new() -> Self {
        JobTracker::default()
    }

    async fn record(&self, job: &BatchJob, finished: bool) {
        let snapshot = JobStatus {
            job_id: job.job_id,
            total: job.total_entities(),
            completed: job.completed_count(),
            failed: job.failed_count(),
            progress: job.progress_percentage(),
            finished,
        };
        self.jobs.write().await.insert(job.job_id, snapshot);
    }

    pub async fn get(&self, job_id: &Uuid) -> Option<JobStatus> {
        self.jobs.read().await.get(job_id).cloned()
    }

    pub async fn snapshot_all(&self) -> Vec<JobStatus> {
        self.jobs.read().await.values().cloned().collect()
    }
}

/// Orchestrates batch processing of entity analyses.
pub struct BatchProcessor {
    analysis_client: Arc<dyn AnalysisClient>,
    classifier: Arc<RecommendationClassifier>,
    config: BatchConfig,
    tracker: JobTracker,
}

impl BatchProcessor {
    pub fn new(
        analysis_client: Arc<dyn AnalysisClient>,
        classifier: Arc<RecommendationClassifier>,
        config: BatchConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(BatchProcessor {
            analysis_client,
            classifier,
            config,
            tracker: JobTracker::new(),
        })
    }

    /// Handle for querying job progress concurrently with a running batch.
    pub fn job_tracker(&self) -> JobTracker {
        self.tracker.clone()
    }

    pub async fn get_job_status(&self, job_id: &Uuid) -> Option<JobStatus> {
        self.tracker.get(job_id).await
    }

    /// Process a batch of entities through analysis and classification.
    ///
    /// Only configuration problems (empty/duplicate entity list, invalid
    /// override config) are returned as errors; per-entity failures end up
    /// in that entity's `ProcessingResult` inside the returned job.
    pub async fn process_batch(
        &self,
        entity_ids: Vec<String>,
        analysis_type: AnalysisType,
        config_override: Option<BatchConfig>,
    ) -> Result<BatchJob> {
        if entity_ids.is_empty() {
            return Err(ProcessingError::ConfigValidationError(
                "process_batch: entity list cannot be empty".to_string(),
            ));
        }
        if entity_ids.iter().duplicates().next().is_some() {
            return Err(ProcessingError::ConfigValidationError(
                "process_batch: entity list contains duplicate ids".to_string(),
            ));
        }
        let config = match config_override {
            Some(config) => {
                config.validate()?;
                config
            }
            None => self.config.clone(),
        };

        let mut job = BatchJob::new(entity_ids, analysis_type, config.clone());
        let job_span = info_span!("batch_job", job_id = %job.job_id);

        async {
            info!(
                entities = job.total_entities(),
                %analysis_type,
                "Starting batch job"
            );
            self.tracker.record(&job, false).await;

            self.process_chunks(&mut job, &config).await;

            job.summary = Some(generate_summary(&job));
            self.tracker.record(&job, true).await;

            info!(
                completed = job.completed_count(),
                failed = job.failed_count(),
                "Batch job finished"
            );
        }
        .instrument(job_span)
        .await;

        Ok(job)
    }

    /// Run all chunks sequentially, committing results and breaker updates
    /// at each chunk boundary.
    async fn process_chunks(&self, job: &mut BatchJob, config: &BatchConfig) {
        let mut breaker = super::circuit_breaker::CircuitBreaker::new(
            config.circuit_breaker_threshold,
            Duration::from_secs(config.circuit_breaker_cooldown_secs),
        );

        let entity_ids = job.entity_ids.clone();
        let analysis_type = job.analysis_type;
        let chunk_count = entity_ids.len().div_ceil(config.max_concurrent);

        for (chunk_index, chunk) in entity_ids.chunks(config.max_concurrent).enumerate() {
            // Suspend until an open breaker cools down, then close it.
            if let Some(wait) = breaker.remaining_cooldown() {
                warn!(
                    wait_secs = wait.as_secs_f64(),
                    "Circuit breaker open, pausing before next chunk"
                );
                sleep(wait).await;
                breaker.reset();
            }

            // One concurrent task per entity; completion order is recorded
            // as-is, and a failure is just a FAILED result, never a
            // cancellation of the siblings.
            let mut tasks: FuturesUnordered<_> = chunk
                .iter()
                .map(|entity_id| self.process_single_entity(entity_id.clone(), analysis_type, config))
                .collect();

            let mut outcomes = Vec::with_capacity(chunk.len());
            while let Some(result) = tasks.next().await {
                outcomes.push(result);
            }
            drop(tasks);

            for result in outcomes {
                if result.status == ProcessingStatus::Failed {
                    breaker.record_failure();
                    ENTITIES_FAILED_TOTAL.inc();
                } else {
                    breaker.record_success();
                    ENTITIES_COMPLETED_TOTAL.inc();
                }
                job.results.insert(result.entity_id.clone(), result);
            }

            self.tracker.record(job, false).await;

            // Brief pause between chunks to avoid overloading the service.
            if chunk_index + 1 < chunk_count && config.chunk_delay_ms > 0 {
                sleep(Duration::from_millis(config.chunk_delay_ms)).await;
            }
        }
    }

    /// Drive one entity through the full pipeline. Infallible by design:
    /// every failure is folded into the returned `ProcessingResult`.
    async fn process_single_entity(
        &self,
        entity_id: String,
        analysis_type: AnalysisType,
        config: &BatchConfig,
    ) -> ProcessingResult {
        ACTIVE_ENTITY_TASKS.inc();
        let timer = ENTITY_PROCESSING_DURATION_SECONDS.start_timer();
        let started = Instant::now();

        let mut result = ProcessingResult::pending(entity_id.clone());
        result.started_at = Some(Utc::now());
        result.status = ProcessingStatus::Analyzing;

        match self
            .analyze_with_retry(&entity_id, analysis_type, config, &mut result)
            .await
        {
            Ok(analysis) => {
                result.status = ProcessingStatus::Classifying;
                let classifications = self
                    .classify_recommendations(&entity_id, &analysis)
                    .await;
                result.analysis = Some(analysis);
                result.classifications = classifications;
                result.status = ProcessingStatus::Completed;
            }
            Err(e) => {
                error!(entity_id = %entity_id, error = %e, "Entity processing failed");
                result.status = ProcessingStatus::Failed;
                result.error = Some(e.to_string());
            }
        }

        result.completed_at = Some(Utc::now());
        result.processing_time = Some(started.elapsed().as_secs_f64());

        timer.observe_duration();
        ACTIVE_ENTITY_TASKS.dec();

        result
    }

    /// Analysis call with an explicit bounded exponential-backoff retry loop:
    /// the nth retry waits `backoff_base * 2^(n-1)`.
    async fn analyze_with_retry(
        &self,
        entity_id: &str,
        analysis_type: AnalysisType,
        config: &BatchConfig,
        result: &mut ProcessingResult,
    ) -> Result<AnalysisResponse> {
        let mut last_error: Option<ProcessingError> = None;

        for attempt in 1..=config.max_retries {
            if attempt > 1 {
                result.status = ProcessingStatus::Retrying;
                result.retry_count = attempt - 1;
                ANALYSIS_RETRIES_TOTAL.inc();

                let delay =
                    Duration::from_millis(config.backoff_base_ms * 2u64.pow(attempt - 2));
                warn!(
                    entity_id,
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    "Retrying analysis after backoff"
                );
                sleep(delay).await;
                result.status = ProcessingStatus::Analyzing;
            }

            match self.analysis_client.analyze(entity_id, analysis_type).await {
                Ok(analysis) => return Ok(analysis),
                Err(e) => {
                    warn!(entity_id, attempt, error = %e, "Analysis attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ProcessingError::Unexpected("analysis retries exhausted without error".to_string())
        }))
    }

    /// Classification never fails an entity: any internal problem degrades to
    /// an empty classification list.
    async fn classify_recommendations(
        &self,
        entity_id: &str,
        analysis: &AnalysisResponse,
    ) -> Vec<ClassificationResult> {
        if analysis.recommendations.is_empty() {
            return Vec::new();
        }
        let classifications = self
            .classifier
            .classify_all(analysis.recommendations.clone())
            .await;
        tracing::debug!(
            entity_id,
            count = classifications.len(),
            "Classified recommendations"
        );
        classifications
    }
}

/// Compute the job summary: category counts, high-priority count, completion
/// rate and processing-time statistics.
pub fn generate_summary(job: &BatchJob) -> JobSummary {
    let completed_results: Vec<&ProcessingResult> = job
        .results
        .values()
        .filter(|r| r.status == ProcessingStatus::Completed)
        .collect();

    let all_classifications: Vec<&ClassificationResult> = completed_results
        .iter()
        .flat_map(|r| r.classifications.iter())
        .collect();

    let recommendations_by_category: BTreeMap<Category, usize> = all_classifications
        .iter()
        .map(|c| c.category)
        .counts()
        .into_iter()
        .collect();

    let high_priority_actions = all_classifications
        .iter()
        .filter(|c| c.priority == Priority::High)
        .count();

    let mut times: Vec<f64> = job
        .results
        .values()
        .filter_map(|r| r.processing_time)
        .collect();
    times.sort_by(|a, b| a.total_cmp(b));

    let total_processing_time: f64 = times.iter().sum();
    let average_processing_time = if times.is_empty() {
        0.0
    } else {
        total_processing_time / times.len() as f64
    };

    let completed = job.completed_count();
    let failed = job.failed_count();
    let total = job.total_entities();

    JobSummary {
        total_entities: total,
        completed,
        failed,
        total_recommendations: all_classifications.len(),
        high_priority_actions,
        recommendations_by_category,
        completion_rate: if total == 0 {
            100.0
        } else {
            completed as f64 / total as f64 * 100.0
        },
        average_processing_time,
        total_processing_time,
        processing_time_percentiles: ProcessingTimePercentiles {
            p50: percentile(&times, 50.0),
            p90: percentile(&times, 90.0),
            p99: percentile(&times, 99.0),
        },
    }
}

/// Nearest-rank percentile over an already sorted slice.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = (pct / 100.0 * (sorted.len() - 1) as f64).round() as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// All (entity, classification) pairs from completed entities, sorted by
/// priority rank then confidence, both descending. Ties keep the original
/// entity/recommendation order (the sort is stable).
pub fn prioritized_actions(
    job: &BatchJob,
    top_n: Option<usize>,
) -> Vec<(&str, &ClassificationResult)> {
    let mut actions: Vec<(&str, &ClassificationResult)> = job
        .entity_ids
        .iter()
        .filter_map(|id| job.results.get(id))
        .filter(|r| r.status == ProcessingStatus::Completed)
        .flat_map(|r| {
            r.classifications
                .iter()
                .map(|c| (r.entity_id.as_str(), c))
        })
        .collect();

    actions.sort_by(|a, b| {
        b.1.priority
            .rank()
            .cmp(&a.1.priority.rank())
            .then(b.1.confidence.total_cmp(&a.1.confidence))
    });

    match top_n {
        Some(n) => actions.into_iter().take(n).collect(),
        None => actions,
    }
}

/// Supported export representations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = ProcessingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(ProcessingError::ConfigValidationError(format!(
                "Unsupported export format '{}' (expected json|csv)",
                other
            ))),
        }
    }
}

const CSV_HEADER: &str =
    "entity_id,status,category,priority,confidence,specific_action,processing_time,error";

/// Serialize a finished job. JSON carries the whole job including the
/// summary; CSV emits one row per classification with a fixed column set,
/// and entities without classifications still get one (mostly blank) row.
pub fn export_job(job: &BatchJob, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(job)?),
        ExportFormat::Csv => {
            let mut lines = vec![CSV_HEADER.to_string()];
            for entity_id in &job.entity_ids {
                let Some(result) = job.results.get(entity_id) else {
                    continue;
                };
                let time_field = result
                    .processing_time
                    .map(|t| format!("{:.3}", t))
                    .unwrap_or_default();
                let error_field = result.error.as_deref().unwrap_or_default();

                if result.classifications.is_empty() {
                    lines.push(format!(
                        "{},{},,,,,{},{}",
                        csv_escape(entity_id),
                        result.status,
                        time_field,
                        csv_escape(error_field),
                    ));
                } else {
                    for classification in &result.classifications {
                        lines.push(format!(
                            "{},{},{},{},{:.3},{},{},{}",
                            csv_escape(entity_id),
                            result.status,
                            classification.category,
                            classification.priority,
                            classification.confidence,
                            csv_escape(&classification.specific_action),
                            time_field,
                            csv_escape(error_field),
                        ));
                    }
                }
            }
            lines.push(String::new()); // trailing newline
            Ok(lines.join("\n"))
        }
    }
}
