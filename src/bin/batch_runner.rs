// src/bin/batch_runner.rs

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use RecTriage::classification::classifier::RecommendationClassifier;
use RecTriage::client::analysis::HttpAnalysisClient;
use RecTriage::client::escalation::HttpEscalationClient;
use RecTriage::config::cli::Args;
use RecTriage::config::rules::{default_rules, load_rules_config};
use RecTriage::config::{load_batch_config, BatchConfig};
use RecTriage::data_model::AnalysisType;
use RecTriage::pipeline::batch_processor::{export_job, prioritized_actions, ExportFormat};
use RecTriage::BatchProcessor;

// Axum handler for /metrics
async fn metrics_handler() -> (axum::http::StatusCode, String) {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!("Could not encode prometheus metrics: {}", e);
        return (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            format!("Could not encode prometheus metrics: {}", e),
        );
    }
    match String::from_utf8(buffer) {
        Ok(s) => (axum::http::StatusCode::OK, s),
        Err(e) => {
            error!("Prometheus metrics UTF-8 error: {}", e);
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                format!("Prometheus metrics UTF-8 error: {}", e),
            )
        }
    }
}

/// Entity ids from --entities plus --entities-file, in that order.
fn collect_entity_ids(args: &Args) -> anyhow::Result<Vec<String>> {
    let mut entity_ids: Vec<String> = args
        .entities
        .iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();

    if let Some(path) = &args.entities_file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read entities file '{}'", path.display()))?;
        entity_ids.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(String::from),
        );
    }

    Ok(entity_ids)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing subscriber
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(filter).init();

    // --- Optional: Start Metrics Endpoint ---
    if let Some(port) = args.metrics_port {
        let app = axum::Router::new().route("/metrics", axum::routing::get(metrics_handler));
        let listener_addr = format!("0.0.0.0:{}", port);
        info!(
            "Metrics endpoint will be available at http://{}/metrics",
            listener_addr
        );

        tokio::spawn(async move {
            match tokio::net::TcpListener::bind(&listener_addr).await {
                Ok(listener) => {
                    if let Err(e) = axum::serve(listener, app).await {
                        error!("Metrics server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to bind metrics server to {}: {}", listener_addr, e);
                }
            }
        });
    }

    // Load configuration (defaults when no files are given)
    let batch_config: BatchConfig = match &args.batch_config {
        Some(path) => load_batch_config(path)?,
        None => BatchConfig::default(),
    };
    let rules = match &args.rules_config {
        Some(path) => load_rules_config(path)?,
        None => default_rules(),
    };

    if args.validate_config {
        info!("Configuration files are valid.");
        return Ok(());
    }

    let analysis_type: AnalysisType = args.analysis_type.parse().map_err(anyhow::Error::msg)?;
    let format: ExportFormat = args.format.parse()?;
    let entity_ids = collect_entity_ids(&args)?;
    let total = entity_ids.len();

    info!(
        entities = total,
        %analysis_type,
        base_url = %args.base_url,
        "Batch runner starting"
    );

    // Build the collaborators
    let timeout = Duration::from_secs(batch_config.request_timeout_secs);
    let analysis_client = Arc::new(HttpAnalysisClient::new(
        &args.base_url,
        &args.api_key,
        timeout,
    )?);

    let mut classifier = RecommendationClassifier::new(rules, &batch_config);
    if let Some(url) = &args.escalation_url {
        classifier =
            classifier.with_escalation(Arc::new(HttpEscalationClient::new(url, &args.api_key, timeout)?));
        info!(escalation_url = %url, "Escalation classifier enabled");
    }

    let processor = BatchProcessor::new(analysis_client, Arc::new(classifier), batch_config)?;

    // Progress bar fed from the job tracker while the batch runs
    let progress = ProgressBar::new(total as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} entities ({elapsed})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let tracker = processor.job_tracker();
    let progress_bar = progress.clone();
    let progress_task = tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let snapshots = tracker.snapshot_all().await;
            if let Some(status) = snapshots.first() {
                progress_bar.set_position((status.completed + status.failed) as u64);
                if status.finished {
                    break;
                }
            }
        }
    });

    let job = processor
        .process_batch(entity_ids, analysis_type, None)
        .await?;

    progress_task.abort();
    progress.finish_and_clear();

    if let Some(summary) = &job.summary {
        info!(
            completed = summary.completed,
            failed = summary.failed,
            recommendations = summary.total_recommendations,
            high_priority = summary.high_priority_actions,
            completion_rate = %format!("{:.1}%", summary.completion_rate),
            "Batch complete"
        );
    }

    if args.top_actions > 0 {
        for (rank, (entity_id, classification)) in prioritized_actions(&job, Some(args.top_actions))
            .into_iter()
            .enumerate()
        {
            info!(
                rank = rank + 1,
                entity_id,
                category = %classification.category,
                priority = %classification.priority,
                confidence = %format!("{:.3}", classification.confidence),
                action = %classification.specific_action,
                "Prioritized action"
            );
        }
    }

    let exported = export_job(&job, format)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, &exported)
                .with_context(|| format!("Failed to write output to '{}'", path.display()))?;
            info!(path = %path.display(), "Results written");
        }
        None => println!("{}", exported),
    }

    Ok(())
}
