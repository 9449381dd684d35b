use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::data_model::{AnalysisResponse, AnalysisType};
use crate::error::{ProcessingError, Result};

/// Boundary to the upstream analysis service. One call per entity; any error
/// is treated by the orchestrator as retryable up to its attempt budget.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyze(&self, entity_id: &str, analysis_type: AnalysisType)
        -> Result<AnalysisResponse>;
}

#[derive(serde::Serialize)]
struct AnalyzeRequest<'a> {
    entity_id: &'a str,
    analysis_type: AnalysisType,
}

/// reqwest-backed client for the analysis service. The per-request timeout is
/// enforced here; a timeout surfaces as a transient error and takes the same
/// retry path as any other failure.
pub struct HttpAnalysisClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpAnalysisClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| {
                ProcessingError::ConfigError(format!("Invalid API key for auth header: {}", e))
            })?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| {
                ProcessingError::ConfigError(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(HttpAnalysisClient {
            http,
            endpoint: format!("{}/analysis/run", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl AnalysisClient for HttpAnalysisClient {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn analyze(
        &self,
        entity_id: &str,
        analysis_type: AnalysisType,
    ) -> Result<AnalysisResponse> {
        let request = AnalyzeRequest {
            entity_id,
            analysis_type,
        };

        let response = self.http.post(&self.endpoint).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProcessingError::Service {
                status: status.as_u16(),
                message: if body.is_empty() {
                    status.to_string()
                } else {
                    body
                },
            });
        }

        let analysis: AnalysisResponse = response.json().await?;
        debug!(
            entity_id,
            recommendations = analysis.recommendations.len(),
            "Received analysis response"
        );
        Ok(analysis)
    }
}
