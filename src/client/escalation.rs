use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::{ProcessingError, Result};

/// Boundary to the external text-classification capability used as a
/// fallback when heuristic confidence is low. Implementations return the raw
/// constrained-format line; parsing (and tolerance of malformed output) lives
/// in the classifier, which discards anything it cannot read.
#[async_trait]
pub trait EscalationClient: Send + Sync {
    async fn classify(&self, prompt: &str) -> Result<String>;
}

/// Builds the constrained-format prompt embedding the candidate text and the
/// fixed category taxonomy.
pub fn build_escalation_prompt(text: &str) -> String {
    format!(
        "Classify this recommendation into one of these categories:\n\
         - WAGE_ADJUSTMENT: Pay rate changes, pricing adjustments\n\
         - LEAD_TIME: Posting shifts earlier, advance notice\n\
         - GEOGRAPHIC_EXPANSION: Expanding worker radius, location issues\n\
         - WORKER_QUALITY: Specific worker actions, reliability issues\n\
         - REQUIREMENT_BARRIERS: Background checks, certifications, employment type\n\
         - SHIFT_TIMING: Time of day, day of week patterns\n\
         - SUPPLY_DEMAND: Worker pool size, availability issues\n\
         - URGENT_ACTION: Immediate actions needed\n\
         - OTHER: Doesn't fit other categories\n\
         \n\
         Recommendation: \"{}\"\n\
         \n\
         Respond with:\n\
         1. Category name (from list above)\n\
         2. Confidence (0-1)\n\
         3. Any specific values mentioned (wages, hours, distances, worker IDs)\n\
         \n\
         Format: CATEGORY|CONFIDENCE|VALUE1:X,VALUE2:Y",
        text
    )
}

#[derive(serde::Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    max_tokens: u32,
}

#[derive(serde::Deserialize)]
struct CompletionResponse {
    completion: String,
}

/// reqwest-backed escalation client against a text-generation endpoint.
pub struct HttpEscalationClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpEscalationClient {
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

        Ok(HttpEscalationClient {
            http,
            endpoint: format!("{}/v1/complete", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl EscalationClient for HttpEscalationClient {
    #[instrument(skip(self, prompt))]
    async fn classify(&self, prompt: &str) -> Result<String> {
        let request = CompletionRequest {
            prompt,
            max_tokens: 128,
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

        let completion: CompletionResponse = response.json().await?;
        debug!(chars = completion.completion.len(), "Received escalation completion");
        Ok(completion.completion)
    }
}
