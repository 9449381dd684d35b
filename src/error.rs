// Example using thiserror
use thiserror::Error;

/// Custom Result type for this crate.
pub type Result<T> = std::result::Result<T, ProcessingError>;

/// The Error type for batch-processing and classification operations.
///
/// Entity-level failures are captured inside that entity's `ProcessingResult`
/// and never abort sibling entities; only configuration errors raised at job
/// creation propagate to the caller.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Configuration validation error: {0}")]
    ConfigValidationError(String),

    /// Network-level failure (connect, timeout). Retryable per attempt budget.
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// The analysis service answered but with a failure. Retryable, becomes
    /// entity-fatal once retries are exhausted.
    #[error("Analysis service error ({status}): {message}")]
    Service { status: u16, message: String },

    /// Classification failure. Caught locally and degraded to an empty
    /// classification list, never entity-fatal.
    #[error("Classification error: {0}")]
    Classification(String),

    /// Internal control signal: the circuit breaker is open. Pauses new chunk
    /// starts, never surfaced to the caller.
    #[error("Circuit breaker open for another {remaining_secs:.1}s")]
    CircuitOpen { remaining_secs: f64 },

    #[error("I/O error: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    #[error("Serialization/Deserialization error: {source}")]
    SerializationError {
        #[from]
        source: serde_json::Error, // Specific to JSON for now, could generalize
    },

    #[error("Unexpected error: {0}")]
    Unexpected(String),
    // Add other specific error types as needed
}

// reqwest::Error doesn't split cleanly into our transient/service taxonomy on
// its own, so map it where the status is known.
impl From<reqwest::Error> for ProcessingError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            ProcessingError::Service {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            // Connect errors, timeouts, body/decode failures.
            ProcessingError::TransientNetwork(err.to_string())
        }
    }
}

impl ProcessingError {
    /// Whether the orchestrator's retry loop should spend another attempt on
    /// this error. The analysis path treats every failure uniformly as
    /// retryable up to the attempt budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProcessingError::TransientNetwork(_)
                | ProcessingError::Service { .. }
                | ProcessingError::Unexpected(_)
        )
    }
}
