// tests/classifier_tests.rs

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use RecTriage::classification::classifier::RecommendationClassifier;
use RecTriage::client::escalation::EscalationClient;
use RecTriage::config::rules::default_rules;
use RecTriage::config::BatchConfig;
use RecTriage::data_model::{Category, Priority};
use RecTriage::error::{ProcessingError, Result};

/// Deterministic escalation stub: fixed response, call counting.
struct StubEscalationClient {
    response: Option<String>,
    calls: AtomicU32,
}

impl StubEscalationClient {
    fn returning(response: &str) -> Self {
        StubEscalationClient {
            response: Some(response.to_string()),
            calls: AtomicU32::new(0),
        }
    }

    fn failing() -> Self {
        StubEscalationClient {
            response: None,
            calls: AtomicU32::new(0),
        }
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EscalationClient for StubEscalationClient {
    async fn classify(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.response {
            Some(response) => Ok(response.clone()),
            None => Err(ProcessingError::Service {
                status: 500,
                message: "escalation unavailable".to_string(),
            }),
        }
    }
}

fn classifier_with(escalation: Arc<StubEscalationClient>) -> Arc<RecommendationClassifier> {
    Arc::new(
        RecommendationClassifier::new(default_rules(), &BatchConfig::default())
            .with_escalation(escalation),
    )
}

// Low heuristic signal on purpose: no category pattern family matches this.
const VAGUE_TEXT: &str = "Something about this account needs another look soon";

#[tokio::test]
async fn test_escalation_triggers_below_threshold_and_is_accepted() {
    let stub = Arc::new(StubEscalationClient::returning(
        "SHIFT_TIMING|0.82|shift:morning",
    ));
    let classifier = classifier_with(stub.clone());

    let result = classifier.classify(VAGUE_TEXT.to_string()).await;

    assert_eq!(stub.call_count(), 1);
    assert_eq!(result.category, Category::ShiftTiming);
    assert_eq!(result.confidence, 0.82);
    assert_eq!(
        result.extracted_values.extra.get("shift").map(String::as_str),
        Some("morning")
    );
    // Action synthesis follows the escalated category.
    assert_eq!(
        result.specific_action,
        "Adjust shift timing to match worker availability"
    );
}

#[tokio::test]
async fn test_confident_heuristic_skips_escalation() {
    let stub = Arc::new(StubEscalationClient::returning("OTHER|0.9"));
    let classifier = classifier_with(stub.clone());

    let result = classifier
        .classify("Increase pay from $15.00 to $18.50 to improve fill rate".to_string())
        .await;

    assert_eq!(stub.call_count(), 0);
    assert_eq!(result.category, Category::WageAdjustment);
    assert_eq!(result.priority, Priority::High);
}

#[tokio::test]
async fn test_malformed_escalation_keeps_heuristic_result() {
    let stub = Arc::new(StubEscalationClient::returning(
        "I think this might be about scheduling?",
    ));
    let classifier = classifier_with(stub.clone());

    let result = classifier.classify(VAGUE_TEXT.to_string()).await;

    assert_eq!(stub.call_count(), 1);
    assert_eq!(result.category, Category::Other);
    assert_eq!(result.confidence, 0.3);
}

#[tokio::test]
async fn test_truncated_escalation_keeps_heuristic_result() {
    let stub = Arc::new(StubEscalationClient::returning("WAGE_ADJ"));
    let classifier = classifier_with(stub.clone());

    let result = classifier.classify(VAGUE_TEXT.to_string()).await;

    assert_eq!(result.category, Category::Other);
    assert_eq!(result.confidence, 0.3);
}

#[tokio::test]
async fn test_failed_escalation_call_keeps_heuristic_result() {
    let stub = Arc::new(StubEscalationClient::failing());
    let classifier = classifier_with(stub.clone());

    let result = classifier.classify(VAGUE_TEXT.to_string()).await;

    assert_eq!(stub.call_count(), 1);
    assert_eq!(result.category, Category::Other);
    assert_eq!(result.confidence, 0.3);
}

#[tokio::test]
async fn test_no_escalation_client_configured() {
    let classifier = Arc::new(RecommendationClassifier::new(
        default_rules(),
        &BatchConfig::default(),
    ));

    let result = classifier.classify(VAGUE_TEXT.to_string()).await;
    assert_eq!(result.category, Category::Other);
    assert_eq!(result.confidence, 0.3);
}

#[tokio::test]
async fn test_classify_all_preserves_order_and_count() {
    let classifier = Arc::new(RecommendationClassifier::new(
        default_rules(),
        &BatchConfig::default(),
    ));

    let texts = vec![
        "Increase pay from $15.00 to $18.50 to improve fill rate".to_string(),
        "Post shifts 48 hours earlier".to_string(),
        "Expand radius to 30 miles".to_string(),
        String::new(),
    ];
    let results = classifier.classify_all(texts.clone()).await;

    assert_eq!(results.len(), texts.len());
    for (text, result) in texts.iter().zip(&results) {
        assert_eq!(&result.original_text, text);
    }
    assert_eq!(results[0].category, Category::WageAdjustment);
    assert_eq!(results[1].category, Category::LeadTime);
    assert_eq!(results[2].category, Category::GeographicExpansion);
    assert_eq!(results[3].category, Category::Other);
}

#[tokio::test]
async fn test_escalated_values_merge_with_regex_extraction() {
    // The text carries an extractable amount even though the category signal
    // is weak; the escalation extras must not clobber it.
    let stub = Arc::new(StubEscalationClient::returning(
        "WAGE_ADJUSTMENT|0.75|note:raise floor",
    ));
    let classifier = classifier_with(stub);

    let result = classifier
        .classify("Maybe look at the $17.00 figure for this account".to_string())
        .await;

    assert_eq!(result.category, Category::WageAdjustment);
    assert_eq!(result.extracted_values.wage_amounts, vec![17.00]);
    assert_eq!(
        result.extracted_values.extra.get("note").map(String::as_str),
        Some("raise floor")
    );
}
