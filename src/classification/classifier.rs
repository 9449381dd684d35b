//! Heuristic recommendation classification.
//!
//! The heuristic pass (pattern families + value extraction + rule-based
//! confidence refinement) is deterministic and CPU-bound; it runs on a
//! bounded blocking pool so it never blocks concurrent network waits. The
//! only non-deterministic path is the optional escalation to an external
//! text-classification capability, which triggers when heuristic confidence
//! falls below the configured threshold.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::classification::confidence::ConfidenceCalculator;
use crate::client::escalation::{build_escalation_prompt, EscalationClient};
use crate::config::rules::RulesConfig;
use crate::config::{BatchConfig, PriorityThresholds};
use crate::data_model::{Category, ClassificationResult, ExtractedValues, Priority};
use crate::utils::prometheus_metrics::{
    CLASSIFICATIONS_TOTAL, ESCALATION_CALLS_TOTAL, ESCALATION_DISCARDED_TOTAL,
};

/// Per-category pattern families for the quick heuristic pass. Matching is
/// against lowercased text, so the patterns are lowercase themselves.
static CATEGORY_PATTERNS: Lazy<Vec<(Category, Vec<Regex>)>> = Lazy::new(|| {
    let compile = |patterns: &[&str]| -> Vec<Regex> {
        patterns
            .iter()
            .map(|p| Regex::new(p).expect("built-in category pattern is valid"))
            .collect()
    };
    vec![
        (
            Category::WageAdjustment,
            compile(&[
                r"(increase|raise).*(wage|pay)|pay.*below|wage.*competitive|increase.*rate.*\$",
                r"offer.*\$\d+|recommended.*\$\d+|adjust.*pricing",
            ]),
        ),
        (
            Category::LeadTime,
            compile(&[
                r"post.*earlier|lead.*time|advance.*notice|booking.*lead",
                r"\d+.*hours.*advance|schedule.*sooner",
            ]),
        ),
        (
            Category::GeographicExpansion,
            compile(&[
                r"expand.*radius|geographic|distance|miles.*away|access.*tier",
                r"worker.*pool.*location|broaden.*reach",
            ]),
        ),
        (
            Category::WorkerQuality,
            compile(&[
                r"call.*worker|high.*risk|reliability|worker.*id|contact.*immediately",
                r"monitor.*specific|check.*status",
            ]),
        ),
        (
            Category::RequirementBarriers,
            compile(&[
                r"remove.*requirement|background.*check|drug.*screen|w2.*only",
                r"relax.*criteria|reduce.*barrier",
            ]),
        ),
        (
            Category::ShiftTiming,
            compile(&[
                r"shift.*timing|time.*of.*day|morning.*shift|evening.*hours",
                r"avoid.*early|weekend.*pattern",
            ]),
        ),
        (
            Category::SupplyDemand,
            compile(&[
                r"supply.*demand|worker.*shortage|eligible.*pool|increase.*slots",
                r"not.*enough.*workers|limited.*availability",
            ]),
        ),
        (
            Category::UrgentAction,
            compile(&[
                r"immediate|urgent|critical|\bnow\b|\basap\b|today",
                r"within.*\d+.*hour|before.*shift.*start",
            ]),
        ),
    ]
});

static WAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$(\d+(?:\.\d{2})?)").expect("wage regex is valid"));
static PERCENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").expect("percent regex is valid"));
static HOURS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*hours?").expect("hours regex is valid"));
static MILES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*miles?").expect("miles regex is valid"));
static WORKER_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[Ww]orker.*?([A-Z]?\d{4,})").expect("worker id regex is valid"));
static URGENCY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(immediate(?:ly)?|urgent(?:ly)?|critical|now|asap)\b")
        .expect("urgency regex is valid")
});

const DEFAULT_CONFIDENCE: f64 = 0.3;

/// Outcome of the deterministic heuristic pass, before any escalation.
#[derive(Debug, Clone)]
struct HeuristicPass {
    category: Category,
    /// Raw pattern-family confidence, used for the escalation decision.
    raw_confidence: f64,
    /// Rule-refined confidence (equal to raw when no rule applies or the
    /// text is an escalation candidate).
    confidence: f64,
    extracted: ExtractedValues,
}

/// Classifies recommendation strings into actionable categories.
pub struct RecommendationClassifier {
    rules: RulesConfig,
    calculator: ConfidenceCalculator,
    thresholds: PriorityThresholds,
    escalation_threshold: f64,
    escalation: Option<Arc<dyn EscalationClient>>,
    /// Bounds concurrent blocking-pool classification work.
    classify_permits: Arc<Semaphore>,
}

impl RecommendationClassifier {
    pub fn new(rules: RulesConfig, config: &BatchConfig) -> Self {
        RecommendationClassifier {
            rules,
            calculator: ConfidenceCalculator::new(),
            thresholds: config.priority_thresholds,
            escalation_threshold: config.escalation_threshold,
            escalation: None,
            classify_permits: Arc::new(Semaphore::new(config.classification_workers)),
        }
    }

    /// Attach an escalation client for low-confidence texts.
    pub fn with_escalation(mut self, client: Arc<dyn EscalationClient>) -> Self {
        self.escalation = Some(client);
        self
    }

    /// Classify one recommendation. Always produces exactly one result; all
    /// internal failures degrade (fewer extracted values, discarded
    /// escalation) rather than propagate.
    pub async fn classify(self: &Arc<Self>, text: String) -> ClassificationResult {
        CLASSIFICATIONS_TOTAL.inc();

        let pass = self.heuristic_pass_blocking(text.clone()).await;

        if pass.raw_confidence < self.escalation_threshold {
            if let Some(escalated) = self.escalate(&text, &pass).await {
                return escalated;
            }
        }

        self.finalize(&text, pass.category, pass.confidence, pass.extracted)
    }

    /// Classify a list of recommendations in order.
    pub async fn classify_all(self: &Arc<Self>, recommendations: Vec<String>) -> Vec<ClassificationResult> {
        let mut results = Vec::with_capacity(recommendations.len());
        for text in recommendations {
            results.push(self.classify(text).await);
        }
        results
    }

    /// Fully synchronous classification: the deterministic heuristic path
    /// with no escalation. Useful for tests and offline tooling.
    pub fn classify_sync(&self, text: &str) -> ClassificationResult {
        let pass = self.heuristic_pass(text);
        self.finalize(text, pass.category, pass.confidence, pass.extracted)
    }

    /// Run the CPU-bound heuristic pass on the bounded blocking pool.
    async fn heuristic_pass_blocking(self: &Arc<Self>, text: String) -> HeuristicPass {
        let permit = match self.classify_permits.clone().acquire_owned().await {
            Ok(permit) => Some(permit),
            // The semaphore is never closed; fall through to inline work if
            // that somehow changes.
            Err(_) => None,
        };

        if permit.is_some() {
            let this = Arc::clone(self);
            let moved_text = text.clone();
            match tokio::task::spawn_blocking(move || this.heuristic_pass(&moved_text)).await {
                Ok(pass) => return pass,
                Err(e) => {
                    warn!(error = %e, "Blocking classification task failed; classifying inline");
                }
            }
        }
        self.heuristic_pass(&text)
    }

    fn heuristic_pass(&self, text: &str) -> HeuristicPass {
        let (category, raw_confidence) = self.pattern_match_category(text);
        let extracted = extract_values(text);

        // Rule refinement only applies on the confident (non-escalation)
        // path, so escalation decisions always see the raw score.
        let confidence = if raw_confidence >= self.escalation_threshold {
            self.refine_confidence(category, text, raw_confidence)
        } else {
            raw_confidence
        };

        HeuristicPass {
            category,
            raw_confidence,
            confidence,
            extracted,
        }
    }

    /// Quick categorization via the per-category pattern families.
    fn pattern_match_category(&self, text: &str) -> (Category, f64) {
        let text_lower = text.to_lowercase();
        let mut best_category = Category::Other;
        let mut best_confidence = DEFAULT_CONFIDENCE;

        for (category, patterns) in CATEGORY_PATTERNS.iter() {
            let matches = patterns.iter().filter(|re| re.is_match(&text_lower)).count();
            if matches > 0 {
                let confidence = (0.5 + matches as f64 * 0.2).min(0.9);
                if confidence > best_confidence {
                    best_category = *category;
                    best_confidence = confidence;
                }
            }
        }

        (best_category, best_confidence)
    }

    /// Rescore the heuristic pick against the category's rules; the best
    /// rule's overall score replaces the raw confidence. Deterministic.
    fn refine_confidence(&self, category: Category, text: &str, raw: f64) -> f64 {
        let rules = self.rules.rules_for(category);
        if rules.is_empty() {
            return raw;
        }

        let mut best = 0.0_f64;
        for rule in rules {
            let breakdown = self.calculator.score(rule, text, raw);
            debug!(
                rule_id = %rule.rule_id,
                overall = breakdown.overall,
                explanation = %breakdown.explanation,
                "Rule scoring"
            );
            if breakdown.overall > best {
                best = breakdown.overall;
            }
        }
        best
    }

    /// Delegate to the escalation capability. Returns `None` (keeping the
    /// heuristic result) on transport failure or malformed output.
    async fn escalate(&self, text: &str, pass: &HeuristicPass) -> Option<ClassificationResult> {
        let client = self.escalation.as_ref()?;
        ESCALATION_CALLS_TOTAL.inc();

        let prompt = build_escalation_prompt(text);
        let response = match client.classify(&prompt).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Escalation call failed; keeping heuristic result");
                ESCALATION_DISCARDED_TOTAL.inc();
                return None;
            }
        };

        match parse_escalation_response(&response) {
            Some((category, confidence, extra)) => {
                debug!(%category, confidence, "Escalation result accepted");
                // Regex-extracted values are kept; escalation key:vals are
                // merged alongside them.
                let mut extracted = pass.extracted.clone();
                extracted.extra.extend(extra);
                Some(self.finalize(text, category, confidence, extracted))
            }
            None => {
                debug!(raw = %response, "Discarding malformed escalation response");
                ESCALATION_DISCARDED_TOTAL.inc();
                None
            }
        }
    }

    /// Priority determination plus action synthesis.
    fn finalize(
        &self,
        text: &str,
        category: Category,
        confidence: f64,
        extracted: ExtractedValues,
    ) -> ClassificationResult {
        let priority = self.determine_priority(text, category, &extracted);
        let specific_action = synthesize_action(category, &extracted, text);

        ClassificationResult {
            category,
            confidence,
            extracted_values: extracted,
            priority,
            specific_action,
            original_text: text.to_string(),
        }
    }

    fn determine_priority(
        &self,
        text: &str,
        category: Category,
        values: &ExtractedValues,
    ) -> Priority {
        if URGENCY_RE.is_match(&text.to_lowercase()) {
            return Priority::High;
        }

        match category {
            Category::UrgentAction => Priority::High,
            Category::WageAdjustment => {
                if self.wage_change_exceeds_threshold(values) {
                    Priority::High
                } else {
                    Priority::Medium
                }
            }
            Category::WorkerQuality => {
                if !values.worker_ids.is_empty() {
                    Priority::High
                } else {
                    Priority::Medium
                }
            }
            Category::LeadTime => {
                if values
                    .hours
                    .iter()
                    .min()
                    .is_some_and(|min| *min < self.thresholds.lead_time_hours)
                {
                    Priority::High
                } else {
                    Priority::Medium
                }
            }
            _ => Priority::Medium,
        }
    }

    /// An explicit percentage above the cutoff, or a change derived from the
    /// first two extracted wage amounts, makes the adjustment high priority.
    fn wage_change_exceeds_threshold(&self, values: &ExtractedValues) -> bool {
        if values
            .percentages
            .iter()
            .any(|pct| *pct > self.thresholds.wage_change_pct)
        {
            return true;
        }
        if let [from, to, ..] = values.wage_amounts.as_slice() {
            if *from > 0.0 {
                let change_pct = ((to - from) / from * 100.0).abs();
                return change_pct > self.thresholds.wage_change_pct;
            }
        }
        false
    }
}

/// Pull structured values out of the text. Unparseable captures are simply
/// skipped, so extraction degrades to fewer values rather than failing.
fn extract_values(text: &str) -> ExtractedValues {
    let mut values = ExtractedValues::default();

    values.wage_amounts = WAGE_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .collect();

    values.percentages = PERCENT_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .collect();

    values.hours = HOURS_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .filter_map(|m| m.as_str().parse::<i64>().ok())
        .collect();

    values.miles = MILES_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .filter_map(|m| m.as_str().parse::<i64>().ok())
        .collect();

    values.worker_ids = WORKER_ID_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect();

    values
}

/// Lenient parse of the `CATEGORY|CONFIDENCE|key1:val1,key2:val2` escalation
/// format. Unknown categories map to `Other`; anything unreadable returns
/// `None` so the caller keeps the heuristic result.
fn parse_escalation_response(
    response: &str,
) -> Option<(Category, f64, BTreeMap<String, String>)> {
    let parts: Vec<&str> = response.trim().split('|').collect();
    if parts.len() < 2 {
        return None;
    }

    let category = Category::from_str(parts[0]).unwrap_or(Category::Other);
    let confidence = parts[1].trim().parse::<f64>().ok()?;
    if !(0.0..=1.0).contains(&confidence) {
        return None;
    }

    let mut extra = BTreeMap::new();
    if let Some(raw_values) = parts.get(2) {
        for pair in raw_values.split(',') {
            if let Some((key, value)) = pair.split_once(':') {
                let key = key.trim().to_lowercase();
                let value = value.trim().to_string();
                if !key.is_empty() && !value.is_empty() {
                    extra.insert(key, value);
                }
            }
        }
    }

    Some((category, confidence, extra))
}

/// Category-specific actionable instruction, filled from extracted values
/// with generic fallbacks. Urgent actions pass the original text through.
fn synthesize_action(category: Category, values: &ExtractedValues, original_text: &str) -> String {
    match category {
        Category::WageAdjustment => {
            if let [from, to, ..] = values.wage_amounts.as_slice() {
                format!("Update wage from ${} to ${}", from, to)
            } else {
                "Review and adjust wage to market rate".to_string()
            }
        }
        Category::LeadTime => {
            if let Some(max) = values.hours.iter().max() {
                format!("Post shifts at least {} hours in advance", max)
            } else {
                "Increase shift posting lead time".to_string()
            }
        }
        Category::GeographicExpansion => {
            if let Some(max) = values.miles.iter().max() {
                format!("Expand worker search radius to {} miles", max)
            } else {
                "Expand geographic search radius".to_string()
            }
        }
        Category::WorkerQuality => {
            if !values.worker_ids.is_empty() {
                format!("Contact workers immediately: {}", values.worker_ids.join(", "))
            } else {
                "Review and contact high-risk workers".to_string()
            }
        }
        Category::RequirementBarriers => "Review and potentially relax job requirements".to_string(),
        Category::ShiftTiming => "Adjust shift timing to match worker availability".to_string(),
        Category::SupplyDemand => "Increase worker pool or adjust demand".to_string(),
        Category::UrgentAction => original_text.to_string(),
        Category::Other => "Review recommendation for custom action".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::rules::default_rules;

    fn classifier() -> RecommendationClassifier {
        RecommendationClassifier::new(default_rules(), &BatchConfig::default())
    }

    #[test]
    fn test_extract_values_wage_example() {
        let values = extract_values("Increase pay from $15.00 to $18.50 to improve fill rate");
        assert_eq!(values.wage_amounts, vec![15.00, 18.50]);
        assert!(values.percentages.is_empty());
        assert!(values.hours.is_empty());
    }

    #[test]
    fn test_extract_values_mixed() {
        let values = extract_values(
            "Post 48 hours earlier, expand to 25 miles, and call worker W12345 about the 15% gap",
        );
        assert_eq!(values.hours, vec![48]);
        assert_eq!(values.miles, vec![25]);
        assert_eq!(values.worker_ids, vec!["W12345".to_string()]);
        assert_eq!(values.percentages, vec![15.0]);
    }

    #[test]
    fn test_pattern_match_category_default_is_other() {
        let c = classifier();
        let (category, confidence) = c.pattern_match_category("completely unrelated sentence");
        assert_eq!(category, Category::Other);
        assert_eq!(confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_pattern_match_confidence_scales_with_matches() {
        let c = classifier();
        let (category, confidence) =
            c.pattern_match_category("Increase wage and offer $20 to stay competitive");
        assert_eq!(category, Category::WageAdjustment);
        // Both wage pattern families match: 0.5 + 2 * 0.2
        assert_eq!(confidence, 0.9);
    }

    #[test]
    fn test_classify_sync_never_empty_and_in_bounds() {
        let c = classifier();
        let texts = [
            "Increase pay from $15.00 to $18.50 to improve fill rate",
            "Post shifts 12 hours earlier",
            "gibberish with no signal whatsoever",
            "",
        ];
        for text in texts {
            let result = c.classify_sync(text);
            assert!((0.0..=1.0).contains(&result.confidence));
            assert!(matches!(
                result.priority,
                Priority::High | Priority::Medium | Priority::Low
            ));
            assert_eq!(result.original_text, text);
        }
    }

    #[test]
    fn test_worked_wage_example() {
        let c = classifier();
        let result = c.classify_sync("Increase pay from $15.00 to $18.50 to improve fill rate");
        assert_eq!(result.category, Category::WageAdjustment);
        assert_eq!(result.extracted_values.wage_amounts, vec![15.00, 18.50]);
        // (18.5 - 15) / 15 is about 23.3%, above the 20% cutoff.
        assert_eq!(result.priority, Priority::High);
        assert_eq!(result.specific_action, "Update wage from $15 to $18.5");
    }

    #[test]
    fn test_small_wage_change_is_medium_priority() {
        let c = classifier();
        let result = c.classify_sync("Increase pay from $15.00 to $16.00 to improve fill rate");
        assert_eq!(result.category, Category::WageAdjustment);
        // (16 - 15) / 15 is about 6.7%, below the cutoff.
        assert_eq!(result.priority, Priority::Medium);
    }

    #[test]
    fn test_lead_time_below_cutoff_is_high_priority() {
        let c = classifier();
        let result = c.classify_sync("Advance notice too short: post at least 12 hours earlier");
        assert_eq!(result.category, Category::LeadTime);
        assert_eq!(result.priority, Priority::High);
        assert_eq!(result.specific_action, "Post shifts at least 12 hours in advance");
    }

    #[test]
    fn test_urgency_keywords_force_high_priority() {
        let c = classifier();
        let result = c.classify_sync("Urgent: adjust pricing before tonight");
        assert_eq!(result.priority, Priority::High);
    }

    #[test]
    fn test_urgency_keyword_requires_word_boundary() {
        let c = classifier();
        // "know" must not trip the "now" urgency keyword.
        let result = c.classify_sync("Let the account manager know about supply and demand gaps");
        assert_eq!(result.priority, Priority::Medium);
    }

    #[test]
    fn test_worker_ids_force_high_priority() {
        let c = classifier();
        let result = c.classify_sync("Call worker 88210 about reliability before next shift");
        assert_eq!(result.category, Category::WorkerQuality);
        assert_eq!(result.priority, Priority::High);
        assert!(result.specific_action.contains("88210"));
    }

    #[test]
    fn test_deterministic_for_identical_input() {
        let c = classifier();
        let text = "Expand radius to 30 miles to reach a bigger worker pool";
        let first = c.classify_sync(text);
        let second = c.classify_sync(text);
        assert_eq!(first.category, second.category);
        assert_eq!(first.confidence, second.confidence);
        assert_eq!(first.priority, second.priority);
    }

    #[test]
    fn test_parse_escalation_response_happy_path() {
        let parsed = parse_escalation_response("WAGE_ADJUSTMENT|0.85|wage:18.50,hours:12");
        let (category, confidence, extra) = parsed.expect("should parse");
        assert_eq!(category, Category::WageAdjustment);
        assert_eq!(confidence, 0.85);
        assert_eq!(extra.get("wage").map(String::as_str), Some("18.50"));
        assert_eq!(extra.get("hours").map(String::as_str), Some("12"));
    }

    #[test]
    fn test_parse_escalation_response_unknown_category_maps_to_other() {
        let parsed = parse_escalation_response("SOMETHING_NEW|0.6");
        let (category, confidence, extra) = parsed.expect("should parse");
        assert_eq!(category, Category::Other);
        assert_eq!(confidence, 0.6);
        assert!(extra.is_empty());
    }

    #[test]
    fn test_parse_escalation_response_rejects_garbage() {
        assert!(parse_escalation_response("").is_none());
        assert!(parse_escalation_response("no pipes here").is_none());
        assert!(parse_escalation_response("WAGE_ADJUSTMENT|not-a-number").is_none());
        assert!(parse_escalation_response("WAGE_ADJUSTMENT|1.7").is_none());
    }

    #[test]
    fn test_synthesize_action_fallbacks() {
        let empty = ExtractedValues::default();
        assert_eq!(
            synthesize_action(Category::WageAdjustment, &empty, "x"),
            "Review and adjust wage to market rate"
        );
        assert_eq!(
            synthesize_action(Category::UrgentAction, &empty, "Escalate to the account team NOW"),
            "Escalate to the account team NOW"
        );
        assert_eq!(
            synthesize_action(Category::Other, &empty, "x"),
            "Review recommendation for custom action"
        );
    }
}
