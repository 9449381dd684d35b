//! Multi-factor confidence scoring for rule evaluation.
//!
//! Combines four signals - pattern match strength, surrounding context,
//! signal consistency, and configured boost conditions - into one score,
//! scaled by the upstream confidence and clamped to [0, 0.95].

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::rules::{BoostCondition, ClassificationRule, PatternSpec, RulePattern};
use crate::utils::text::word_set;

/// Upper bound for every confidence this calculator produces.
pub const MAX_CONFIDENCE: f64 = 0.95;

const PATTERN_WEIGHT: f64 = 0.4;
const CONTEXT_WEIGHT: f64 = 0.25;
const CONSISTENCY_WEIGHT: f64 = 0.2;
const BOOST_WEIGHT: f64 = 0.15;

/// Result of matching one weighted pattern against a text.
#[derive(Debug, Clone)]
struct MatchOutcome {
    matched: bool,
    /// Normalized per-pattern score in [0, 1]; 0 for non-matches.
    score: f64,
    weight: f64,
}

/// Detailed scoring for one rule evaluation. Logged and fed back into rule
/// scoring; not persisted independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub overall: f64,
    pub pattern_score: f64,
    pub context_score: f64,
    pub consistency_score: f64,
    pub boost_score: f64,
    pub explanation: String,
    pub contributing_factors: Vec<String>,
}

/// Scores how strongly a rule matches a text.
#[derive(Debug, Clone, Default)]
pub struct ConfidenceCalculator;

impl ConfidenceCalculator {
    pub fn new() -> Self {
        ConfidenceCalculator
    }

    /// Calculate a full confidence breakdown for `rule` against `text`.
    ///
    /// `upstream_confidence` is the confidence reported by whatever produced
    /// the candidate classification (heuristic pass or upstream service); it
    /// scales the combined score by a factor in [0.8, 1.2].
    pub fn score(
        &self,
        rule: &ClassificationRule,
        text: &str,
        upstream_confidence: f64,
    ) -> ConfidenceBreakdown {
        let text_lower = text.to_lowercase();
        let outcomes = match_patterns(&rule.patterns, &text_lower);
        let match_count = outcomes.iter().filter(|o| o.matched).count();

        let pattern_score = pattern_score(&outcomes, match_count);
        let context_score =
            context_score(match_count, text, &rule.effective_support_terms());
        let consistency_score = consistency_score(&outcomes, match_count);
        let boost_score = boost_score(&rule.confidence_boosts, &text_lower);

        let weighted = pattern_score * PATTERN_WEIGHT
            + context_score * CONTEXT_WEIGHT
            + consistency_score * CONSISTENCY_WEIGHT
            + boost_score * BOOST_WEIGHT;

        // Scale upstream confidence into a 0.8-1.2 factor.
        let upstream = upstream_confidence.clamp(0.0, 1.0);
        let upstream_factor = 0.8 + upstream * 0.4;
        let overall = (weighted * upstream_factor).clamp(0.0, MAX_CONFIDENCE);

        tracing::debug!(
            rule_id = %rule.rule_id,
            pattern_score,
            context_score,
            consistency_score,
            boost_score,
            upstream_factor,
            overall,
            "Computed confidence score"
        );

        let explanation = build_explanation(
            pattern_score,
            context_score,
            consistency_score,
            boost_score,
            upstream,
            overall,
        );
        let contributing_factors = identify_factors(
            match_count,
            pattern_score,
            context_score,
            consistency_score,
            boost_score,
            upstream,
        );

        ConfidenceBreakdown {
            overall,
            pattern_score,
            context_score,
            consistency_score,
            boost_score,
            explanation,
            contributing_factors,
        }
    }
}

/// Match every pattern in the rule against the lowercased text. A malformed
/// pattern is logged and scored 0; it never aborts the calculation.
fn match_patterns(patterns: &[RulePattern], text_lower: &str) -> Vec<MatchOutcome> {
    patterns
        .iter()
        .map(|pattern| {
            let score = match &pattern.spec {
                PatternSpec::Regex(raw) => match Regex::new(raw) {
                    Ok(re) => {
                        let count = re.find_iter(text_lower).count();
                        if count == 0 {
                            0.0
                        } else {
                            // More simultaneous matches score higher, capped at 1.
                            (0.4 + count as f64 * 0.3).min(1.0)
                        }
                    }
                    Err(e) => {
                        warn!(pattern = %raw, error = %e, "Skipping malformed regex pattern");
                        0.0
                    }
                },
                PatternSpec::Keywords(words) => {
                    if words.is_empty() {
                        0.0
                    } else {
                        let matched = words
                            .iter()
                            .filter(|w| text_lower.contains(&w.to_lowercase()))
                            .count();
                        matched as f64 / words.len() as f64
                    }
                }
                PatternSpec::Exact(needle) => {
                    if text_lower.contains(&needle.to_lowercase()) {
                        1.0
                    } else {
                        0.0
                    }
                }
            };
            MatchOutcome {
                matched: score > 0.0,
                score,
                weight: pattern.weight,
            }
        })
        .collect()
}

/// Weight-normalized average of per-pattern scores, boosted 10% per
/// additional simultaneous match, capped at 1.
fn pattern_score(outcomes: &[MatchOutcome], match_count: usize) -> f64 {
    let total_weight: f64 = outcomes.iter().map(|o| o.weight).sum();
    if total_weight == 0.0 {
        return 0.0;
    }
    let weighted: f64 = outcomes
        .iter()
        .filter(|o| o.matched)
        .map(|o| o.score * o.weight)
        .sum();
    let mut base = weighted / total_weight;
    if match_count > 1 {
        base *= 1.0 + (match_count as f64 - 1.0) * 0.1;
    }
    base.min(1.0)
}

/// Context quality around the matches: text-length sweet spot plus overlap
/// with the rule's support vocabulary. Zero when nothing matched at all.
fn context_score(match_count: usize, text: &str, support_terms: &[String]) -> f64 {
    if match_count == 0 {
        return 0.0;
    }

    let mut score: f64 = 0.5;

    // Sweet spot is 50-500 characters; very short texts carry little signal.
    let text_length = text.len();
    if (50..=500).contains(&text_length) {
        score += 0.2;
    } else if (20..50).contains(&text_length) || (501..=1000).contains(&text_length) {
        score += 0.1;
    } else if text_length < 20 {
        score -= 0.2;
    }

    if !support_terms.is_empty() {
        let words = word_set(text);
        let overlap = support_terms
            .iter()
            .filter(|t| words.contains(&t.to_lowercase()))
            .count();
        score += (overlap as f64 * 0.05).min(0.2);
    }

    score.clamp(0.0, 1.0)
}

/// Consistency of the matched signals: single matches get moderate
/// consistency, multiple matches are judged by their score variance.
fn consistency_score(outcomes: &[MatchOutcome], match_count: usize) -> f64 {
    if match_count == 0 {
        return 0.0;
    }
    if match_count == 1 {
        return 0.7;
    }

    let scores: Vec<f64> = outcomes
        .iter()
        .filter(|o| o.matched)
        .map(|o| o.score)
        .collect();
    let avg = scores.iter().sum::<f64>() / scores.len() as f64;
    let variance = scores.iter().map(|s| (s - avg).powi(2)).sum::<f64>() / scores.len() as f64;

    let mut consistency = 1.0 - (variance * 2.0).min(1.0);
    if consistency > 0.7 {
        consistency += 0.1;
    }
    consistency.min(1.0)
}

/// Sum of boost conditions that fire, capped at 0.3.
fn boost_score(boosts: &[BoostCondition], text_lower: &str) -> f64 {
    let total: f64 = boosts
        .iter()
        .filter(|b| {
            b.if_contains
                .iter()
                .any(|term| text_lower.contains(&term.to_lowercase()))
        })
        .map(|b| b.boost)
        .sum();
    total.min(0.3)
}

fn build_explanation(
    pattern_score: f64,
    context_score: f64,
    consistency_score: f64,
    boost_score: f64,
    upstream: f64,
    overall: f64,
) -> String {
    let mut parts: Vec<&str> = Vec::new();

    if pattern_score > 0.8 {
        parts.push("Strong pattern matches found");
    } else if pattern_score > 0.5 {
        parts.push("Moderate pattern matches found");
    } else {
        parts.push("Weak pattern matches");
    }

    if context_score > 0.7 {
        parts.push("good supporting context");
    } else if context_score > 0.5 {
        parts.push("some supporting context");
    } else {
        parts.push("limited context");
    }

    if consistency_score > 0.7 {
        parts.push("consistent signals");
    } else if consistency_score > 0.5 {
        parts.push("moderately consistent signals");
    }

    if boost_score > 0.1 {
        parts.push("confidence boost conditions met");
    }

    if upstream > 0.8 {
        parts.push("high upstream confidence");
    } else if upstream < 0.5 {
        parts.push("low upstream confidence");
    }

    format!(
        "Classification confidence of {:.3} based on: {}.",
        overall,
        parts.join(", ")
    )
}

fn identify_factors(
    match_count: usize,
    pattern_score: f64,
    context_score: f64,
    consistency_score: f64,
    boost_score: f64,
    upstream: f64,
) -> Vec<String> {
    let mut factors: Vec<String> = Vec::new();

    if pattern_score > 0.8 {
        factors.push("strong_pattern_match".to_string());
    }
    if context_score > 0.7 {
        factors.push("rich_context".to_string());
    }
    if consistency_score > 0.8 {
        factors.push("signal_consistency".to_string());
    }
    if boost_score > 0.1 {
        factors.push("boost_conditions".to_string());
    }
    if match_count > 2 {
        factors.push("multiple_pattern_matches".to_string());
    }

    if pattern_score < 0.4 {
        factors.push("weak_pattern_match".to_string());
    }
    if context_score < 0.4 {
        factors.push("limited_context".to_string());
    }
    if upstream > 0.8 {
        factors.push("high_upstream_confidence".to_string());
    } else if upstream < 0.5 {
        factors.push("low_upstream_confidence".to_string());
    }

    factors
}
