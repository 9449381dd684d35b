// src/config/rules.rs
//
// Classification rules drive the confidence calculator: weighted text
// patterns, boost conditions, and a small support vocabulary per rule. Rules
// can be loaded from YAML, but the crate ships a built-in default set so the
// classifier works without any file on disk.

use crate::data_model::Category;
use crate::error::{ProcessingError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn default_weight() -> f64 {
    1.0
}

fn default_boost() -> f64 {
    0.1
}

fn default_enabled() -> bool {
    true
}

/// How a single pattern matches text. Externally tagged so the YAML reads
/// `regex: "..."`, `keywords: [..]` or `exact: "..."`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternSpec {
    Regex(String),
    Keywords(Vec<String>),
    Exact(String),
}

/// Individual weighted pattern within a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulePattern {
    #[serde(flatten)]
    pub spec: PatternSpec,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl RulePattern {
    pub fn regex(pattern: &str, weight: f64) -> Self {
        RulePattern {
            spec: PatternSpec::Regex(pattern.to_string()),
            weight,
        }
    }

    pub fn keywords(words: &[&str], weight: f64) -> Self {
        RulePattern {
            spec: PatternSpec::Keywords(words.iter().map(|w| w.to_string()).collect()),
            weight,
        }
    }

    pub fn exact(text: &str, weight: f64) -> Self {
        RulePattern {
            spec: PatternSpec::Exact(text.to_string()),
            weight,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.weight) || self.weight == 0.0 {
            return Err(ProcessingError::ConfigValidationError(format!(
                "RulePattern: weight must be in (0.0, 1.0], got {}",
                self.weight
            )));
        }
        match &self.spec {
            PatternSpec::Regex(pattern) => {
                // Compile-check up front so match time only sees valid rules.
                regex::Regex::new(pattern).map_err(|e| {
                    ProcessingError::ConfigValidationError(format!(
                        "RulePattern: invalid regex '{}': {}",
                        pattern, e
                    ))
                })?;
            }
            PatternSpec::Keywords(words) => {
                if words.is_empty() {
                    return Err(ProcessingError::ConfigValidationError(
                        "RulePattern: keywords list cannot be empty".to_string(),
                    ));
                }
            }
            PatternSpec::Exact(text) => {
                if text.is_empty() {
                    return Err(ProcessingError::ConfigValidationError(
                        "RulePattern: exact pattern cannot be empty".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// "If the text contains any of these terms, add `boost`" condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostCondition {
    pub if_contains: Vec<String>,
    #[serde(default = "default_boost")]
    pub boost: f64,
}

impl BoostCondition {
    pub fn validate(&self) -> Result<()> {
        if self.if_contains.is_empty() {
            return Err(ProcessingError::ConfigValidationError(
                "BoostCondition: if_contains cannot be empty".to_string(),
            ));
        }
        if !(0.0..=0.3).contains(&self.boost) {
            return Err(ProcessingError::ConfigValidationError(format!(
                "BoostCondition: boost must be in [0.0, 0.3], got {}",
                self.boost
            )));
        }
        Ok(())
    }
}

/// Complete classification rule: which category it supports, how it matches,
/// and what vocabulary counts as supporting context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRule {
    pub rule_id: String,
    pub category: Category,
    pub patterns: Vec<RulePattern>,
    #[serde(default)]
    pub confidence_boosts: Vec<BoostCondition>,
    /// Domain words whose presence near a match strengthens context. Empty
    /// means "use the category default vocabulary".
    #[serde(default)]
    pub support_terms: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ClassificationRule {
    pub fn validate(&self) -> Result<()> {
        if self.rule_id.is_empty() {
            return Err(ProcessingError::ConfigValidationError(
                "ClassificationRule: rule_id cannot be empty".to_string(),
            ));
        }
        if self.patterns.is_empty() {
            return Err(ProcessingError::ConfigValidationError(format!(
                "ClassificationRule '{}': at least one pattern is required",
                self.rule_id
            )));
        }
        for pattern in &self.patterns {
            pattern.validate().map_err(|e| {
                ProcessingError::ConfigValidationError(format!(
                    "ClassificationRule '{}': {}",
                    self.rule_id, e
                ))
            })?;
        }
        for boost in &self.confidence_boosts {
            boost.validate().map_err(|e| {
                ProcessingError::ConfigValidationError(format!(
                    "ClassificationRule '{}': {}",
                    self.rule_id, e
                ))
            })?;
        }
        Ok(())
    }

    /// Effective support vocabulary: the rule's own terms, or the category
    /// defaults when none were configured.
    pub fn effective_support_terms(&self) -> Vec<String> {
        if !self.support_terms.is_empty() {
            return self.support_terms.clone();
        }
        default_support_terms(self.category)
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
}

/// The full rules file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub version: Option<String>,
    pub rules: Vec<ClassificationRule>,
}

impl RulesConfig {
    pub fn validate(&self) -> Result<()> {
        for rule in &self.rules {
            rule.validate()?;
        }
        Ok(())
    }

    /// Enabled rules for one category, in file order.
    pub fn rules_for(&self, category: Category) -> Vec<&ClassificationRule> {
        self.rules
            .iter()
            .filter(|r| r.enabled && r.category == category)
            .collect()
    }
}

/// Default context vocabulary per category, used when a rule does not carry
/// its own `support_terms`.
pub fn default_support_terms(category: Category) -> &'static [&'static str] {
    match category {
        Category::WageAdjustment => &["salary", "wage", "compensation", "pay", "rate", "below", "market"],
        Category::LeadTime => &["notice", "advance", "posting", "booking", "early", "schedule"],
        Category::GeographicExpansion => &["location", "area", "region", "distance", "coverage", "nearby", "radius"],
        Category::WorkerQuality => &["worker", "reliability", "risk", "contact", "monitor", "status"],
        Category::RequirementBarriers => &["requirement", "background", "check", "certification", "criteria", "barrier"],
        Category::ShiftTiming => &["time", "shift", "schedule", "hours", "timing", "availability"],
        Category::SupplyDemand => &["supply", "demand", "pool", "shortage", "availability", "workers"],
        Category::UrgentAction => &["immediate", "urgent", "critical", "escalation", "today"],
        Category::Other => &[],
    }
}

/// Built-in rule set. One rule per actionable category so rule refinement has
/// something to score even without a rules file.
pub fn default_rules() -> RulesConfig {
    RulesConfig {
        version: Some("builtin-1".to_string()),
        rules: vec![
            ClassificationRule {
                rule_id: "wage_adjustment_core".to_string(),
                category: Category::WageAdjustment,
                patterns: vec![
                    RulePattern::regex(r"(increase|raise|adjust).*(wage|pay|rate)", 0.9),
                    RulePattern::keywords(&["wage", "pay", "rate", "pricing"], 0.6),
                    RulePattern::regex(r"\$\d+(?:\.\d{2})?", 0.5),
                ],
                confidence_boosts: vec![BoostCondition {
                    if_contains: vec!["below market".to_string(), "competitive".to_string()],
                    boost: 0.1,
                }],
                support_terms: Vec::new(),
                enabled: true,
            },
            ClassificationRule {
                rule_id: "lead_time_core".to_string(),
                category: Category::LeadTime,
                patterns: vec![
                    RulePattern::regex(r"(post|schedule).*(earlier|sooner|advance)", 0.9),
                    RulePattern::keywords(&["lead", "notice", "advance", "booking"], 0.6),
                ],
                confidence_boosts: vec![BoostCondition {
                    if_contains: vec!["hours in advance".to_string()],
                    boost: 0.1,
                }],
                support_terms: Vec::new(),
                enabled: true,
            },
            ClassificationRule {
                rule_id: "geographic_expansion_core".to_string(),
                category: Category::GeographicExpansion,
                patterns: vec![
                    RulePattern::regex(r"(expand|broaden|widen).*(radius|reach|coverage)", 0.9),
                    RulePattern::keywords(&["radius", "miles", "distance", "geographic"], 0.6),
                ],
                confidence_boosts: Vec::new(),
                support_terms: Vec::new(),
                enabled: true,
            },
            ClassificationRule {
                rule_id: "worker_quality_core".to_string(),
                category: Category::WorkerQuality,
                patterns: vec![
                    RulePattern::regex(r"(call|contact|monitor).*worker", 0.9),
                    RulePattern::keywords(&["reliability", "risk", "no-show"], 0.6),
                ],
                confidence_boosts: vec![BoostCondition {
                    if_contains: vec!["high risk".to_string(), "immediately".to_string()],
                    boost: 0.15,
                }],
                support_terms: Vec::new(),
                enabled: true,
            },
            ClassificationRule {
                rule_id: "requirement_barriers_core".to_string(),
                category: Category::RequirementBarriers,
                patterns: vec![
                    RulePattern::regex(r"(remove|relax|reduce).*(requirement|criteria|barrier)", 0.9),
                    RulePattern::keywords(&["background", "certification", "screening"], 0.6),
                ],
                confidence_boosts: Vec::new(),
                support_terms: Vec::new(),
                enabled: true,
            },
            ClassificationRule {
                rule_id: "shift_timing_core".to_string(),
                category: Category::ShiftTiming,
                patterns: vec![
                    RulePattern::regex(r"(shift|schedule).*(timing|time of day|pattern)", 0.8),
                    RulePattern::keywords(&["morning", "evening", "weekend", "overnight"], 0.6),
                ],
                confidence_boosts: Vec::new(),
                support_terms: Vec::new(),
                enabled: true,
            },
            ClassificationRule {
                rule_id: "supply_demand_core".to_string(),
                category: Category::SupplyDemand,
                patterns: vec![
                    RulePattern::regex(r"(supply|demand|shortage|pool)", 0.8),
                    RulePattern::keywords(&["availability", "slots", "workers"], 0.5),
                ],
                confidence_boosts: Vec::new(),
                support_terms: Vec::new(),
                enabled: true,
            },
            ClassificationRule {
                rule_id: "urgent_action_core".to_string(),
                category: Category::UrgentAction,
                patterns: vec![
                    RulePattern::keywords(&["immediate", "urgent", "critical", "asap", "now"], 0.9),
                    RulePattern::regex(r"within\s+\d+\s+hours?", 0.7),
                ],
                confidence_boosts: vec![BoostCondition {
                    if_contains: vec!["before shift start".to_string()],
                    boost: 0.2,
                }],
                support_terms: Vec::new(),
                enabled: true,
            },
        ],
    }
}

/// Loads and parses a rules YAML file.
pub fn load_rules_config<P: AsRef<Path>>(config_path: P) -> Result<RulesConfig> {
    let path_ref = config_path.as_ref();
    let config_content = fs::read_to_string(path_ref).map_err(|e| {
        ProcessingError::ConfigError(format!(
            "Failed to read rules config file '{}': {}",
            path_ref.display(),
            e
        ))
    })?;

    let config: RulesConfig = serde_yaml::from_str(&config_content).map_err(|e| {
        ProcessingError::ConfigError(format!(
            "Failed to parse rules config YAML from '{}': {}",
            path_ref.display(),
            e
        ))
    })?;

    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config_file(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
        writeln!(temp_file, "{}", content).expect("Failed to write to temp file");
        temp_file
    }

    #[test]
    fn test_default_rules_are_valid() {
        let rules = default_rules();
        assert!(rules.validate().is_ok(), "{:?}", rules.validate().err());
        // Every actionable category has at least one enabled rule.
        for category in Category::ALL {
            if category == Category::Other {
                continue;
            }
            assert!(
                !rules.rules_for(category).is_empty(),
                "no default rule for {}",
                category
            );
        }
    }

    #[test]
    fn test_load_valid_rules_yaml() {
        let yaml_content = r#"
version: "test-1"
rules:
  - rule_id: wage_custom
    category: wage_adjustment
    patterns:
      - regex: "increase.*pay"
        weight: 0.8
      - keywords: ["wage", "salary"]
        weight: 0.5
      - exact: "below market rate"
    confidence_boosts:
      - if_contains: ["competitive"]
        boost: 0.1
    support_terms: ["pay", "rate"]
        "#;
        let temp_file = create_temp_config_file(yaml_content);
        let config = load_rules_config(temp_file.path()).expect("valid rules should load");

        assert_eq!(config.version.as_deref(), Some("test-1"));
        assert_eq!(config.rules.len(), 1);
        let rule = &config.rules[0];
        assert_eq!(rule.category, Category::WageAdjustment);
        assert_eq!(rule.patterns.len(), 3);
        assert!(rule.enabled);
        assert_eq!(rule.patterns[2].spec, PatternSpec::Exact("below market rate".to_string()));
        // Exact pattern without explicit weight defaults to 1.0
        assert_eq!(rule.patterns[2].weight, 1.0);
        assert_eq!(rule.effective_support_terms(), vec!["pay", "rate"]);
    }

    #[test]
    fn test_invalid_regex_is_rejected_at_load() {
        let yaml_content = r#"
rules:
  - rule_id: broken
    category: other
    patterns:
      - regex: "([unclosed"
        "#;
        let temp_file = create_temp_config_file(yaml_content);
        let result = load_rules_config(temp_file.path());
        match result {
            Err(ProcessingError::ConfigValidationError(msg)) => {
                assert!(msg.contains("invalid regex"), "unexpected message: {}", msg);
            }
            other => panic!("Expected ConfigValidationError, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_weight_is_rejected() {
        let rule = ClassificationRule {
            rule_id: "w".to_string(),
            category: Category::Other,
            patterns: vec![RulePattern::exact("x", 0.0)],
            confidence_boosts: Vec::new(),
            support_terms: Vec::new(),
            enabled: true,
        };
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_empty_patterns_rejected() {
        let rule = ClassificationRule {
            rule_id: "empty".to_string(),
            category: Category::Other,
            patterns: Vec::new(),
            confidence_boosts: Vec::new(),
            support_terms: Vec::new(),
            enabled: true,
        };
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_boost_over_cap_rejected() {
        let boost = BoostCondition {
            if_contains: vec!["x".to_string()],
            boost: 0.5,
        };
        assert!(boost.validate().is_err());
    }

    #[test]
    fn test_disabled_rules_filtered_out() {
        let mut rules = default_rules();
        for rule in &mut rules.rules {
            if rule.category == Category::WageAdjustment {
                rule.enabled = false;
            }
        }
        assert!(rules.rules_for(Category::WageAdjustment).is_empty());
        assert!(!rules.rules_for(Category::LeadTime).is_empty());
    }

    #[test]
    fn test_effective_support_terms_falls_back_to_category_defaults() {
        let rules = default_rules();
        let wage_rules = rules.rules_for(Category::WageAdjustment);
        let terms = wage_rules[0].effective_support_terms();
        assert!(terms.contains(&"wage".to_string()));
        assert!(terms.contains(&"pay".to_string()));
    }
}
