use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::BatchConfig;

/// Actionable category assigned to one recommendation. Closed set; downstream
/// consumers must handle every variant plus `Other` as the catch-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    WageAdjustment,
    LeadTime,
    GeographicExpansion,
    WorkerQuality,
    RequirementBarriers,
    ShiftTiming,
    SupplyDemand,
    UrgentAction,
    Other,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::WageAdjustment,
        Category::LeadTime,
        Category::GeographicExpansion,
        Category::WorkerQuality,
        Category::RequirementBarriers,
        Category::ShiftTiming,
        Category::SupplyDemand,
        Category::UrgentAction,
        Category::Other,
    ];

    /// Stable snake_case name, also used in exports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::WageAdjustment => "wage_adjustment",
            Category::LeadTime => "lead_time",
            Category::GeographicExpansion => "geographic_expansion",
            Category::WorkerQuality => "worker_quality",
            Category::RequirementBarriers => "requirement_barriers",
            Category::ShiftTiming => "shift_timing",
            Category::SupplyDemand => "supply_demand",
            Category::UrgentAction => "urgent_action",
            Category::Other => "other",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    /// Lenient parse: accepts both the snake_case form and the
    /// SCREAMING_SNAKE form the escalation capability emits.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wage_adjustment" => Ok(Category::WageAdjustment),
            "lead_time" => Ok(Category::LeadTime),
            "geographic_expansion" => Ok(Category::GeographicExpansion),
            "worker_quality" => Ok(Category::WorkerQuality),
            "requirement_barriers" => Ok(Category::RequirementBarriers),
            "shift_timing" => Ok(Category::ShiftTiming),
            "supply_demand" => Ok(Category::SupplyDemand),
            "urgent_action" => Ok(Category::UrgentAction),
            "other" => Ok(Category::Other),
            other => Err(format!("unknown category '{}'", other)),
        }
    }
}

/// Action priority. Always assigned, never absent. `Low` is reserved for
/// explicitly low-severity matches and is not currently produced by the
/// heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Numeric rank for sorting: higher means more urgent.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured values pulled out of a recommendation text, independent of the
/// category. Empty lists are omitted from serialized output; `extra` carries
/// whatever loosely-typed key:value pairs the escalation capability returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedValues {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wage_amounts: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub percentages: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hours: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub miles: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub worker_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl ExtractedValues {
    pub fn is_empty(&self) -> bool {
        self.wage_amounts.is_empty()
            && self.percentages.is_empty()
            && self.hours.is_empty()
            && self.miles.is_empty()
            && self.worker_ids.is_empty()
            && self.extra.is_empty()
    }
}

/// Result of classifying a single recommendation string. Created once, never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: Category,
    /// Belief that the category assignment is correct, in [0, 1].
    pub confidence: f64,
    pub extracted_values: ExtractedValues,
    pub priority: Priority,
    pub specific_action: String,
    pub original_text: String,
}

/// Which analysis the upstream service should run for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    #[default]
    Past,
    Risk,
}

impl std::fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisType::Past => f.write_str("past"),
            AnalysisType::Risk => f.write_str("risk"),
        }
    }
}

impl std::str::FromStr for AnalysisType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "past" => Ok(AnalysisType::Past),
            "risk" => Ok(AnalysisType::Risk),
            other => Err(format!("unknown analysis type '{}' (expected past|risk)", other)),
        }
    }
}

/// What the upstream analysis service returned for one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub entity_id: String,
    pub analysis_type: AnalysisType,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub fill_rate: Option<f64>,
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Per-entity processing state machine.
///
/// `Pending -> Analyzing -> Classifying -> Completed`, with
/// `Analyzing -> Retrying -> Analyzing` loops on transient failure and any
/// unrecoverable step going to the terminal `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Analyzing,
    Classifying,
    Completed,
    Failed,
    Retrying,
}

impl ProcessingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Analyzing => "analyzing",
            ProcessingStatus::Classifying => "classifying",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::Retrying => "retrying",
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Container for one entity's processing outcome within a job. Owned by the
/// batch orchestrator for the lifetime of the job; failed entities retain
/// their error text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub entity_id: String,
    pub status: ProcessingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisResponse>,
    #[serde(default)]
    pub classifications: Vec<ClassificationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock seconds from start to terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
}

impl ProcessingResult {
    pub fn pending(entity_id: impl Into<String>) -> Self {
        ProcessingResult {
            entity_id: entity_id.into(),
            status: ProcessingStatus::Pending,
            analysis: None,
            classifications: Vec::new(),
            error: None,
            retry_count: 0,
            started_at: None,
            completed_at: None,
            processing_time: None,
        }
    }
}

/// Processing-time percentiles over all entities that reached a terminal
/// status, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingTimePercentiles {
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

/// Aggregated statistics attached to a job once every chunk has completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub total_entities: usize,
    pub completed: usize,
    pub failed: usize,
    pub total_recommendations: usize,
    pub high_priority_actions: usize,
    pub recommendations_by_category: BTreeMap<Category, usize>,
    /// completed / total, as a percentage.
    pub completion_rate: f64,
    pub average_processing_time: f64,
    pub total_processing_time: f64,
    pub processing_time_percentiles: ProcessingTimePercentiles,
}

/// One batch-processing run spanning many entities. Lives in process memory
/// until the caller exports or drops it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub job_id: Uuid,
    pub entity_ids: Vec<String>,
    pub analysis_type: AnalysisType,
    pub created_at: DateTime<Utc>,
    pub config: BatchConfig,
    pub results: HashMap<String, ProcessingResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<JobSummary>,
}

impl BatchJob {
    pub fn new(entity_ids: Vec<String>, analysis_type: AnalysisType, config: BatchConfig) -> Self {
        let results = entity_ids
            .iter()
            .map(|id| (id.clone(), ProcessingResult::pending(id.clone())))
            .collect();
        BatchJob {
            job_id: Uuid::new_v4(),
            entity_ids,
            analysis_type,
            created_at: Utc::now(),
            config,
            results,
            summary: None,
        }
    }

    pub fn total_entities(&self) -> usize {
        self.entity_ids.len()
    }

    pub fn completed_count(&self) -> usize {
        self.results
            .values()
            .filter(|r| r.status == ProcessingStatus::Completed)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.results
            .values()
            .filter(|r| r.status == ProcessingStatus::Failed)
            .count()
    }

    /// Progress percentage (0-100): entities in a terminal status over total.
    pub fn progress_percentage(&self) -> f64 {
        if self.entity_ids.is_empty() {
            return 100.0;
        }
        let processed = self
            .results
            .values()
            .filter(|r| r.status.is_terminal())
            .count();
        processed as f64 / self.total_entities() as f64 * 100.0
    }
}
