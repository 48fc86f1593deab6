//! Outcome records - one structured entry per completed job
//!
//! Callers build a record when a job finishes (usually through
//! [`OutcomeRecord::new`] plus `mark_success`/`mark_failure`) and hand it
//! to the outcome log, which validates it and stamps computed fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{LearningError, Result};

/// Schema version written as `_version` on stored records
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Fields a raw record must carry before it can be typed
pub const REQUIRED_FIELDS: [&str; 6] = ["jobId", "issueId", "executionId", "timestamp", "success", "status"];

/// Terminal status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Completed,
    Failed,
    Partial,
    Cancelled,
    Error,
}

impl OutcomeStatus {
    pub const ALL: [OutcomeStatus; 5] = [
        OutcomeStatus::Completed,
        OutcomeStatus::Failed,
        OutcomeStatus::Partial,
        OutcomeStatus::Cancelled,
        OutcomeStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Completed => "completed",
            OutcomeStatus::Failed => "failed",
            OutcomeStatus::Partial => "partial",
            OutcomeStatus::Cancelled => "cancelled",
            OutcomeStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Job complexity as reported by the planner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
    VeryHigh,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Low => "low",
            Complexity::Medium => "medium",
            Complexity::High => "high",
            Complexity::VeryHigh => "very-high",
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Complexity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Complexity::Low),
            "medium" => Ok(Complexity::Medium),
            "high" => Ok(Complexity::High),
            "very-high" | "very_high" | "veryhigh" => Ok(Complexity::VeryHigh),
            other => Err(format!("unknown complexity '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Who ran the job and how big it was
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutcomeMetadata {
    pub agent_types: Vec<String>,
    pub category: String,
    pub complexity: Complexity,
    /// Wall-clock duration in milliseconds
    pub duration: u64,
    pub priority: JobPriority,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PerformanceCounters {
    pub total_duration: u64,
    pub queue_time: u64,
    pub execution_time: u64,
    pub agent_durations: HashMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CodeChangeCounters {
    pub lines_added: u64,
    pub lines_removed: u64,
    pub files_modified: u64,
    pub files_created: u64,
    pub files_deleted: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QualityGateResults {
    pub linting_passed: bool,
    pub type_check_passed: bool,
    pub tests_passed: bool,
    pub security_scan_passed: bool,
    pub coverage_percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceCounters {
    pub memory_mb: f64,
    pub cpu_percent: f64,
    pub disk_mb: f64,
    pub network_requests: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutcomeMetrics {
    pub performance: PerformanceCounters,
    pub code_changes: CodeChangeCounters,
    pub quality_gates: QualityGateResults,
    pub resources: ResourceCounters,
}

/// How a consulted card worked out for this job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CardVerdict {
    Success,
    Failure,
    Partial,
    #[default]
    NotApplicable,
}

/// A knowledge card consulted while the job ran
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KnowledgeUsage {
    pub card_id: String,
    pub title: String,
    pub relevance_score: f64,
    pub effectiveness: f64,
    pub outcome: CardVerdict,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PatternMatch {
    pub pattern_id: String,
    pub description: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutcomeContext {
    pub project_path: String,
    pub project_type: String,
    pub branch: Option<String>,
    pub knowledge_usage: Vec<KnowledgeUsage>,
    pub patterns: Vec<PatternMatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QualityComponents {
    pub code_quality: f64,
    pub test_coverage: f64,
    pub maintainability: f64,
    pub security: f64,
    pub performance: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QualityIssue {
    pub severity: String,
    pub category: String,
    pub description: String,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QualityAssessment {
    /// Overall score in [0, 1]
    pub overall_score: f64,
    pub components: QualityComponents,
    pub issues: Vec<QualityIssue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LearningSignals {
    pub learning_generated: bool,
    pub knowledge_created: Vec<String>,
    pub knowledge_updated: Vec<String>,
    pub learning_score: f64,
    pub reuse_score: f64,
    pub adaptability_score: f64,
}

/// One completed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    pub job_id: String,
    pub issue_id: String,
    pub execution_id: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub status: OutcomeStatus,
    #[serde(default)]
    pub metadata: OutcomeMetadata,
    #[serde(default)]
    pub metrics: OutcomeMetrics,
    #[serde(default)]
    pub context: OutcomeContext,
    #[serde(default)]
    pub quality: QualityAssessment,
    #[serde(default)]
    pub learning: LearningSignals,
}

impl OutcomeRecord {
    /// A well-formed default outcome: partial, unsuccessful, stamped now
    pub fn new(job_id: impl Into<String>, issue_id: impl Into<String>) -> Self {
        Self::with_execution(job_id, issue_id, uuid::Uuid::new_v4().to_string())
    }

    pub fn with_execution(
        job_id: impl Into<String>,
        issue_id: impl Into<String>,
        execution_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            issue_id: issue_id.into(),
            execution_id: execution_id.into(),
            timestamp: now,
            success: false,
            status: OutcomeStatus::Partial,
            metadata: OutcomeMetadata {
                category: "general".to_string(),
                started_at: Some(now),
                ..Default::default()
            },
            metrics: OutcomeMetrics::default(),
            context: OutcomeContext::default(),
            quality: QualityAssessment {
                overall_score: 0.5,
                ..Default::default()
            },
            learning: LearningSignals::default(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_agents<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata.agent_types = agents.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.metadata.category = category.into();
        self
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.metadata.complexity = complexity;
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.metadata.duration = duration_ms;
        self.metrics.performance.total_duration = duration_ms;
        self
    }

    pub fn with_quality(mut self, overall_score: f64) -> Self {
        self.quality.overall_score = overall_score;
        self
    }

    pub fn with_card_usage(mut self, usage: KnowledgeUsage) -> Self {
        self.context.knowledge_usage.push(usage);
        self
    }

    /// Mark the job as completed successfully
    pub fn mark_success(mut self) -> Self {
        self.success = true;
        self.status = OutcomeStatus::Completed;
        self.metadata.completed_at = Some(Utc::now());
        self
    }

    /// Mark the job as failed, recording the reason as a high-severity issue
    pub fn mark_failure(mut self, reason: impl Into<String>) -> Self {
        self.success = false;
        self.status = OutcomeStatus::Failed;
        self.metadata.completed_at = Some(Utc::now());
        self.quality.issues.push(QualityIssue {
            severity: "high".to_string(),
            category: "execution".to_string(),
            description: reason.into(),
            file: None,
        });
        self
    }

    /// Check identifiers of an already-typed record
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("jobId", &self.job_id),
            ("issueId", &self.issue_id),
            ("executionId", &self.execution_id),
        ] {
            if value.trim().is_empty() {
                return Err(LearningError::validation(format!("missing required field: {}", field)));
            }
        }
        Ok(())
    }

    /// Validate and type a raw JSON record
    pub fn from_json(value: Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| LearningError::validation("outcome record must be a JSON object"))?;

        for field in REQUIRED_FIELDS {
            match object.get(field) {
                None | Some(Value::Null) => {
                    return Err(LearningError::validation(format!("missing required field: {}", field)));
                }
                Some(_) => {}
            }
        }

        let timestamp = object.get("timestamp").and_then(Value::as_str).unwrap_or_default();
        if DateTime::parse_from_rfc3339(timestamp).is_err() {
            return Err(LearningError::validation(format!("invalid timestamp: {:?}", object["timestamp"])));
        }

        let status = object.get("status").and_then(Value::as_str).unwrap_or_default();
        if OutcomeStatus::parse(status).is_none() {
            return Err(LearningError::validation(format!(
                "invalid status {:?}, expected one of completed|failed|partial|cancelled|error",
                object["status"]
            )));
        }

        if !object["success"].is_boolean() {
            return Err(LearningError::validation("success must be a boolean"));
        }

        let record: OutcomeRecord = serde_json::from_value(value)
            .map_err(|e| LearningError::validation(format!("malformed outcome record: {}", e)))?;
        record.validate()?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw() -> Value {
        json!({
            "jobId": "job-1",
            "issueId": "issue-1",
            "executionId": "exec-1",
            "timestamp": "2026-03-01T10:00:00Z",
            "success": true,
            "status": "completed",
            "metadata": { "agentTypes": ["code-implementer"], "category": "feature", "complexity": "high", "duration": 4200 }
        })
    }

    #[test]
    fn test_default_outcome_is_well_formed() {
        let record = OutcomeRecord::new("job-1", "issue-1");
        assert!(record.validate().is_ok());
        assert!(!record.success);
        assert_eq!(record.status, OutcomeStatus::Partial);
        assert!(!record.execution_id.is_empty());
    }

    #[test]
    fn test_mark_success_and_failure() {
        let ok = OutcomeRecord::new("job-1", "issue-1").mark_success();
        assert!(ok.success);
        assert_eq!(ok.status, OutcomeStatus::Completed);
        assert!(ok.metadata.completed_at.is_some());

        let failed = OutcomeRecord::new("job-2", "issue-1").mark_failure("tests did not compile");
        assert!(!failed.success);
        assert_eq!(failed.status, OutcomeStatus::Failed);
        assert_eq!(failed.quality.issues[0].description, "tests did not compile");
    }

    #[test]
    fn test_from_json_accepts_partial_nested_fields() {
        let record = OutcomeRecord::from_json(raw()).unwrap();
        assert_eq!(record.job_id, "job-1");
        assert_eq!(record.metadata.complexity, Complexity::High);
        assert_eq!(record.metadata.duration, 4200);
        assert_eq!(record.quality.overall_score, 0.0);
    }

    #[test]
    fn test_from_json_rejects_missing_fields() {
        for field in REQUIRED_FIELDS {
            let mut value = raw();
            value.as_object_mut().unwrap().remove(field);
            let err = OutcomeRecord::from_json(value).unwrap_err();
            assert!(err.to_string().contains(field), "{} not named in {}", field, err);
        }
    }

    #[test]
    fn test_from_json_rejects_bad_timestamp_and_status() {
        let mut value = raw();
        value["timestamp"] = json!("yesterday-ish");
        assert!(matches!(OutcomeRecord::from_json(value), Err(LearningError::Validation(_))));

        let mut value = raw();
        value["status"] = json!("done");
        let err = OutcomeRecord::from_json(value).unwrap_err();
        assert!(err.to_string().contains("invalid status"));
    }

    #[test]
    fn test_blank_identifier_rejected() {
        let mut record = OutcomeRecord::new("job-1", "issue-1");
        record.issue_id = "  ".to_string();
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(OutcomeStatus::parse("cancelled"), Some(OutcomeStatus::Cancelled));
        assert_eq!(OutcomeStatus::parse("Cancelled"), None);
        assert_eq!("very-high".parse::<Complexity>(), Ok(Complexity::VeryHigh));
    }
}
