//! JSON and CSV rendering of outcome sets

use serde::{Deserialize, Serialize};

use super::fingerprint::StoredOutcome;
use crate::error::{LearningError, Result};

/// Fixed CSV column order
pub const CSV_COLUMNS: [&str; 20] = [
    "jobId",
    "issueId",
    "executionId",
    "timestamp",
    "success",
    "status",
    "category",
    "complexity",
    "agentTypes",
    "duration",
    "overallScore",
    "codeQuality",
    "testCoverage",
    "maintainability",
    "security",
    "performance",
    "linesAdded",
    "linesRemoved",
    "filesModified",
    "learningGenerated",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn render(&self, records: &[StoredOutcome]) -> Result<String> {
        match self {
            ExportFormat::Json => render_json(records),
            ExportFormat::Csv => Ok(render_csv(records)),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(format!("unsupported export format '{}', expected json or csv", other)),
        }
    }
}

/// Pretty-printed JSON array
pub fn render_json(records: &[StoredOutcome]) -> Result<String> {
    serde_json::to_string_pretty(records).map_err(|e| LearningError::io("render JSON export", e))
}

pub fn render_csv(records: &[StoredOutcome]) -> String {
    let mut out = String::with_capacity(256 * (records.len() + 1));
    out.push_str(&CSV_COLUMNS.join(","));
    out.push('\n');

    for stored in records {
        let r = &stored.record;
        let q = &r.quality.components;
        let changes = &r.metrics.code_changes;
        let row = [
            r.job_id.clone(),
            r.issue_id.clone(),
            r.execution_id.clone(),
            r.timestamp.to_rfc3339(),
            r.success.to_string(),
            r.status.to_string(),
            r.metadata.category.clone(),
            r.metadata.complexity.to_string(),
            r.metadata.agent_types.join(";"),
            r.metadata.duration.to_string(),
            r.quality.overall_score.to_string(),
            q.code_quality.to_string(),
            q.test_coverage.to_string(),
            q.maintainability.to_string(),
            q.security.to_string(),
            q.performance.to_string(),
            changes.lines_added.to_string(),
            changes.lines_removed.to_string(),
            changes.files_modified.to_string(),
            r.learning.learning_generated.to_string(),
        ];
        let escaped: Vec<String> = row.iter().map(|v| csv_escape(v)).collect();
        out.push_str(&escaped.join(","));
        out.push('\n');
    }
    out
}

/// Quote a field when it holds a comma, quote or line break
pub fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
