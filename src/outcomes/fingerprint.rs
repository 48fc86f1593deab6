//! Computed fields stamped onto every stored outcome

use chrono::SecondsFormat;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::record::{OutcomeRecord, SCHEMA_VERSION};
use crate::error::{LearningError, Result};

/// Hex characters kept from the id digest
const RECORD_ID_LEN: usize = 16;

static PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedFields {
    /// SHA-256 of the record serialized with sorted keys
    pub hash: String,
    /// Serialized record size in bytes
    pub size: usize,
    /// Lower-cased, punctuation-free search blob
    pub indexable_text: String,
}

/// A record as it sits in the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOutcome {
    #[serde(flatten)]
    pub record: OutcomeRecord,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_version")]
    pub version: String,
    #[serde(rename = "_computedFields")]
    pub computed: ComputedFields,
}

impl StoredOutcome {
    /// Stamp id, version and computed fields onto a validated record
    pub fn seal(record: OutcomeRecord) -> Result<Self> {
        // serde_json's default map is ordered, so this text has sorted keys
        let canonical = serde_json::to_value(&record)
            .and_then(|v| serde_json::to_string(&v))
            .map_err(|e| LearningError::io("serialize outcome", e))?;

        Ok(Self {
            id: record_id(&record),
            version: SCHEMA_VERSION.to_string(),
            computed: ComputedFields {
                hash: hex::encode(Sha256::digest(canonical.as_bytes())),
                size: canonical.len(),
                indexable_text: indexable_text(&record),
            },
            record,
        })
    }

    /// One newline-terminated JSON line
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self).map_err(|e| LearningError::io("serialize outcome", e))?;
        line.push('\n');
        Ok(line)
    }
}

/// Deterministic id over `jobId|issueId|executionId|timestamp`
pub fn record_id(record: &OutcomeRecord) -> String {
    let key = format!(
        "{}|{}|{}|{}",
        record.job_id,
        record.issue_id,
        record.execution_id,
        record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    );
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    digest[..RECORD_ID_LEN].to_string()
}

/// Search blob built from the descriptive parts of a record
pub fn indexable_text(record: &OutcomeRecord) -> String {
    let mut parts: Vec<&str> = vec![record.metadata.category.as_str(), record.metadata.complexity.as_str()];
    parts.extend(record.metadata.agent_types.iter().map(String::as_str));
    parts.push(record.context.project_type.as_str());
    parts.extend(record.context.knowledge_usage.iter().map(|u| u.title.as_str()));
    parts.extend(record.context.patterns.iter().map(|p| p.description.as_str()));
    parts.extend(record.quality.issues.iter().map(|i| i.description.as_str()));

    let joined = parts.join(" ").to_lowercase();
    let stripped = PUNCTUATION.replace_all(&joined, "");
    WHITESPACE.replace_all(stripped.trim(), " ").into_owned()
}
