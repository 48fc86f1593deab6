//! Feedback loop - turns a finished job into log and usage entries

use std::sync::Arc;
use tracing::debug;

use super::usage::{CardUsageOutcome, UsageContext, UsageImpact, UsageResult, UsageHistory};
use crate::error::{LearningError, Result};
use crate::outcomes::record::{CardVerdict, KnowledgeUsage, OutcomeRecord};
use crate::outcomes::{OutcomeLog, StoredOutcome};

pub struct FeedbackLoop {
    log: Arc<OutcomeLog>,
    usage: Arc<UsageHistory>,
}

impl FeedbackLoop {
    pub fn new(log: Arc<OutcomeLog>, usage: Arc<UsageHistory>) -> Self {
        Self { log, usage }
    }

    /// Append the outcome, then record one usage per knowledge card the job consulted.
    /// Usages are validated before the append, so an error after it can only be an
    /// integration failure. Stops at the first usage the knowledge store rejects.
    pub async fn record_job(&self, record: OutcomeRecord) -> Result<StoredOutcome> {
        let usages: Vec<CardUsageOutcome> = record
            .context
            .knowledge_usage
            .iter()
            .filter(|usage| !usage.card_id.trim().is_empty())
            .map(|usage| usage_outcome(&record, usage))
            .collect();
        if let Some(bad) = usages.iter().find(|u| !u.is_finite()) {
            return Err(LearningError::validation(format!(
                "usage of card {} by job {} carries a non-finite number",
                bad.card_id, bad.job_id
            )));
        }

        let stored = self.log.append(record)?;
        let count = usages.len();
        for usage in usages {
            self.usage.record(usage).await?;
        }
        debug!("Recorded job {} with {} card usages", stored.record.job_id, count);
        Ok(stored)
    }
}

/// Usage entry for one card consulted by the job in `record`
pub fn usage_outcome(record: &OutcomeRecord, usage: &KnowledgeUsage) -> CardUsageOutcome {
    let success = match usage.outcome {
        CardVerdict::Success => true,
        CardVerdict::Failure | CardVerdict::Partial => false,
        CardVerdict::NotApplicable => record.success,
    };

    CardUsageOutcome {
        card_id: usage.card_id.clone(),
        job_id: record.job_id.clone(),
        timestamp: record.timestamp,
        context: UsageContext {
            agent_type: record
                .metadata
                .agent_types
                .first()
                .cloned()
                .unwrap_or_else(|| "unknown".to_string()),
            job_category: record.metadata.category.clone(),
            complexity: record.metadata.complexity,
            phase: "execution".to_string(),
        },
        outcome: UsageResult {
            success,
            relevance: usage.relevance_score,
            effectiveness: usage.effectiveness,
            time_to_apply: 0.0,
            user_satisfaction: None,
        },
        impact: UsageImpact {
            quality_improvement: record.quality.overall_score,
            performance_gain: 0.0,
            learning_value: record.learning.learning_score,
            time_saved: 0.0,
        },
        feedback: Default::default(),
    }
}
