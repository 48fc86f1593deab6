//! Usage history - bounded per-card record of how each card worked out

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{LearningError, Result};
use crate::knowledge::{KnowledgeStore, UsageSummary};
use crate::outcomes::record::Complexity;

/// Where and by whom a card was consulted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageContext {
    pub agent_type: String,
    pub job_category: String,
    pub complexity: Complexity,
    /// Job phase the card was applied in (planning, execution, review...)
    pub phase: String,
}

impl Default for UsageContext {
    fn default() -> Self {
        Self {
            agent_type: "unknown".to_string(),
            job_category: "general".to_string(),
            complexity: Complexity::Medium,
            phase: "execution".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageResult {
    pub success: bool,
    pub relevance: f64,
    pub effectiveness: f64,
    /// Milliseconds between retrieving the card and applying it
    pub time_to_apply: f64,
    /// Rating in [0, 1] when the user gave one
    pub user_satisfaction: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageImpact {
    pub quality_improvement: f64,
    pub performance_gain: f64,
    pub learning_value: f64,
    /// Milliseconds saved compared to working without the card
    pub time_saved: f64,
}

impl UsageImpact {
    /// Mean of the quality, performance and learning deltas
    pub fn combined(&self) -> f64 {
        (self.quality_improvement + self.performance_gain + self.learning_value) / 3.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageFeedback {
    pub positive: Vec<String>,
    pub negative: Vec<String>,
    pub suggestions: Vec<String>,
}

/// One card consulted during one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardUsageOutcome {
    pub card_id: String,
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context: UsageContext,
    #[serde(default)]
    pub outcome: UsageResult,
    #[serde(default)]
    pub impact: UsageImpact,
    #[serde(default)]
    pub feedback: UsageFeedback,
}

impl CardUsageOutcome {
    pub fn new(card_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            card_id: card_id.into(),
            job_id: job_id.into(),
            timestamp: Utc::now(),
            context: UsageContext::default(),
            outcome: UsageResult::default(),
            impact: UsageImpact::default(),
            feedback: UsageFeedback::default(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_result(mut self, success: bool, effectiveness: f64) -> Self {
        self.outcome.success = success;
        self.outcome.effectiveness = effectiveness;
        self
    }

    pub fn with_context(mut self, context: UsageContext) -> Self {
        self.context = context;
        self
    }

    /// Whether every numeric field is a finite number
    pub fn is_finite(&self) -> bool {
        let o = &self.outcome;
        let i = &self.impact;
        [
            o.relevance,
            o.effectiveness,
            o.time_to_apply,
            o.user_satisfaction.unwrap_or(0.0),
            i.quality_improvement,
            i.performance_gain,
            i.learning_value,
            i.time_saved,
        ]
        .iter()
        .all(|v| v.is_finite())
    }

    pub fn summary(&self) -> UsageSummary {
        UsageSummary {
            timestamp: self.timestamp,
            success: self.outcome.success,
            relevance: self.outcome.relevance,
            effectiveness: self.outcome.effectiveness,
        }
    }
}

/// Per-card ring buffers of usage outcomes, newest last
pub struct UsageHistory {
    knowledge: Arc<dyn KnowledgeStore>,
    outcomes: RwLock<HashMap<String, VecDeque<CardUsageOutcome>>>,
    max_per_card: usize,
}

impl UsageHistory {
    pub fn new(knowledge: Arc<dyn KnowledgeStore>, max_per_card: usize) -> Self {
        Self {
            knowledge,
            outcomes: RwLock::new(HashMap::new()),
            max_per_card: max_per_card.max(1),
        }
    }

    /// Append a usage outcome and report it to the knowledge store.
    /// Non-finite numbers are rejected before anything is kept.
    /// A store failure is returned after the outcome has been kept locally.
    pub async fn record(&self, outcome: CardUsageOutcome) -> Result<()> {
        if !outcome.is_finite() {
            return Err(LearningError::validation(format!(
                "usage of card {} by job {} carries a non-finite number",
                outcome.card_id, outcome.job_id
            )));
        }
        let summary = outcome.summary();
        let card_id = outcome.card_id.clone();
        let job_id = outcome.job_id.clone();

        {
            let mut outcomes = self.outcomes.write().await;
            let history = outcomes.entry(card_id.clone()).or_default();
            history.push_back(outcome);
            while history.len() > self.max_per_card {
                history.pop_front();
            }
            debug!("Recorded usage of card {} ({} kept)", card_id, history.len());
        }

        self.knowledge
            .record_usage(&card_id, &job_id, &summary)
            .await
            .map_err(|e| LearningError::integration("recordUsage", e))
    }

    /// Full bounded history for a card, oldest first
    pub async fn history_for(&self, card_id: &str) -> Vec<CardUsageOutcome> {
        self.outcomes
            .read()
            .await
            .get(card_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn card_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.outcomes.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn total_usages(&self) -> usize {
        self.outcomes.read().await.values().map(VecDeque::len).sum()
    }

    /// Copy of every card's history, keyed by card id
    pub async fn snapshot(&self) -> BTreeMap<String, Vec<CardUsageOutcome>> {
        self.outcomes
            .read()
            .await
            .iter()
            .map(|(id, h)| (id.clone(), h.iter().cloned().collect()))
            .collect()
    }

    /// Replace all history, keeping the newest entries of any oversized list
    pub async fn restore(&self, snapshot: BTreeMap<String, Vec<CardUsageOutcome>>) {
        let mut restored = HashMap::with_capacity(snapshot.len());
        for (card_id, list) in snapshot {
            let list: Vec<CardUsageOutcome> = list.into_iter().filter(CardUsageOutcome::is_finite).collect();
            let skip = list.len().saturating_sub(self.max_per_card);
            restored.insert(card_id, list.into_iter().skip(skip).collect::<VecDeque<_>>());
        }
        *self.outcomes.write().await = restored;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::MockKnowledgeStore;

    fn accepting_store() -> Arc<dyn KnowledgeStore> {
        let mut store = MockKnowledgeStore::new();
        store.expect_record_usage().returning(|_, _, _| Ok(()));
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_history_is_capped_fifo() {
        let history = UsageHistory::new(accepting_store(), 3);
        for i in 0..5 {
            history.record(CardUsageOutcome::new("card-1", format!("job-{}", i))).await.unwrap();
        }

        let kept: Vec<_> = history.history_for("card-1").await.into_iter().map(|o| o.job_id).collect();
        assert_eq!(kept, vec!["job-2", "job-3", "job-4"]);
        assert!(history.history_for("other").await.is_empty());
    }

    #[tokio::test]
    async fn test_forwards_summary_to_store() {
        let mut store = MockKnowledgeStore::new();
        store
            .expect_record_usage()
            .withf(|card, job, summary| card == "card-1" && job == "job-1" && summary.success)
            .times(1)
            .returning(|_, _, _| Ok(()));
        let history = UsageHistory::new(Arc::new(store), 10);

        history
            .record(CardUsageOutcome::new("card-1", "job-1").with_result(true, 0.9))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let mut store = MockKnowledgeStore::new();
        store
            .expect_record_usage()
            .returning(|_, _, _| Err(anyhow::anyhow!("store offline")));
        let history = UsageHistory::new(Arc::new(store), 10);

        let err = history.record(CardUsageOutcome::new("card-1", "job-1")).await.unwrap_err();
        assert!(err.is_integration());
    }

    #[tokio::test]
    async fn test_non_finite_usage_rejected() {
        let mut store = MockKnowledgeStore::new();
        store.expect_record_usage().never();
        let history = UsageHistory::new(Arc::new(store), 10);

        let nan = CardUsageOutcome::new("card-1", "job-1").with_result(true, f64::NAN);
        let mut infinite = CardUsageOutcome::new("card-1", "job-2");
        infinite.outcome.user_satisfaction = Some(f64::INFINITY);

        for outcome in [nan, infinite] {
            let err = history.record(outcome).await.unwrap_err();
            assert!(matches!(err, LearningError::Validation(_)));
        }
        assert!(history.history_for("card-1").await.is_empty());
    }

    #[tokio::test]
    async fn test_restore_trims_to_cap() {
        let history = UsageHistory::new(accepting_store(), 2);
        let mut snapshot = BTreeMap::new();
        snapshot.insert(
            "card-1".to_string(),
            (0..4).map(|i| CardUsageOutcome::new("card-1", format!("job-{}", i))).collect(),
        );
        history.restore(snapshot).await;

        let kept: Vec<_> = history.history_for("card-1").await.into_iter().map(|o| o.job_id).collect();
        assert_eq!(kept, vec!["job-2", "job-3"]);
        assert_eq!(history.total_usages().await, 2);
    }

    #[tokio::test]
    async fn test_restore_drops_non_finite_entries() {
        let history = UsageHistory::new(accepting_store(), 10);
        let mut snapshot = BTreeMap::new();
        snapshot.insert(
            "card-1".to_string(),
            vec![
                CardUsageOutcome::new("card-1", "job-1").with_result(true, 0.8),
                CardUsageOutcome::new("card-1", "job-2").with_result(true, f64::NAN),
            ],
        );
        history.restore(snapshot).await;

        let kept: Vec<_> = history.history_for("card-1").await.into_iter().map(|o| o.job_id).collect();
        assert_eq!(kept, vec!["job-1"]);
    }
}
