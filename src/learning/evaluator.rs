//! Effectiveness evaluation - scores a card from its usage history
//!
//! Evaluation is a pure function of the card and its history. Each step
//! (decayed effectiveness, usage statistics, performance metrics, context
//! ranking, trend, promotion score, recommendation) is exposed on its own so
//! it can be checked in isolation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::RwLock;

use super::trend::{analyze_trend, Trend, TrendAnalysis};
use super::usage::CardUsageOutcome;
use crate::config::LearningConfig;
use crate::knowledge::KnowledgeCard;
use crate::outcomes::record::Complexity;

/// Age in days at which a usage weighs 1/e of a fresh one
pub const DECAY_DAYS: f64 = 30.0;

/// Window for "recent" usages
pub const RECENT_WINDOW_DAYS: i64 = 30;

/// Share of the decayed history mean in the blended effectiveness
const HISTORY_WEIGHT: f64 = 0.7;

/// Satisfaction assumed when no user rating was given
const NEUTRAL_SATISFACTION: f64 = 0.5;

const SCORE_EFFECTIVENESS: f64 = 0.40;
const SCORE_SUCCESS_RATE: f64 = 0.25;
const SCORE_IMPACT: f64 = 0.20;
const SCORE_SATISFACTION: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Promote,
    Maintain,
    Demote,
    Retire,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recommendation::Promote => write!(f, "promote"),
            Recommendation::Maintain => write!(f, "maintain"),
            Recommendation::Demote => write!(f, "demote"),
            Recommendation::Retire => write!(f, "retire"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStatistics {
    pub total_usages: u64,
    pub recent_usages: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub avg_impact: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub avg_time_to_apply: f64,
    pub avg_quality_improvement: f64,
    pub avg_learning_value: f64,
    pub avg_user_satisfaction: f64,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            avg_time_to_apply: 0.0,
            avg_quality_improvement: 0.0,
            avg_learning_value: 0.0,
            avg_user_satisfaction: NEUTRAL_SATISFACTION,
        }
    }
}

/// Mean effectiveness for one (agent type, job category, complexity) group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextScore {
    pub agent_type: String,
    pub job_category: String,
    pub complexity: Complexity,
    pub effectiveness: f64,
    pub usages: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEffectiveness {
    /// Strongest groups first
    pub best: Vec<ContextScore>,
    /// Weakest groups first
    pub worst: Vec<ContextScore>,
}

/// Point-in-time assessment of one card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectivenessEvaluation {
    pub card_id: String,
    pub evaluated_at: DateTime<Utc>,
    pub current_effectiveness: f64,
    pub usage_stats: UsageStatistics,
    pub performance: PerformanceMetrics,
    pub contexts: ContextEffectiveness,
    pub trend: TrendAnalysis,
    pub promotion_score: f64,
    pub recommendation: Recommendation,
    pub reasoning: Vec<String>,
}

impl EffectivenessEvaluation {
    /// Whether every numeric field is a finite number
    pub fn is_finite(&self) -> bool {
        let p = &self.performance;
        let contexts = self.contexts.best.iter().chain(&self.contexts.worst);
        [
            self.current_effectiveness,
            self.promotion_score,
            self.usage_stats.success_rate,
            self.usage_stats.avg_impact,
            p.avg_time_to_apply,
            p.avg_quality_improvement,
            p.avg_learning_value,
            p.avg_user_satisfaction,
            self.trend.change_rate,
            self.trend.confidence,
        ]
        .iter()
        .all(|v| v.is_finite())
            && contexts.into_iter().all(|c| c.effectiveness.is_finite())
    }
}

/// Map any input into [0, 1]; NaN and infinities count as 0
fn unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

#[derive(Debug, Clone)]
pub struct EffectivenessEvaluator {
    promotion_threshold: f64,
    demotion_threshold: f64,
    retirement_min_usages: u64,
    retirement_max_effectiveness: f64,
}

impl EffectivenessEvaluator {
    pub fn new(config: &LearningConfig) -> Self {
        Self {
            promotion_threshold: config.promotion_threshold,
            demotion_threshold: config.demotion_threshold,
            retirement_min_usages: config.retirement_min_usages,
            retirement_max_effectiveness: config.retirement_max_effectiveness,
        }
    }

    pub fn promotion_threshold(&self) -> f64 {
        self.promotion_threshold
    }

    pub fn demotion_threshold(&self) -> f64 {
        self.demotion_threshold
    }

    pub fn evaluate(&self, card: &KnowledgeCard, history: &[CardUsageOutcome]) -> EffectivenessEvaluation {
        self.evaluate_at(card, history, Utc::now())
    }

    pub fn evaluate_at(
        &self,
        card: &KnowledgeCard,
        history: &[CardUsageOutcome],
        now: DateTime<Utc>,
    ) -> EffectivenessEvaluation {
        let current_effectiveness = decayed_effectiveness(card.stored_effectiveness(), history, now);
        let usage_stats = usage_statistics(history, now);
        let performance = performance_metrics(history);
        let contexts = context_effectiveness(history);

        let mut ordered: Vec<&CardUsageOutcome> = history.iter().collect();
        ordered.sort_by_key(|o| o.timestamp);
        let series: Vec<f64> = ordered.iter().map(|o| unit(o.outcome.effectiveness)).collect();
        let trend = analyze_trend(&series);

        let promotion_score = promotion_score(
            current_effectiveness,
            usage_stats.success_rate,
            usage_stats.avg_impact,
            performance.avg_user_satisfaction,
            trend.trend,
        );
        let (recommendation, reasoning) =
            self.recommend(promotion_score, current_effectiveness, &usage_stats, &trend);

        EffectivenessEvaluation {
            card_id: card.id.clone(),
            evaluated_at: now,
            current_effectiveness,
            usage_stats,
            performance,
            contexts,
            trend,
            promotion_score,
            recommendation,
            reasoning,
        }
    }

    /// First matching rule wins: promote, demote, retire, maintain
    pub fn recommend(
        &self,
        promotion_score: f64,
        effectiveness: f64,
        stats: &UsageStatistics,
        trend: &TrendAnalysis,
    ) -> (Recommendation, Vec<String>) {
        let mut reasoning = Vec::new();

        if promotion_score >= self.promotion_threshold {
            reasoning.push(format!(
                "promotion score {:.2} meets threshold {:.2}",
                promotion_score, self.promotion_threshold
            ));
            reasoning.push(format!("success rate {:.0}%", stats.success_rate * 100.0));
            if trend.trend == Trend::Improving {
                reasoning.push(format!("effectiveness improving by {:.3} per use", trend.change_rate));
            }
            return (Recommendation::Promote, reasoning);
        }

        if effectiveness < self.demotion_threshold {
            reasoning.push(format!(
                "effectiveness {:.2} below demotion threshold {:.2}",
                effectiveness, self.demotion_threshold
            ));
            if trend.trend == Trend::Declining {
                reasoning.push(format!("effectiveness declining by {:.3} per use", trend.change_rate.abs()));
            }
            return (Recommendation::Demote, reasoning);
        }

        if stats.total_usages > self.retirement_min_usages
            && effectiveness < self.retirement_max_effectiveness
            && stats.recent_usages == 0
        {
            reasoning.push(format!(
                "{} usages with effectiveness {:.2} and none in the last {} days",
                stats.total_usages, effectiveness, RECENT_WINDOW_DAYS
            ));
            return (Recommendation::Retire, reasoning);
        }

        reasoning.push(format!(
            "promotion score {:.2} below threshold {:.2}",
            promotion_score, self.promotion_threshold
        ));
        reasoning.push(format!(
            "effectiveness {:.2} at or above demotion threshold {:.2}",
            effectiveness, self.demotion_threshold
        ));
        (Recommendation::Maintain, reasoning)
    }
}

/// Decay-weighted mean of usage effectiveness blended 70/30 with the stored value.
/// Without history the stored value is returned as is.
pub fn decayed_effectiveness(stored: f64, history: &[CardUsageOutcome], now: DateTime<Utc>) -> f64 {
    let stored = unit(stored);
    if history.is_empty() {
        return stored;
    }

    let mut weighted = 0.0;
    let mut weights = 0.0;
    for outcome in history {
        let age_days = ((now - outcome.timestamp).num_seconds() as f64 / 86_400.0).max(0.0);
        let weight = (-age_days / DECAY_DAYS).exp();
        weighted += weight * unit(outcome.outcome.effectiveness);
        weights += weight;
    }

    let computed = if weights > f64::EPSILON {
        weighted / weights
    } else {
        // every usage is ancient enough for its weight to underflow
        mean(history.iter().map(|o| unit(o.outcome.effectiveness))).unwrap_or(stored)
    };
    unit(HISTORY_WEIGHT * computed + (1.0 - HISTORY_WEIGHT) * stored)
}

pub fn usage_statistics(history: &[CardUsageOutcome], now: DateTime<Utc>) -> UsageStatistics {
    let recent_cutoff = now - Duration::days(RECENT_WINDOW_DAYS);
    let total = history.len() as u64;
    let success_count = history.iter().filter(|o| o.outcome.success).count() as u64;

    UsageStatistics {
        total_usages: total,
        recent_usages: history.iter().filter(|o| o.timestamp >= recent_cutoff).count() as u64,
        success_count,
        failure_count: total - success_count,
        success_rate: if total == 0 { 0.0 } else { success_count as f64 / total as f64 },
        avg_impact: mean(history.iter().map(|o| o.impact.combined())).unwrap_or(0.0),
    }
}

pub fn performance_metrics(history: &[CardUsageOutcome]) -> PerformanceMetrics {
    PerformanceMetrics {
        avg_time_to_apply: mean(history.iter().map(|o| o.outcome.time_to_apply)).unwrap_or(0.0),
        avg_quality_improvement: mean(history.iter().map(|o| o.impact.quality_improvement)).unwrap_or(0.0),
        avg_learning_value: mean(history.iter().map(|o| o.impact.learning_value)).unwrap_or(0.0),
        avg_user_satisfaction: mean(history.iter().filter_map(|o| o.outcome.user_satisfaction).map(unit))
            .unwrap_or(NEUTRAL_SATISFACTION),
    }
}

/// Rank usage groups by mean effectiveness and split the ranking at its midpoint
pub fn context_effectiveness(history: &[CardUsageOutcome]) -> ContextEffectiveness {
    let mut groups: HashMap<(String, String, Complexity), (f64, usize)> = HashMap::new();
    for outcome in history {
        let key = (
            outcome.context.agent_type.clone(),
            outcome.context.job_category.clone(),
            outcome.context.complexity,
        );
        let entry = groups.entry(key).or_insert((0.0, 0));
        entry.0 += unit(outcome.outcome.effectiveness);
        entry.1 += 1;
    }

    let mut ranked: Vec<ContextScore> = groups
        .into_iter()
        .map(|((agent_type, job_category, complexity), (sum, usages))| ContextScore {
            agent_type,
            job_category,
            complexity,
            effectiveness: sum / usages as f64,
            usages,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.effectiveness
            .partial_cmp(&a.effectiveness)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.agent_type.cmp(&b.agent_type))
            .then_with(|| a.job_category.cmp(&b.job_category))
            .then_with(|| a.complexity.cmp(&b.complexity))
    });

    let mut worst = ranked.split_off((ranked.len() + 1) / 2);
    worst.reverse();
    ContextEffectiveness { best: ranked, worst }
}

/// Weighted blend of effectiveness, success rate, impact and satisfaction,
/// scaled by the trend and kept within [0, 1]
pub fn promotion_score(
    effectiveness: f64,
    success_rate: f64,
    avg_impact: f64,
    user_satisfaction: f64,
    trend: Trend,
) -> f64 {
    let base = SCORE_EFFECTIVENESS * effectiveness
        + SCORE_SUCCESS_RATE * success_rate
        + SCORE_IMPACT * avg_impact
        + SCORE_SATISFACTION * user_satisfaction;
    unit(base * trend.factor())
}

/// Bounded per-card evaluation history, newest last
pub struct EvaluationHistory {
    entries: RwLock<HashMap<String, VecDeque<EffectivenessEvaluation>>>,
    max_per_card: usize,
}

impl EvaluationHistory {
    pub fn new(max_per_card: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_per_card: max_per_card.max(1),
        }
    }

    pub async fn push(&self, evaluation: EffectivenessEvaluation) {
        let mut entries = self.entries.write().await;
        let history = entries.entry(evaluation.card_id.clone()).or_default();
        history.push_back(evaluation);
        while history.len() > self.max_per_card {
            history.pop_front();
        }
    }

    pub async fn history_for(&self, card_id: &str) -> Vec<EffectivenessEvaluation> {
        self.entries
            .read()
            .await
            .get(card_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn latest(&self, card_id: &str) -> Option<EffectivenessEvaluation> {
        self.entries.read().await.get(card_id).and_then(|h| h.back().cloned())
    }

    pub async fn snapshot(&self) -> BTreeMap<String, Vec<EffectivenessEvaluation>> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(id, h)| (id.clone(), h.iter().cloned().collect()))
            .collect()
    }

    pub async fn restore(&self, snapshot: BTreeMap<String, Vec<EffectivenessEvaluation>>) {
        let mut restored = HashMap::with_capacity(snapshot.len());
        for (card_id, list) in snapshot {
            let skip = list.len().saturating_sub(self.max_per_card);
            restored.insert(card_id, list.into_iter().skip(skip).collect::<VecDeque<_>>());
        }
        *self.entries.write().await = restored;
    }
}
