//! Promotion Engine - moves knowledge cards along the tier ladder
//!
//! Cards that keep helping are promoted one tier and tagged, cards that stop
//! helping are demoted, and heavily used cards nobody reaches for any more are
//! archived and removed. A batch walks every card in the store; one card
//! failing never stops the rest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::evaluator::{EffectivenessEvaluation, EffectivenessEvaluator, EvaluationHistory, Recommendation};
use super::snapshot::{LearningSnapshot, SnapshotStore};
use super::usage::UsageHistory;
use crate::config::{Config, PerformanceThresholds};
use crate::error::{LearningError, Result};
use crate::knowledge::{CardPatch, CardQuery, CardTier, KnowledgeCard, KnowledgeStore, HIGH_EFFECTIVENESS_TAG};

/// Effectiveness multiplier applied on promotion (capped at 1.0)
const PROMOTION_BOOST: f64 = 1.1;

/// Effectiveness multiplier applied on demotion (floored at 0.1)
const DEMOTION_PENALTY: f64 = 0.9;
const DEMOTION_FLOOR: f64 = 0.1;

/// A card that moved one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierChange {
    pub card_id: String,
    pub title: String,
    pub from: CardTier,
    pub to: CardTier,
    /// Effectiveness written back to the card
    pub effectiveness: f64,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetiredCard {
    pub card_id: String,
    pub title: String,
    pub archive_path: PathBuf,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardFailure {
    pub card_id: String,
    pub error: String,
}

/// Rough per-card gain expected from a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedImpact {
    pub quality_improvement: f64,
    pub performance_gain: f64,
    pub learning_efficiency: f64,
}

impl ExpectedImpact {
    pub fn estimate(promoted: usize, demoted: usize, retired: usize, evaluated: usize) -> Self {
        if evaluated == 0 {
            return Self::default();
        }
        let n = evaluated as f64;
        let (p, d, r) = (promoted as f64, demoted as f64, retired as f64);
        Self {
            quality_improvement: (p * 0.1 - d * 0.05) / n,
            performance_gain: (p * 0.05 - d * 0.03) / n,
            learning_efficiency: (p * 0.08 + r * 0.02) / n,
        }
    }
}

/// Summary of one pass over every card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionBatchResult {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Cards evaluated and acted on without error
    pub total_evaluated: usize,
    pub promoted: Vec<TierChange>,
    pub demoted: Vec<TierChange>,
    pub retired: Vec<RetiredCard>,
    /// Cards skipped because something failed
    pub failed: Vec<CardFailure>,
    pub promoted_count: usize,
    pub demoted_count: usize,
    pub retired_count: usize,
    pub maintained_count: usize,
    pub expected_impact: ExpectedImpact,
}

impl PromotionBatchResult {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            completed_at: started_at,
            total_evaluated: 0,
            promoted: Vec::new(),
            demoted: Vec::new(),
            retired: Vec::new(),
            failed: Vec::new(),
            promoted_count: 0,
            demoted_count: 0,
            retired_count: 0,
            maintained_count: 0,
            expected_impact: ExpectedImpact::default(),
        }
    }

    fn record(&mut self, action: CardAction) {
        self.total_evaluated += 1;
        match action {
            CardAction::Promoted(change) => {
                self.promoted_count += 1;
                self.promoted.push(change);
            }
            CardAction::Demoted(change) => {
                self.demoted_count += 1;
                self.demoted.push(change);
            }
            CardAction::Retired(card) => {
                self.retired_count += 1;
                self.retired.push(card);
            }
            CardAction::Maintained => self.maintained_count += 1,
        }
    }

    fn finish(&mut self) {
        self.completed_at = Utc::now();
        self.expected_impact = ExpectedImpact::estimate(
            self.promoted_count,
            self.demoted_count,
            self.retired_count,
            self.total_evaluated,
        );
    }
}

enum CardAction {
    Promoted(TierChange),
    Demoted(TierChange),
    Retired(RetiredCard),
    Maintained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateKind {
    Promote,
    Demote,
}

impl std::str::FromStr for CandidateKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "promote" | "promotion" => Ok(CandidateKind::Promote),
            "demote" | "demotion" => Ok(CandidateKind::Demote),
            other => Err(format!("unknown candidate kind '{}', expected promote or demote", other)),
        }
    }
}

/// A card that would move if a batch ran now
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionCandidate {
    pub card_id: String,
    pub title: String,
    pub tier: CardTier,
    /// Promotion score for promotions, shortfall in effectiveness for demotions
    pub score: f64,
    pub evaluation: EffectivenessEvaluation,
}

/// Archive file body for a retired card
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CardArchive<'a> {
    card: &'a KnowledgeCard,
    retired_at: DateTime<Utc>,
    evaluation: &'a EffectivenessEvaluation,
}

/// Keep archive file names inside the archive directory
fn archive_file_name(card_id: &str) -> String {
    let safe: String = card_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if safe.is_empty() {
        "card.json".to_string()
    } else {
        format!("{}.json", safe)
    }
}

/// The promotion engine
pub struct PromotionEngine {
    knowledge: Arc<dyn KnowledgeStore>,
    usage: Arc<UsageHistory>,
    evaluator: EffectivenessEvaluator,
    evaluations: EvaluationHistory,
    snapshots: SnapshotStore,
    archive_dir: PathBuf,
    thresholds: PerformanceThresholds,
    /// Held for the whole of a batch so batches never interleave
    batch_lock: Mutex<()>,
    last_run: RwLock<Option<DateTime<Utc>>>,
    last_result: RwLock<Option<PromotionBatchResult>>,
}

impl PromotionEngine {
    /// Create an engine, rejecting inconsistent configuration up front
    pub fn new(config: &Config, knowledge: Arc<dyn KnowledgeStore>, usage: Arc<UsageHistory>) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(LearningError::Config(errors));
        }

        Ok(Self {
            knowledge,
            usage,
            evaluator: EffectivenessEvaluator::new(&config.learning),
            evaluations: EvaluationHistory::new(config.learning.max_evaluation_history),
            snapshots: SnapshotStore::new(config.snapshot_path()?),
            archive_dir: config.archive_dir()?,
            thresholds: config.performance.clone(),
            batch_lock: Mutex::new(()),
            last_run: RwLock::new(None),
            last_result: RwLock::new(None),
        })
    }

    pub fn evaluator(&self) -> &EffectivenessEvaluator {
        &self.evaluator
    }

    pub fn usage(&self) -> &Arc<UsageHistory> {
        &self.usage
    }

    pub async fn last_run(&self) -> Option<DateTime<Utc>> {
        *self.last_run.read().await
    }

    pub async fn last_result(&self) -> Option<PromotionBatchResult> {
        self.last_result.read().await.clone()
    }

    pub async fn evaluation_history(&self, card_id: &str) -> Vec<EffectivenessEvaluation> {
        self.evaluations.history_for(card_id).await
    }

    /// Load usage and evaluation history saved by an earlier process
    pub async fn restore(&self) {
        let snapshot = self.snapshots.load().await;
        self.usage.restore(snapshot.usage_outcomes).await;
        self.evaluations.restore(snapshot.evaluation_history).await;
        *self.last_run.write().await = snapshot.last_promotion_run;
        *self.last_result.write().await = snapshot.last_batch_result;
    }

    /// Best-effort save of the current history; returns whether it was written
    pub async fn persist(&self) -> bool {
        let snapshot = LearningSnapshot {
            usage_outcomes: self.usage.snapshot().await,
            evaluation_history: self.evaluations.snapshot().await,
            last_promotion_run: *self.last_run.read().await,
            last_batch_result: self.last_result.read().await.clone(),
        };
        self.snapshots.save(&snapshot).await
    }

    /// Evaluate one card now and keep the result in its history
    pub async fn evaluate_card(&self, card_id: &str) -> Result<EffectivenessEvaluation> {
        let card = self
            .knowledge
            .get_card(card_id)
            .await
            .map_err(|e| LearningError::integration("getCard", e))?
            .ok_or_else(|| LearningError::validation(format!("unknown knowledge card: {}", card_id)))?;
        Ok(self.evaluate_and_record(&card).await)
    }

    async fn evaluate_and_record(&self, card: &KnowledgeCard) -> EffectivenessEvaluation {
        let history = self.usage.history_for(&card.id).await;
        let started = Instant::now();
        let evaluation = self.evaluator.evaluate(card, &history);
        let elapsed = started.elapsed();
        if elapsed > self.thresholds.evaluation() {
            warn!(
                "Evaluation of card {} over {} usages took {}ms (threshold {}ms)",
                card.id,
                history.len(),
                elapsed.as_millis(),
                self.thresholds.evaluation_ms
            );
        }
        debug!(
            "Card {} scored {:.2} (effectiveness {:.2}, {}) -> {}",
            card.id,
            evaluation.promotion_score,
            evaluation.current_effectiveness,
            evaluation.trend.trend,
            evaluation.recommendation
        );
        self.evaluations.push(evaluation.clone()).await;
        evaluation
    }

    /// Raise the card one tier, boost its effectiveness and tag it
    pub async fn promote(&self, card: &KnowledgeCard, evaluation: &EffectivenessEvaluation) -> Result<TierChange> {
        let from = card.tier();
        let to = from.promoted();
        let effectiveness = (evaluation.current_effectiveness * PROMOTION_BOOST).min(1.0);

        let mut tags = card.tags.clone();
        if !card.has_tag(HIGH_EFFECTIVENESS_TAG) {
            tags.push(HIGH_EFFECTIVENESS_TAG.to_string());
        }
        let patch = CardPatch {
            effectiveness: Some(effectiveness),
            tags: Some(tags),
            ..Default::default()
        }
        .tier(to);

        self.knowledge
            .update_card(&card.id, patch)
            .await
            .map_err(|e| LearningError::integration("updateCard", e))?;

        info!("Promoted card {} from {} to {} ({:.2})", card.id, from, to, effectiveness);
        Ok(TierChange {
            card_id: card.id.clone(),
            title: card.title.clone(),
            from,
            to,
            effectiveness,
            reasons: evaluation.reasoning.clone(),
        })
    }

    /// Lower the card one tier, reduce its effectiveness and drop the tag
    pub async fn demote(&self, card: &KnowledgeCard, evaluation: &EffectivenessEvaluation) -> Result<TierChange> {
        let from = card.tier();
        let to = from.demoted();
        let effectiveness = (evaluation.current_effectiveness * DEMOTION_PENALTY).max(DEMOTION_FLOOR);

        let patch = CardPatch {
            effectiveness: Some(effectiveness),
            tags: Some(card.tags.iter().filter(|t| *t != HIGH_EFFECTIVENESS_TAG).cloned().collect()),
            ..Default::default()
        }
        .tier(to);

        self.knowledge
            .update_card(&card.id, patch)
            .await
            .map_err(|e| LearningError::integration("updateCard", e))?;

        info!("Demoted card {} from {} to {} ({:.2})", card.id, from, to, effectiveness);
        Ok(TierChange {
            card_id: card.id.clone(),
            title: card.title.clone(),
            from,
            to,
            effectiveness,
            reasons: evaluation.reasoning.clone(),
        })
    }

    /// Archive the card, then delete it. Nothing is deleted unless the archive was written.
    pub async fn retire(&self, card: &KnowledgeCard, evaluation: &EffectivenessEvaluation) -> Result<RetiredCard> {
        let archive_path = self.archive_dir.join(archive_file_name(&card.id));
        let body = serde_json::to_string_pretty(&CardArchive {
            card,
            retired_at: Utc::now(),
            evaluation,
        })
        .map_err(|e| LearningError::io("encode card archive", e))?;

        tokio::fs::create_dir_all(&self.archive_dir)
            .await
            .map_err(|e| LearningError::io(format!("create archive directory {}", self.archive_dir.display()), e))?;
        tokio::fs::write(&archive_path, body)
            .await
            .map_err(|e| LearningError::io(format!("write archive {}", archive_path.display()), e))?;

        self.knowledge
            .delete_card(&card.id)
            .await
            .map_err(|e| LearningError::integration("deleteCard", e))?;

        info!("Retired card {} (archived to {})", card.id, archive_path.display());
        Ok(RetiredCard {
            card_id: card.id.clone(),
            title: card.title.clone(),
            archive_path,
            reasons: evaluation.reasoning.clone(),
        })
    }

    async fn process_card(&self, card_id: &str) -> Result<CardAction> {
        let card = self
            .knowledge
            .get_card(card_id)
            .await
            .map_err(|e| LearningError::integration("getCard", e))?
            .ok_or_else(|| LearningError::validation(format!("card {} disappeared during the batch", card_id)))?;

        let evaluation = self.evaluate_and_record(&card).await;
        Ok(match evaluation.recommendation {
            Recommendation::Promote => CardAction::Promoted(self.promote(&card, &evaluation).await?),
            Recommendation::Demote => CardAction::Demoted(self.demote(&card, &evaluation).await?),
            Recommendation::Retire => CardAction::Retired(self.retire(&card, &evaluation).await?),
            Recommendation::Maintain => CardAction::Maintained,
        })
    }

    /// Evaluate every card and apply the recommended tier changes.
    /// Overlapping calls wait for the running batch to finish.
    pub async fn run_batch(&self) -> Result<PromotionBatchResult> {
        let _guard = self.batch_lock.lock().await;
        let started = Instant::now();
        let mut result = PromotionBatchResult::new(Utc::now());

        let hits = self
            .knowledge
            .search_cards(&CardQuery::all())
            .await
            .map_err(|e| LearningError::integration("searchCards", e))?;
        info!("Running promotion batch over {} cards", hits.len());

        for hit in hits {
            let card_id = hit.card.id;
            match self.process_card(&card_id).await {
                Ok(action) => result.record(action),
                Err(e) => {
                    warn!("Skipping card {} in promotion batch: {}", card_id, e);
                    result.failed.push(CardFailure {
                        card_id,
                        error: e.to_string(),
                    });
                }
            }
        }
        result.finish();

        *self.last_run.write().await = Some(result.completed_at);
        *self.last_result.write().await = Some(result.clone());
        self.persist().await;

        let elapsed = started.elapsed();
        if elapsed > self.thresholds.promotion_batch() {
            warn!(
                "Promotion batch took {}ms (threshold {}ms)",
                elapsed.as_millis(),
                self.thresholds.promotion_batch_ms
            );
        }
        info!(
            "Promotion batch complete: {} promoted, {} demoted, {} retired, {} maintained, {} failed",
            result.promoted_count,
            result.demoted_count,
            result.retired_count,
            result.maintained_count,
            result.failed.len()
        );
        Ok(result)
    }

    /// Cards that would be promoted or demoted right now, strongest case first.
    /// Nothing is written, not even evaluation history.
    pub async fn candidates(&self, kind: CandidateKind) -> Result<Vec<PromotionCandidate>> {
        let hits = self
            .knowledge
            .search_cards(&CardQuery::all())
            .await
            .map_err(|e| LearningError::integration("searchCards", e))?;

        let wanted = match kind {
            CandidateKind::Promote => Recommendation::Promote,
            CandidateKind::Demote => Recommendation::Demote,
        };

        let mut candidates = Vec::new();
        for hit in hits {
            let card = hit.card;
            let history = self.usage.history_for(&card.id).await;
            let evaluation = self.evaluator.evaluate(&card, &history);
            if evaluation.recommendation != wanted {
                continue;
            }
            let score = match kind {
                CandidateKind::Promote => evaluation.promotion_score,
                CandidateKind::Demote => self.evaluator.demotion_threshold() - evaluation.current_effectiveness,
            };
            candidates.push(PromotionCandidate {
                card_id: card.id.clone(),
                title: card.title.clone(),
                tier: card.tier(),
                score,
                evaluation,
            });
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.card_id.cmp(&b.card_id))
        });
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{CardScope, CardSearchHit, ExpertiseLevel, MockKnowledgeStore};
    use std::path::Path;

    fn config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.storage.data_dir = Some(dir.to_path_buf());
        config
    }

    fn engine(dir: &Path, store: MockKnowledgeStore) -> PromotionEngine {
        let knowledge: Arc<dyn KnowledgeStore> = Arc::new(store);
        let usage = Arc::new(UsageHistory::new(knowledge.clone(), 1000));
        PromotionEngine::new(&config(dir), knowledge, usage).unwrap()
    }

    fn echo_update(store: &mut MockKnowledgeStore) {
        store.expect_update_card().returning(|id, patch| {
            let mut card = KnowledgeCard::new(id, "updated");
            patch.apply(&mut card);
            Ok(card)
        });
    }

    #[test]
    fn test_expected_impact() {
        let impact = ExpectedImpact::estimate(1, 1, 2, 4);
        assert!((impact.quality_improvement - 0.0125).abs() < 1e-12);
        assert!((impact.performance_gain - 0.005).abs() < 1e-12);
        assert!((impact.learning_efficiency - 0.03).abs() < 1e-12);
        assert_eq!(ExpectedImpact::estimate(0, 0, 0, 0), ExpectedImpact::default());
    }

    #[test]
    fn test_archive_file_name_is_flat() {
        assert_eq!(archive_file_name("card-1"), "card-1.json");
        assert_eq!(archive_file_name("../etc/passwd"), "___etc_passwd.json");
        assert_eq!(archive_file_name(""), "card.json");
    }

    #[test]
    fn test_invalid_config_rejected_before_construction() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.learning.promotion_threshold = 0.1;

        let knowledge: Arc<dyn KnowledgeStore> = Arc::new(MockKnowledgeStore::new());
        let usage = Arc::new(UsageHistory::new(knowledge.clone(), 10));
        assert!(matches!(
            PromotionEngine::new(&config, knowledge, usage),
            Err(LearningError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_promote_patches_tier_effectiveness_and_tag() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MockKnowledgeStore::new();
        store
            .expect_update_card()
            .withf(|id, patch| {
                id == "card-1"
                    && patch.scope == Some(CardScope::Global)
                    && patch.level == Some(ExpertiseLevel::Standard)
                    && patch.effectiveness == Some(1.0)
                    && patch.tags == Some(vec!["rust".to_string(), HIGH_EFFECTIVENESS_TAG.to_string()])
            })
            .times(1)
            .returning(|id, _| Ok(KnowledgeCard::new(id, "t")));
        let engine = engine(dir.path(), store);

        let mut card = KnowledgeCard::new("card-1", "Borrow checker tips").with_tier(CardTier::ProjectExpert);
        card.tags = vec!["rust".to_string()];
        let mut evaluation = engine.evaluator().evaluate(&card, &[]);
        evaluation.current_effectiveness = 0.95;

        let change = engine.promote(&card, &evaluation).await.unwrap();
        assert_eq!(change.from, CardTier::ProjectExpert);
        assert_eq!(change.to, CardTier::GlobalStandard);
    }

    #[tokio::test]
    async fn test_promote_and_demote_saturate() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MockKnowledgeStore::new();
        echo_update(&mut store);
        let engine = engine(dir.path(), store);

        let top = KnowledgeCard::new("top", "t").with_tier(CardTier::GlobalExpert);
        let evaluation = engine.evaluator().evaluate(&top, &[]);
        assert_eq!(engine.promote(&top, &evaluation).await.unwrap().to, CardTier::GlobalExpert);

        let mut bottom = KnowledgeCard::new("bottom", "t").with_tier(CardTier::ProjectStandard);
        bottom.tags = vec![HIGH_EFFECTIVENESS_TAG.to_string()];
        let mut evaluation = engine.evaluator().evaluate(&bottom, &[]);
        evaluation.current_effectiveness = 0.05;
        let change = engine.demote(&bottom, &evaluation).await.unwrap();
        assert_eq!(change.to, CardTier::ProjectStandard);
        assert_eq!(change.effectiveness, DEMOTION_FLOOR);
    }

    #[tokio::test]
    async fn test_archive_failure_prevents_delete() {
        let dir = tempfile::tempdir().unwrap();
        // a regular file where the archive directory should be
        std::fs::write(dir.path().join("archive"), "").unwrap();

        let mut store = MockKnowledgeStore::new();
        store.expect_delete_card().never();
        let engine = engine(dir.path(), store);

        let card = KnowledgeCard::new("card-1", "t");
        let evaluation = engine.evaluator().evaluate(&card, &[]);
        let err = engine.retire(&card, &evaluation).await.unwrap_err();
        assert!(matches!(err, LearningError::Io { .. }));
    }

    #[tokio::test]
    async fn test_retire_archives_full_card_then_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MockKnowledgeStore::new();
        store
            .expect_delete_card()
            .withf(|id| id == "card-1")
            .times(1)
            .returning(|_| Ok(()));
        let engine = engine(dir.path(), store);

        let card = KnowledgeCard::new("card-1", "Legacy build flags").with_effectiveness(0.2);
        let evaluation = engine.evaluator().evaluate(&card, &[]);
        let retired = engine.retire(&card, &evaluation).await.unwrap();

        let archived: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&retired.archive_path).unwrap()).unwrap();
        assert_eq!(archived["card"]["title"], "Legacy build flags");
        assert!(archived["retiredAt"].is_string());
        assert_eq!(archived["evaluation"]["cardId"], "card-1");
    }

    #[tokio::test]
    async fn test_batch_aborts_when_cards_cannot_be_listed() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MockKnowledgeStore::new();
        store
            .expect_search_cards()
            .returning(|_| Err(anyhow::anyhow!("index offline")));
        let engine = engine(dir.path(), store);

        let err = engine.run_batch().await.unwrap_err();
        assert!(err.is_integration());
        assert!(engine.last_run().await.is_none());
    }

    #[tokio::test]
    async fn test_candidates_do_not_mutate() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MockKnowledgeStore::new();
        store.expect_search_cards().returning(|_| {
            Ok(vec![
                CardSearchHit {
                    card: KnowledgeCard::new("weak", "w").with_effectiveness(0.05),
                    relevance_score: 1.0,
                },
                CardSearchHit {
                    card: KnowledgeCard::new("weaker", "w").with_effectiveness(0.0),
                    relevance_score: 1.0,
                },
                CardSearchHit {
                    card: KnowledgeCard::new("fine", "f").with_effectiveness(0.6),
                    relevance_score: 1.0,
                },
            ])
        });
        // no update/delete expectations: any mutation would panic
        let engine = engine(dir.path(), store);

        let demote = engine.candidates(CandidateKind::Demote).await.unwrap();
        let ids: Vec<_> = demote.iter().map(|c| c.card_id.as_str()).collect();
        assert_eq!(ids, vec!["weaker", "weak"]);
        assert!(engine.candidates(CandidateKind::Promote).await.unwrap().is_empty());
        assert!(engine.evaluation_history("weak").await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_snapshot_restored_by_new_engine() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MockKnowledgeStore::new();
        store.expect_search_cards().returning(|_| {
            Ok(vec![CardSearchHit {
                card: KnowledgeCard::new("card-1", "t"),
                relevance_score: 1.0,
            }])
        });
        store
            .expect_get_card()
            .returning(|id| Ok(Some(KnowledgeCard::new(id, "t"))));
        let engine = engine(dir.path(), store);

        let result = engine.run_batch().await.unwrap();
        assert_eq!(result.maintained_count, 1);
        assert_eq!(result.total_evaluated, 1);

        let fresh = self::engine(dir.path(), MockKnowledgeStore::new());
        fresh.restore().await;
        assert_eq!(fresh.last_run().await, Some(result.completed_at));
        assert_eq!(fresh.last_result().await, Some(result));
        assert_eq!(fresh.evaluation_history("card-1").await.len(), 1);
    }
}
