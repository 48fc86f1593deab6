//! Self-Improving Learning System
//!
//! Tracks how knowledge cards perform in real jobs, scores them, and moves
//! them up or down the tier ladder. Usage and evaluation history survive
//! restarts through a JSON snapshot.

pub mod evaluator;
pub mod feedback;
pub mod promotion;
pub mod scheduler;
pub mod snapshot;
pub mod trend;
pub mod usage;

pub use evaluator::{EffectivenessEvaluation, EffectivenessEvaluator, EvaluationHistory, Recommendation};
pub use feedback::FeedbackLoop;
pub use promotion::{
    CandidateKind, CardFailure, ExpectedImpact, PromotionBatchResult, PromotionCandidate, PromotionEngine,
    RetiredCard, TierChange,
};
pub use scheduler::PromotionScheduler;
pub use snapshot::{LearningSnapshot, SnapshotStore};
pub use trend::{Trend, TrendAnalysis};
pub use usage::{CardUsageOutcome, UsageContext, UsageHistory, UsageImpact, UsageResult};
