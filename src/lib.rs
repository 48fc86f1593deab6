//! ForgeFlow Learning - outcome logging and knowledge-card promotion
//!
//! The self-improving core of an agent orchestration platform:
//! - Append-only outcome log with queued, backpressured writes
//! - Usage history for the knowledge cards agents consult
//! - Effectiveness evaluation with decay weighting and trend analysis
//! - Promotion, demotion and retirement of cards along a tier ladder
//!
//! # Example
//!
//! ```ignore
//! use forgeflow_learning::{Config, OutcomeLog, OutcomeRecord};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let log = OutcomeLog::open(&Config::load()?).await?;
//!     log.append(OutcomeRecord::new("job-1", "issue-1").mark_success())?;
//!     log.close().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod config;
pub mod outcomes;
pub mod knowledge; // Must come before learning since learning depends on it
pub mod learning;
pub mod cli;

// Re-export commonly used types for convenience
pub use config::Config;

pub use error::{LearningError, Result};

pub use outcomes::{
    ExportFormat,
    OutcomeFilter,
    OutcomeLog,
    OutcomeRecord,
    OutcomeStatistics,
    OutcomeStatus,
    StoredOutcome,
    TimeRange,
};

pub use knowledge::{
    CardTier,
    KnowledgeCard,
    KnowledgeStore,
    LocalKnowledgeStore,
};

pub use learning::{
    CardUsageOutcome,
    EffectivenessEvaluation,
    EffectivenessEvaluator,
    FeedbackLoop,
    PromotionBatchResult,
    PromotionEngine,
    PromotionScheduler,
    Recommendation,
    UsageHistory,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - outcome logging and knowledge-card promotion", NAME, VERSION)
}
