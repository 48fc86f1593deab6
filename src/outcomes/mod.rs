//! Outcome logging - durable record of every finished job
//!
//! Outcomes feed statistics, exports and the knowledge-card learning loop.

pub mod export;
pub mod fingerprint;
pub mod log;
pub mod query;
pub mod record;
pub mod writer;

pub use export::{ExportFormat, CSV_COLUMNS};
pub use fingerprint::{ComputedFields, StoredOutcome};
pub use log::OutcomeLog;
pub use query::{Breakdown, OutcomeFilter, OutcomeStatistics, TimeRange, DEFAULT_QUERY_LIMIT};
pub use record::{
    CardVerdict, Complexity, KnowledgeUsage, OutcomeRecord, OutcomeStatus, QualityAssessment, SCHEMA_VERSION,
};
