//! Snapshot persistence for usage and evaluation history
//!
//! Loading never fails: a missing or unreadable snapshot starts the process
//! empty. Saving is best-effort; the in-memory state stays authoritative.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use super::evaluator::EffectivenessEvaluation;
use super::promotion::PromotionBatchResult;
use super::usage::CardUsageOutcome;
use crate::error::{LearningError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningSnapshot {
    #[serde(default)]
    pub usage_outcomes: BTreeMap<String, Vec<CardUsageOutcome>>,
    #[serde(default)]
    pub evaluation_history: BTreeMap<String, Vec<EffectivenessEvaluation>>,
    #[serde(default)]
    pub last_promotion_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_batch_result: Option<PromotionBatchResult>,
}

impl LearningSnapshot {
    /// Copy without entries holding NaN or infinities, which JSON cannot carry.
    /// Returns the copy and how many entries were dropped.
    pub fn finite_only(&self) -> (Self, usize) {
        let mut dropped = 0;
        let usage_outcomes = self
            .usage_outcomes
            .iter()
            .map(|(id, list)| {
                let kept: Vec<_> = list.iter().filter(|o| o.is_finite()).cloned().collect();
                dropped += list.len() - kept.len();
                (id.clone(), kept)
            })
            .collect();
        let evaluation_history = self
            .evaluation_history
            .iter()
            .map(|(id, list)| {
                let kept: Vec<_> = list.iter().filter(|e| e.is_finite()).cloned().collect();
                dropped += list.len() - kept.len();
                (id.clone(), kept)
            })
            .collect();

        let snapshot = Self {
            usage_outcomes,
            evaluation_history,
            last_promotion_run: self.last_promotion_run,
            last_batch_result: self.last_batch_result.clone(),
        };
        (snapshot, dropped)
    }
}

pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot, falling back to an empty one
    pub async fn load(&self) -> LearningSnapshot {
        let json = match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No learning snapshot at {}, starting empty", self.path.display());
                return LearningSnapshot::default();
            }
            Err(e) => {
                warn!("Failed to read learning snapshot {}: {}", self.path.display(), e);
                return LearningSnapshot::default();
            }
        };

        match serde_json::from_str::<LearningSnapshot>(&json) {
            Ok(snapshot) => {
                info!(
                    "Loaded learning snapshot: {} cards with usage, {} with evaluations",
                    snapshot.usage_outcomes.len(),
                    snapshot.evaluation_history.len()
                );
                snapshot
            }
            Err(e) => {
                warn!("Ignoring corrupt learning snapshot {}: {}", self.path.display(), e);
                LearningSnapshot::default()
            }
        }
    }

    /// Write the snapshot, logging instead of failing. Returns whether it was written.
    pub async fn save(&self, snapshot: &LearningSnapshot) -> bool {
        match self.try_save(snapshot).await {
            Ok(()) => {
                debug!("Saved learning snapshot to {}", self.path.display());
                true
            }
            Err(e) => {
                error!("Failed to save learning snapshot: {}", e);
                false
            }
        }
    }

    async fn try_save(&self, snapshot: &LearningSnapshot) -> Result<()> {
        let (snapshot, dropped) = snapshot.finite_only();
        if dropped > 0 {
            warn!("Leaving {} non-finite history entries out of the learning snapshot", dropped);
        }
        let json = serde_json::to_string_pretty(&snapshot).map_err(|e| LearningError::io("encode snapshot", e))?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LearningError::io("create snapshot directory", e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| LearningError::io(format!("write {}", tmp.display()), e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| LearningError::io(format!("replace {}", self.path.display()), e))
    }
}
