//! Configuration management
//!
//! Thresholds for promotion/demotion, scheduling, outcome log placement and
//! per-operation performance budgets. Stored as TOML under the platform config dir.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{LearningError, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Effectiveness evaluation and tier changes
    #[serde(default)]
    pub learning: LearningConfig,
    /// Outcome log placement and retention
    #[serde(default)]
    pub outcomes: OutcomeLogConfig,
    /// Latency budgets that trigger warnings
    #[serde(default)]
    pub performance: PerformanceThresholds,
    /// Where data files live
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningConfig {
    /// Promotion score at or above which a card is promoted
    #[serde(default = "default_promotion_threshold")]
    pub promotion_threshold: f64,
    /// Effectiveness below which a card is demoted
    #[serde(default = "default_demotion_threshold")]
    pub demotion_threshold: f64,
    /// Hours between automated promotion batches (0 disables scheduling)
    #[serde(default = "default_analysis_interval")]
    pub analysis_interval_hours: u64,
    /// Days of history considered by downstream pattern analysis
    #[serde(default = "default_pattern_window")]
    pub pattern_analysis_window_days: u32,
    /// Usage outcomes kept per card
    #[serde(default = "default_max_usage")]
    pub max_usage_per_card: usize,
    /// Evaluations kept per card
    #[serde(default = "default_max_evaluations")]
    pub max_evaluation_history: usize,
    /// Usages a card needs before it can be retired
    #[serde(default = "default_retirement_min_usages")]
    pub retirement_min_usages: u64,
    /// Effectiveness below which an idle, heavily used card is retired
    #[serde(default = "default_retirement_max_effectiveness")]
    pub retirement_max_effectiveness: f64,
}

fn default_promotion_threshold() -> f64 {
    0.8
}

fn default_demotion_threshold() -> f64 {
    0.2
}

fn default_analysis_interval() -> u64 {
    24
}

fn default_pattern_window() -> u32 {
    30
}

fn default_max_usage() -> usize {
    1000
}

fn default_max_evaluations() -> usize {
    30
}

fn default_retirement_min_usages() -> u64 {
    20
}

fn default_retirement_max_effectiveness() -> f64 {
    0.3
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            promotion_threshold: default_promotion_threshold(),
            demotion_threshold: default_demotion_threshold(),
            analysis_interval_hours: default_analysis_interval(),
            pattern_analysis_window_days: default_pattern_window(),
            max_usage_per_card: default_max_usage(),
            max_evaluation_history: default_max_evaluations(),
            retirement_min_usages: default_retirement_min_usages(),
            retirement_max_effectiveness: default_retirement_max_effectiveness(),
        }
    }
}

impl LearningConfig {
    /// Interval between scheduled batches, `None` when scheduling is disabled
    pub fn analysis_interval(&self) -> Option<Duration> {
        if self.analysis_interval_hours == 0 {
            None
        } else {
            Some(Duration::from_secs(self.analysis_interval_hours * 3600))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeLogConfig {
    /// Newline-delimited JSON log file, relative to the data dir
    #[serde(default = "default_log_file")]
    pub log_file: String,
    /// Export directory, relative to the data dir
    #[serde(default = "default_export_dir")]
    pub export_dir: String,
    /// Retention applied by `cleanup` when no explicit age is given
    #[serde(default)]
    pub retention_days: Option<u32>,
}

fn default_log_file() -> String {
    "outcomes.jsonl".to_string()
}

fn default_export_dir() -> String {
    "exports".to_string()
}

impl Default for OutcomeLogConfig {
    fn default() -> Self {
        Self {
            log_file: default_log_file(),
            export_dir: default_export_dir(),
            retention_days: None,
        }
    }
}

/// Latency budgets in milliseconds; exceeding one only logs a warning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceThresholds {
    #[serde(default = "default_log_write_ms")]
    pub log_write_ms: u64,
    #[serde(default = "default_query_ms")]
    pub query_ms: u64,
    #[serde(default = "default_evaluation_ms")]
    pub evaluation_ms: u64,
    #[serde(default = "default_batch_ms")]
    pub promotion_batch_ms: u64,
}

fn default_log_write_ms() -> u64 {
    100
}

fn default_query_ms() -> u64 {
    1000
}

fn default_evaluation_ms() -> u64 {
    500
}

fn default_batch_ms() -> u64 {
    30_000
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            log_write_ms: default_log_write_ms(),
            query_ms: default_query_ms(),
            evaluation_ms: default_evaluation_ms(),
            promotion_batch_ms: default_batch_ms(),
        }
    }
}

impl PerformanceThresholds {
    pub fn log_write(&self) -> Duration {
        Duration::from_millis(self.log_write_ms)
    }

    pub fn query(&self) -> Duration {
        Duration::from_millis(self.query_ms)
    }

    pub fn evaluation(&self) -> Duration {
        Duration::from_millis(self.evaluation_ms)
    }

    pub fn promotion_batch(&self) -> Duration {
        Duration::from_millis(self.promotion_batch_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Overrides the platform data directory
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default location, writing defaults if missing
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            let config = Config::default();
            config.save_to(&path)?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| LearningError::io(format!("read config {}", path.display()), e))?;
        toml::from_str(&contents).map_err(|e| {
            LearningError::Config(vec![format!("failed to parse {}: {}", path.display(), e)])
        })
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| LearningError::io("create config directory", e))?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| LearningError::Config(vec![format!("failed to serialize config: {}", e)]))?;
        std::fs::write(path, contents)
            .map_err(|e| LearningError::io(format!("write config {}", path.display()), e))
    }

    /// Check thresholds and limits, returning one message per problem
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let learning = &self.learning;

        if !unit_interval(learning.promotion_threshold) {
            errors.push(format!(
                "promotionThreshold must be in [0, 1], got {}",
                learning.promotion_threshold
            ));
        }
        if !unit_interval(learning.demotion_threshold) {
            errors.push(format!(
                "demotionThreshold must be in [0, 1], got {}",
                learning.demotion_threshold
            ));
        }
        if learning.promotion_threshold <= learning.demotion_threshold {
            errors.push(format!(
                "promotionThreshold ({}) must be greater than demotionThreshold ({})",
                learning.promotion_threshold, learning.demotion_threshold
            ));
        }
        if !unit_interval(learning.retirement_max_effectiveness) {
            errors.push(format!(
                "retirementMaxEffectiveness must be in [0, 1], got {}",
                learning.retirement_max_effectiveness
            ));
        }
        if learning.pattern_analysis_window_days == 0 {
            errors.push("patternAnalysisWindowDays must be at least 1".to_string());
        }
        if learning.max_usage_per_card == 0 {
            errors.push("maxUsagePerCard must be at least 1".to_string());
        }
        if learning.max_evaluation_history == 0 {
            errors.push("maxEvaluationHistory must be at least 1".to_string());
        }

        let perf = &self.performance;
        for (name, value) in [
            ("logWriteMs", perf.log_write_ms),
            ("queryMs", perf.query_ms),
            ("evaluationMs", perf.evaluation_ms),
            ("promotionBatchMs", perf.promotion_batch_ms),
        ] {
            if value == 0 {
                errors.push(format!("performance.{} must be greater than 0", name));
            }
        }

        if self.outcomes.log_file.trim().is_empty() {
            errors.push("outcomes.logFile must not be empty".to_string());
        }

        errors
    }

    /// Consume the config, rejecting it if validation finds any problem
    pub fn validated(self) -> Result<Self> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(LearningError::Config(errors))
        }
    }

    /// Resolved data directory
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.storage.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => data_dir(),
        }
    }

    pub fn outcome_log_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(&self.outcomes.log_file))
    }

    pub fn export_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(&self.outcomes.export_dir))
    }

    pub fn snapshot_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("learning-snapshot.json"))
    }

    pub fn archive_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("archive"))
    }

    pub fn knowledge_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("knowledge").join("cards.json"))
    }
}

fn unit_interval(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "forgeflow", "forgeflow-learning").ok_or_else(|| {
        LearningError::Config(vec!["failed to determine project directories".to_string()])
    })
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("config.toml"))
}

/// Get the default data directory path
pub fn data_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

/// Get default configuration as TOML string
pub fn default_config_toml() -> String {
    toml::to_string_pretty(&Config::default())
        .unwrap_or_else(|_| "# Default configuration\n".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_empty());
        assert_eq!(config.learning.promotion_threshold, 0.8);
        assert_eq!(config.learning.max_usage_per_card, 1000);
        assert_eq!(config.learning.max_evaluation_history, 30);
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut config = Config::default();
        config.learning.promotion_threshold = 0.3;
        config.learning.demotion_threshold = 0.6;

        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("must be greater than demotionThreshold"));

        match config.validated() {
            Err(LearningError::Config(list)) => assert_eq!(list.len(), 1),
            other => panic!("expected config error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_out_of_range_thresholds_listed() {
        let mut config = Config::default();
        config.learning.promotion_threshold = 1.5;
        config.learning.demotion_threshold = -0.1;
        config.performance.query_ms = 0;

        let errors = config.validate();
        assert!(errors.iter().any(|e| e.starts_with("promotionThreshold must be in [0, 1]")));
        assert!(errors.iter().any(|e| e.starts_with("demotionThreshold must be in [0, 1]")));
        assert!(errors.iter().any(|e| e.contains("performance.queryMs")));
    }

    #[test]
    fn test_analysis_interval_zero_disables() {
        let mut config = LearningConfig::default();
        assert_eq!(config.analysis_interval(), Some(Duration::from_secs(24 * 3600)));
        config.analysis_interval_hours = 0;
        assert_eq!(config.analysis_interval(), None);
    }

    #[test]
    fn test_toml_round_trip_with_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[learning]\npromotionThreshold = 0.9\n\n[storage]\ndataDir = \"/tmp/ff\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.learning.promotion_threshold, 0.9);
        assert_eq!(config.learning.demotion_threshold, 0.2);
        assert_eq!(config.outcome_log_path().unwrap(), PathBuf::from("/tmp/ff/outcomes.jsonl"));

        let out = dir.path().join("saved.toml");
        config.save_to(&out).unwrap();
        let reloaded = Config::load_from(&out).unwrap();
        assert_eq!(reloaded.learning.promotion_threshold, 0.9);
    }

    #[test]
    fn test_default_config_toml_mentions_sections() {
        let text = default_config_toml();
        assert!(text.contains("[learning]"));
        assert!(text.contains("promotionThreshold"));
    }
}
