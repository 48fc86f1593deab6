//! Filtering and aggregation over outcome records

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::fingerprint::StoredOutcome;
use super::record::{Complexity, OutcomeRecord, OutcomeStatus};

/// Page size used when a filter sets no limit
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Inclusive time window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The last `days` days up to now
    pub fn last_days(days: i64) -> Self {
        let end = Utc::now();
        Self { start: days_before(end, days), end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Query filters; empty lists and `None` mean "no constraint"
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutcomeFilter {
    pub time_range: Option<TimeRange>,
    pub success: Option<bool>,
    /// Matches when the record ran with any of these agents
    pub agent_types: Vec<String>,
    pub categories: Vec<String>,
    pub complexities: Vec<Complexity>,
    pub min_quality: Option<f64>,
    /// Maximum duration in milliseconds
    pub max_duration: Option<u64>,
    pub issue_ids: Vec<String>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl OutcomeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    pub fn successful(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &OutcomeRecord) -> bool {
        if let Some(range) = &self.time_range {
            if !range.contains(record.timestamp) {
                return false;
            }
        }
        if let Some(success) = self.success {
            if record.success != success {
                return false;
            }
        }
        if !self.agent_types.is_empty()
            && !record.metadata.agent_types.iter().any(|a| self.agent_types.contains(a))
        {
            return false;
        }
        if !self.categories.is_empty() && !self.categories.contains(&record.metadata.category) {
            return false;
        }
        if !self.complexities.is_empty() && !self.complexities.contains(&record.metadata.complexity) {
            return false;
        }
        if let Some(min) = self.min_quality {
            if record.quality.overall_score < min {
                return false;
            }
        }
        if let Some(max) = self.max_duration {
            if record.metadata.duration > max {
                return false;
            }
        }
        if !self.issue_ids.is_empty() && !self.issue_ids.contains(&record.issue_id) {
            return false;
        }
        true
    }

    /// Filter, sort newest first, then slice by offset/limit
    pub fn apply(&self, records: Vec<StoredOutcome>) -> Vec<StoredOutcome> {
        let mut matched: Vec<StoredOutcome> = records.into_iter().filter(|r| self.matches(&r.record)).collect();
        matched.sort_by(|a, b| b.record.timestamp.cmp(&a.record.timestamp));
        matched
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(DEFAULT_QUERY_LIMIT))
            .collect()
    }
}

/// `days` days before `at`, saturating at the earliest representable instant
pub fn days_before(at: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    Duration::try_days(days)
        .and_then(|age| at.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Counts for one breakdown bucket
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakdown {
    pub total: usize,
    pub successful: usize,
}

impl Breakdown {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful as f64 / self.total as f64
        }
    }

    fn add(&mut self, success: bool) {
        self.total += 1;
        if success {
            self.successful += 1;
        }
    }
}

/// Aggregate view over a set of outcomes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeStatistics {
    pub time_range: Option<TimeRange>,
    pub total_outcomes: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
    /// Mean duration in milliseconds
    pub average_duration: f64,
    pub average_quality: f64,
    pub by_status: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, Breakdown>,
    pub by_agent: BTreeMap<String, Breakdown>,
    pub by_complexity: BTreeMap<String, Breakdown>,
}

impl OutcomeStatistics {
    pub fn from_records<'a, I>(records: I, time_range: Option<TimeRange>) -> Self
    where
        I: IntoIterator<Item = &'a OutcomeRecord>,
    {
        let mut stats = OutcomeStatistics {
            time_range,
            ..Default::default()
        };
        let mut duration_sum = 0.0;
        let mut quality_sum = 0.0;

        for record in records {
            if let Some(range) = &time_range {
                if !range.contains(record.timestamp) {
                    continue;
                }
            }

            stats.total_outcomes += 1;
            if record.success {
                stats.successful += 1;
            } else {
                stats.failed += 1;
            }
            duration_sum += record.metadata.duration as f64;
            quality_sum += record.quality.overall_score;

            *stats.by_status.entry(record.status.to_string()).or_default() += 1;
            stats
                .by_category
                .entry(record.metadata.category.clone())
                .or_default()
                .add(record.success);
            stats
                .by_complexity
                .entry(record.metadata.complexity.to_string())
                .or_default()
                .add(record.success);
            for agent in &record.metadata.agent_types {
                stats.by_agent.entry(agent.clone()).or_default().add(record.success);
            }
        }

        if stats.total_outcomes > 0 {
            let n = stats.total_outcomes as f64;
            stats.success_rate = stats.successful as f64 / n;
            stats.average_duration = duration_sum / n;
            stats.average_quality = quality_sum / n;
        }
        stats
    }

    pub fn status_count(&self, status: OutcomeStatus) -> usize {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_days_before_saturates() {
        let now = at(10);
        assert_eq!(days_before(now, 2), at(8));
        assert_eq!(days_before(now, 200_000_000), DateTime::<Utc>::MIN_UTC);
        assert_eq!(days_before(now, i64::MAX), DateTime::<Utc>::MIN_UTC);

        let range = TimeRange::last_days(i64::MAX);
        assert_eq!(range.start, DateTime::<Utc>::MIN_UTC);
        assert!(range.contains(at(1)));
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
    }

    fn stored(job: &str, day: u32) -> StoredOutcome {
        StoredOutcome::seal(OutcomeRecord::with_execution(job, "issue-1", "exec").at(at(day))).unwrap()
    }

    #[test]
    fn test_apply_sorts_newest_first_and_pages() {
        let records = vec![stored("a", 1), stored("b", 3), stored("c", 2)];

        let all = OutcomeFilter::new().apply(records.clone());
        let jobs: Vec<_> = all.iter().map(|r| r.record.job_id.as_str()).collect();
        assert_eq!(jobs, vec!["b", "c", "a"]);

        let page = OutcomeFilter::new().page(1, 1).apply(records);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].record.job_id, "c");
    }

    #[test]
    fn test_default_limit() {
        let records: Vec<_> = (0..150).map(|i| stored(&format!("job-{}", i), 1)).collect();
        assert_eq!(OutcomeFilter::new().apply(records).len(), DEFAULT_QUERY_LIMIT);
    }

    #[test]
    fn test_membership_and_threshold_filters() {
        let record = OutcomeRecord::with_execution("job", "issue-7", "exec")
            .at(at(5))
            .with_agents(["planner", "code-implementer"])
            .with_category("feature")
            .with_complexity(Complexity::High)
            .with_duration(5_000)
            .with_quality(0.9)
            .mark_success();

        let mut filter = OutcomeFilter::new();
        filter.agent_types = vec!["code-implementer".to_string(), "tester".to_string()];
        filter.categories = vec!["feature".to_string()];
        filter.complexities = vec![Complexity::High];
        filter.min_quality = Some(0.8);
        filter.max_duration = Some(5_000);
        filter.issue_ids = vec!["issue-7".to_string()];
        filter.success = Some(true);
        filter.time_range = Some(TimeRange::new(at(4), at(6)));
        assert!(filter.matches(&record));

        let mut miss = filter.clone();
        miss.agent_types = vec!["tester".to_string()];
        assert!(!miss.matches(&record));

        let mut miss = filter.clone();
        miss.max_duration = Some(4_999);
        assert!(!miss.matches(&record));

        let mut miss = filter;
        miss.time_range = Some(TimeRange::new(at(6), at(7)));
        assert!(!miss.matches(&record));
    }

    #[test]
    fn test_statistics_breakdowns() {
        let records = vec![
            OutcomeRecord::with_execution("a", "i", "e")
                .with_agents(["planner", "coder"])
                .with_category("bug")
                .with_duration(100)
                .with_quality(0.8)
                .mark_success(),
            OutcomeRecord::with_execution("b", "i", "e")
                .with_agents(["coder"])
                .with_category("bug")
                .with_duration(300)
                .with_quality(0.4)
                .mark_failure("nope"),
        ];

        let stats = OutcomeStatistics::from_records(&records, None);
        assert_eq!(stats.total_outcomes, 2);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.average_duration, 200.0);
        assert!((stats.average_quality - 0.6).abs() < 1e-9);
        assert_eq!(stats.by_category["bug"].total, 2);
        assert_eq!(stats.by_agent["coder"].success_rate(), 0.5);
        assert_eq!(stats.by_agent["planner"].successful, 1);
        assert_eq!(stats.status_count(OutcomeStatus::Failed), 1);
    }

    #[test]
    fn test_statistics_empty() {
        let stats = OutcomeStatistics::from_records(std::iter::empty(), None);
        assert_eq!(stats.total_outcomes, 0);
        assert_eq!(stats.success_rate, 0.0);
    }
}
