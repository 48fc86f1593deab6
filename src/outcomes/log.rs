//! Outcome log - durable, append-only store of job outcomes
//!
//! Records live in a newline-delimited JSON file. Appends are validated,
//! sealed with computed fields and queued for the background writer; reads
//! flush the queue first and then scan the file.

use chrono::Utc;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::export::ExportFormat;
use super::fingerprint::StoredOutcome;
use super::query::{days_before, OutcomeFilter, OutcomeStatistics, TimeRange};
use super::record::OutcomeRecord;
use super::writer::LogWriter;
use crate::config::{Config, PerformanceThresholds};
use crate::error::{LearningError, Result};

pub struct OutcomeLog {
    path: PathBuf,
    export_dir: PathBuf,
    writer: LogWriter,
    thresholds: PerformanceThresholds,
    closed: AtomicBool,
}

impl OutcomeLog {
    /// Open the log at the paths named by `config`
    pub async fn open(config: &Config) -> Result<Self> {
        Self::open_at(
            config.outcome_log_path()?,
            config.export_dir()?,
            config.performance.clone(),
        )
        .await
    }

    /// Open a log in `dir` with default file names and thresholds
    pub async fn open_in(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        Self::open_at(dir.join("outcomes.jsonl"), dir.join("exports"), PerformanceThresholds::default()).await
    }

    pub async fn open_at(path: PathBuf, export_dir: PathBuf, thresholds: PerformanceThresholds) -> Result<Self> {
        let writer = LogWriter::open(&path)
            .await
            .map_err(|e| LearningError::io(format!("open outcome log {}", path.display()), e))?;
        info!("Opened outcome log at {}", path.display());
        Ok(Self {
            path,
            export_dir,
            writer,
            thresholds,
            closed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Validate, seal and queue a record. Returns once queued, not once durable.
    pub fn append(&self, record: OutcomeRecord) -> Result<StoredOutcome> {
        let started = Instant::now();
        record.validate()?;
        if self.closed.load(Ordering::SeqCst) {
            return Err(LearningError::io("append outcome", closed_error()));
        }

        let stored = StoredOutcome::seal(record)?;
        let line = stored.to_line()?;
        self.writer
            .enqueue(line)
            .map_err(|e| LearningError::io("queue outcome", e))?;

        let elapsed = started.elapsed();
        if elapsed > self.thresholds.log_write() {
            warn!(
                "Outcome append for job {} took {}ms (threshold {}ms)",
                stored.record.job_id,
                elapsed.as_millis(),
                self.thresholds.log_write_ms
            );
        }
        debug!("Queued outcome {} for job {}", stored.id, stored.record.job_id);
        Ok(stored)
    }

    /// Append a raw JSON record, validating required fields, timestamp and status first
    pub fn append_json(&self, value: Value) -> Result<StoredOutcome> {
        self.append(OutcomeRecord::from_json(value)?)
    }

    /// Wait for every queued record to reach the file
    pub async fn flush(&self) -> Result<()> {
        self.writer
            .flush()
            .await
            .map_err(|e| LearningError::io("flush outcome log", e))
    }

    /// Most recent record for a job, by timestamp
    pub async fn get(&self, job_id: &str) -> Result<Option<StoredOutcome>> {
        let records = self.read_all().await?;
        let mut found: Option<StoredOutcome> = None;
        for stored in records {
            if stored.record.job_id != job_id {
                continue;
            }
            let newer = found
                .as_ref()
                .map_or(true, |best| stored.record.timestamp >= best.record.timestamp);
            if newer {
                found = Some(stored);
            }
        }
        Ok(found)
    }

    /// Filtered records, newest first, sliced by offset/limit
    pub async fn query(&self, filter: &OutcomeFilter) -> Result<Vec<StoredOutcome>> {
        if let Some(range) = &filter.time_range {
            if range.start > range.end {
                return Err(LearningError::validation("time range start is after its end"));
            }
        }

        let started = Instant::now();
        let results = filter.apply(self.read_all().await?);
        let elapsed = started.elapsed();
        if elapsed > self.thresholds.query() {
            warn!(
                "Outcome query took {}ms (threshold {}ms)",
                elapsed.as_millis(),
                self.thresholds.query_ms
            );
        }
        Ok(results)
    }

    pub async fn statistics(&self, time_range: Option<TimeRange>) -> Result<OutcomeStatistics> {
        let records = self.read_all().await?;
        Ok(OutcomeStatistics::from_records(records.iter().map(|s| &s.record), time_range))
    }

    /// Write the records in `time_range` to a new export file and return its path
    pub async fn export(&self, time_range: Option<TimeRange>, format: ExportFormat) -> Result<PathBuf> {
        let mut records: Vec<StoredOutcome> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|s| time_range.map_or(true, |r| r.contains(s.record.timestamp)))
            .collect();
        if records.is_empty() {
            return Err(LearningError::validation("no outcomes to export in the requested range"));
        }
        records.sort_by(|a, b| b.record.timestamp.cmp(&a.record.timestamp));

        let body = format.render(&records)?;
        tokio::fs::create_dir_all(&self.export_dir)
            .await
            .map_err(|e| LearningError::io("create export directory", e))?;
        let file_name = format!(
            "outcomes-{}-{}.{}",
            Utc::now().format("%Y%m%dT%H%M%S%3f"),
            &uuid::Uuid::new_v4().simple().to_string()[..8],
            format.extension()
        );
        let path = self.export_dir.join(file_name);
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| LearningError::io(format!("write export {}", path.display()), e))?;

        info!("Exported {} outcomes to {}", records.len(), path.display());
        Ok(path)
    }

    /// Drop records older than `older_than_days`, returning how many were removed
    pub async fn cleanup(&self, older_than_days: i64) -> Result<usize> {
        if older_than_days < 0 {
            return Err(LearningError::validation(format!(
                "cleanup age must be non-negative, got {}",
                older_than_days
            )));
        }

        let cutoff = days_before(Utc::now(), older_than_days);
        // unreadable lines are left alone; only records known to be old are dropped
        let removed = self
            .writer
            .retain(Box::new(move |line| match serde_json::from_str::<StoredOutcome>(line) {
                Ok(stored) => stored.record.timestamp >= cutoff,
                Err(_) => true,
            }))
            .await
            .map_err(|e| LearningError::io("rewrite outcome log", e))?;

        info!("Outcome cleanup removed {} records older than {} days", removed, older_than_days);
        Ok(removed)
    }

    /// Drain pending writes and close the file. Later appends fail.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.writer
            .close()
            .await
            .map_err(|e| LearningError::io("close outcome log", e))?;
        info!("Closed outcome log at {}", self.path.display());
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<StoredOutcome>> {
        if !self.closed.load(Ordering::SeqCst) {
            self.flush().await?;
        }

        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LearningError::io(format!("read outcome log {}", self.path.display()), e)),
        };

        let mut records = Vec::new();
        for (index, bytes) in content.split(|b| *b == b'\n').enumerate() {
            let line = match std::str::from_utf8(bytes) {
                Ok(line) => line,
                Err(e) => {
                    warn!("Skipping undecodable outcome at line {}: {}", index + 1, e);
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoredOutcome>(line) {
                Ok(stored) => records.push(stored),
                Err(e) => warn!("Skipping malformed outcome at line {}: {}", index + 1, e),
            }
        }
        Ok(records)
    }
}

fn closed_error() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, "outcome log is closed")
}
