//! Feed jobs and their run status.

use crate::config::{FeedJobSpec, SchedulerConfig};
use crate::delta::DeltaReport;
use crate::download::FeedSource;
use crate::error::FeedError;
use crate::format::FeedFormat;
use crate::full::FullReport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    Full,
    Delta,
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FeedKind::Full => "full",
            FeedKind::Delta => "delta",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RunReport {
    Full(FullReport),
    Delta(DeltaReport),
}

/// A scheduled feed and everything known about its last runs. Jobs are never removed;
/// a feed that keeps failing stays scheduled with `alerting` set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedJob {
    pub id: String,
    pub project: String,
    pub kind: FeedKind,
    pub source: FeedSource,
    pub format: FeedFormat,
    pub interval_secs: u64,
    #[serde(default = "default_active")]
    pub active: bool,

    #[serde(default)]
    pub last_status: JobStatus,
    #[serde(default)]
    pub last_error: Option<String>,
    /// RFC 3339.
    #[serde(default)]
    pub last_run: Option<String>,
    #[serde(default)]
    pub last_duration_ms: Option<u64>,
    /// Unix seconds of the next planned run.
    #[serde(default)]
    pub next_run: Option<i64>,
    #[serde(default)]
    pub items_indexed: usize,
    #[serde(default)]
    pub items_rejected: usize,
    #[serde(default)]
    pub items_updated: usize,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub alerting: bool,
}

fn default_active() -> bool {
    true
}

impl FeedJob {
    pub fn new(project: impl Into<String>, kind: FeedKind, source: FeedSource, format: FeedFormat, interval: Duration) -> Self {
        let project = project.into();
        Self {
            id: format!("{project}-{kind}"),
            project,
            kind,
            source,
            format,
            interval_secs: interval.as_secs().max(1),
            active: true,
            last_status: JobStatus::Pending,
            last_error: None,
            last_run: None,
            last_duration_ms: None,
            next_run: None,
            items_indexed: 0,
            items_rejected: 0,
            items_updated: 0,
            consecutive_failures: 0,
            run_count: 0,
            alerting: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Resolve a config entry. Unknown formats and unusable sources are rejected here, before
    /// the job is ever scheduled.
    pub fn from_spec(spec: &FeedJobSpec, scheduler: &SchedulerConfig) -> Result<Self, FeedError> {
        let format: FeedFormat = spec.format.parse()?;
        let source: FeedSource = spec.source.parse()?;
        if spec.project.trim().is_empty() {
            return Err(FeedError::InvalidSource("job has no project".into()));
        }
        let interval = spec.interval_secs.map(Duration::from_secs).unwrap_or_else(|| scheduler.default_interval(spec.kind));
        let job = FeedJob::new(spec.project.trim(), spec.kind, source, format, interval);
        Ok(match &spec.id {
            Some(id) => job.with_id(id.clone()),
            None => job,
        })
    }

    /// Take the configured fields (project, kind, source, format, interval) from `spec`,
    /// keeping run status, failures and the paused flag. Returns whether anything changed.
    pub fn adopt_spec(&mut self, spec: &FeedJob) -> bool {
        let changed = self.project != spec.project
            || self.kind != spec.kind
            || self.source != spec.source
            || self.format != spec.format
            || self.interval_secs != spec.interval_secs;
        self.project = spec.project.clone();
        self.kind = spec.kind;
        self.source = spec.source.clone();
        self.format = spec.format;
        self.interval_secs = spec.interval_secs;
        changed
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn record_report(&mut self, report: &RunReport) {
        match report {
            RunReport::Full(r) => {
                self.items_indexed = r.items_indexed;
                self.items_rejected = r.items_rejected;
            }
            RunReport::Delta(r) => {
                self.items_updated = r.items_updated;
                self.items_rejected = r.items_rejected;
            }
        }
    }
}

/// Delay before retry number `failures` (1-based): `base * 2^(failures-1)`, at most `cap`.
pub fn backoff(failures: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = failures.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent).unwrap_or(cap).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(format: &str, source: &str) -> FeedJobSpec {
        FeedJobSpec {
            id: None,
            project: "shop-1".into(),
            kind: FeedKind::Full,
            source: source.into(),
            format: format.into(),
            interval_secs: None,
        }
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let base = Duration::from_secs(30);
        let cap = Duration::from_secs(3600);
        assert_eq!(backoff(1, base, cap), Duration::from_secs(30));
        assert_eq!(backoff(2, base, cap), Duration::from_secs(60));
        assert_eq!(backoff(4, base, cap), Duration::from_secs(240));
        assert_eq!(backoff(8, base, cap), cap);
        assert_eq!(backoff(100, base, cap), cap);
    }

    #[test]
    fn registration_rejects_unknown_formats() {
        let scheduler = SchedulerConfig::default();
        let err = FeedJob::from_spec(&spec("csv", "https://s/feed.csv"), &scheduler).unwrap_err();
        assert!(matches!(err, FeedError::UnknownFormat(_)));
        let err = FeedJob::from_spec(&spec("yml", "ftp://s/feed.xml"), &scheduler).unwrap_err();
        assert!(matches!(err, FeedError::InvalidSource(_)));
    }

    #[test]
    fn registration_fills_defaults() {
        let job = FeedJob::from_spec(&spec("yml", "https://s/feed.xml"), &SchedulerConfig::default()).unwrap();
        assert_eq!(job.id, "shop-1-full");
        assert_eq!(job.interval(), Duration::from_secs(3600));
        assert_eq!(job.last_status, JobStatus::Pending);
        assert!(job.active);
    }

    #[test]
    fn persisted_form_is_snake_case_json() {
        let job = FeedJob::from_spec(&spec("json", "/data/feed.json"), &SchedulerConfig::default()).unwrap();
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["kind"], "full");
        assert_eq!(json["format"], "json");
        assert_eq!(json["source"], "/data/feed.json");
        assert_eq!(json["last_status"], "pending");
        let back: FeedJob = serde_json::from_value(json).unwrap();
        assert_eq!(back, job);
    }
}
