//! Run reporting: per-source summaries, error top-K, latency percentiles,
//! and a metrics registry scoped to the run (no process-wide state).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::diagnostics::Diagnosis;
use crate::stages::StageStats;

/// How many distinct error reasons a source report keeps.
const TOP_ERRORS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorCount {
    pub reason: String,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct LatencySummary {
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub samples: usize,
}

impl LatencySummary {
    pub fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        Self {
            p50_ms: percentile(&sorted, 0.50),
            p95_ms: percentile(&sorted, 0.95),
            samples: sorted.len(),
        }
    }
}

/// Nearest-rank percentile over a sorted sample set.
fn percentile(sorted: &[u64], q: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((sorted.len() as f64) * q).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source_id: String,
    pub status: SourceStatus,
    pub stats: StageStats,
    pub top_errors: Vec<ErrorCount>,
    pub latency: LatencySummary,
    pub elapsed_s: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<Diagnosis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub artifacts: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceReport {
    pub fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            status: SourceStatus::Failed,
            stats: StageStats::default(),
            top_errors: Vec::new(),
            latency: LatencySummary::default(),
            elapsed_s: 0.0,
            diagnosis: None,
            schedule: None,
            artifacts: BTreeMap::new(),
            error: None,
        }
    }

    /// Fold error reasons into a bounded top-K list.
    pub fn set_errors(&mut self, reasons: impl IntoIterator<Item = String>) {
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for reason in reasons {
            *counts.entry(reason).or_default() += 1;
        }
        let mut errors: Vec<ErrorCount> = counts
            .into_iter()
            .map(|(reason, count)| ErrorCount { reason, count })
            .collect();
        errors.sort_by(|a, b| b.count.cmp(&a.count).then(a.reason.cmp(&b.reason)));
        errors.truncate(TOP_ERRORS);
        self.top_errors = errors;
    }
}

/// Counters, gauges, and latency samples for the run, exported into the
/// report. Scoped to one run; never global.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: BTreeMap<String, f64>,
    gauges: BTreeMap<String, f64>,
    samples: BTreeMap<String, Vec<u64>>,
}

impl MetricsRegistry {
    pub fn inc(&mut self, name: &str, value: f64) {
        *self.counters.entry(name.to_string()).or_default() += value;
    }

    pub fn set_gauge(&mut self, name: &str, value: f64) {
        self.gauges.insert(name.to_string(), value);
    }

    pub fn observe(&mut self, name: &str, value_ms: u64) {
        self.samples.entry(name.to_string()).or_default().push(value_ms);
    }

    pub fn as_json(&self) -> Value {
        let timers: BTreeMap<String, Value> = self
            .samples
            .iter()
            .map(|(name, samples)| {
                let summary = LatencySummary::from_samples(samples);
                (
                    name.clone(),
                    serde_json::json!({
                        "count": summary.samples,
                        "p50_ms": summary.p50_ms,
                        "p95_ms": summary.p95_ms,
                    }),
                )
            })
            .collect();
        serde_json::json!({
            "counters": self.counters,
            "gauges": self.gauges,
            "timers": timers,
        })
    }
}

/// Accumulates source reports and produces `run_report.json` exactly once.
#[derive(Debug)]
pub struct RunReportBuilder {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub meta: BTreeMap<String, Value>,
    pub metrics: MetricsRegistry,
    sources: Vec<SourceReport>,
    cancelled: bool,
}

impl RunReportBuilder {
    pub fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            started_at: Utc::now(),
            meta: BTreeMap::new(),
            metrics: MetricsRegistry::default(),
            sources: Vec::new(),
            cancelled: false,
        }
    }

    pub fn add_source(&mut self, report: SourceReport) {
        self.sources.push(report);
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub fn status(&self) -> RunStatus {
        if self.cancelled {
            return RunStatus::Partial;
        }
        let total = self.sources.len();
        let succeeded = self
            .sources
            .iter()
            .filter(|s| s.status == SourceStatus::Success)
            .count();
        let failed = self
            .sources
            .iter()
            .filter(|s| s.status == SourceStatus::Failed)
            .count();
        if total > 0 && succeeded == total {
            RunStatus::Success
        } else if total > 0 && failed == total {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        }
    }

    pub fn as_json(&self) -> Value {
        let finished_at = Utc::now();
        let succeeded = self
            .sources
            .iter()
            .filter(|s| s.status == SourceStatus::Success)
            .count();
        let partial = self
            .sources
            .iter()
            .filter(|s| s.status == SourceStatus::Partial)
            .count();
        let failed = self
            .sources
            .iter()
            .filter(|s| s.status == SourceStatus::Failed)
            .count();

        serde_json::json!({
            "run_id": self.run_id,
            "status": self.status(),
            "started_at": self.started_at.to_rfc3339(),
            "finished_at": finished_at.to_rfc3339(),
            "elapsed_s": (finished_at - self.started_at).num_milliseconds() as f64 / 1000.0,
            "cancelled": self.cancelled,
            "meta": self.meta,
            "summary": {
                "sources_total": self.sources.len(),
                "sources_succeeded": succeeded,
                "sources_partial": partial,
                "sources_failed": failed,
            },
            "sources": self.sources,
            "metrics": self.metrics.as_json(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_on_known_samples() {
        let samples: Vec<u64> = (1..=100).collect();
        let summary = LatencySummary::from_samples(&samples);
        assert_eq!(summary.p50_ms, 50);
        assert_eq!(summary.p95_ms, 95);
        assert_eq!(summary.samples, 100);
    }

    #[test]
    fn percentiles_on_tiny_samples() {
        assert_eq!(LatencySummary::from_samples(&[]).p50_ms, 0);
        let one = LatencySummary::from_samples(&[42]);
        assert_eq!((one.p50_ms, one.p95_ms), (42, 42));
    }

    #[test]
    fn top_errors_are_bounded_and_ordered() {
        let mut report = SourceReport::new("s");
        let reasons = std::iter::repeat("timeout".to_string())
            .take(5)
            .chain(std::iter::repeat("http_503".to_string()).take(3))
            .chain((0..10).map(|i| format!("rare_{i}")));
        report.set_errors(reasons);
        assert_eq!(report.top_errors.len(), TOP_ERRORS);
        assert_eq!(report.top_errors[0].reason, "timeout");
        assert_eq!(report.top_errors[0].count, 5);
        assert_eq!(report.top_errors[1].reason, "http_503");
    }

    #[test]
    fn run_status_aggregation() {
        let mut builder = RunReportBuilder::new("r1");
        assert_eq!(builder.status(), RunStatus::Partial); // no sources yet

        let mut ok = SourceReport::new("a");
        ok.status = SourceStatus::Success;
        builder.add_source(ok.clone());
        assert_eq!(builder.status(), RunStatus::Success);

        let mut failed = SourceReport::new("b");
        failed.status = SourceStatus::Failed;
        builder.add_source(failed);
        assert_eq!(builder.status(), RunStatus::Partial);
    }

    #[test]
    fn cancelled_run_is_partial_regardless() {
        let mut builder = RunReportBuilder::new("r1");
        let mut ok = SourceReport::new("a");
        ok.status = SourceStatus::Success;
        builder.add_source(ok);
        builder.mark_cancelled();
        assert_eq!(builder.status(), RunStatus::Partial);
        assert_eq!(builder.as_json()["status"], "partial");
    }

    #[test]
    fn report_json_has_the_contract_fields() {
        let mut builder = RunReportBuilder::new("r1");
        let mut source = SourceReport::new("a");
        source.status = SourceStatus::Success;
        source.latency = LatencySummary::from_samples(&[10, 20, 30]);
        builder.add_source(source);
        builder.metrics.inc("pages_fetched", 3.0);

        let json = builder.as_json();
        assert_eq!(json["run_id"], "r1");
        assert_eq!(json["summary"]["sources_total"], 1);
        assert_eq!(json["sources"][0]["latency"]["p50_ms"], 20);
        assert_eq!(json["metrics"]["counters"]["pages_fetched"], 3.0);
    }
}
