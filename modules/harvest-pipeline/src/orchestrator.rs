//! The run orchestrator: loads validated descriptors, builds one engine
//! per source, walks the pipeline, and writes every artifact under a
//! timestamped run directory. A run report is produced on every exit path,
//! including cancellation.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use harvest_core::config::{ItemsFormat, LoadReport, SourceConfig};
use harvest_core::schedule::parse_frequency;
use harvest_core::{HarvestError, Result};
use harvest_engine::{build_engine, CancelToken};

use crate::dedupe::{DedupeStore, InMemoryDedupeStore};
use crate::diagnostics::{diagnose_http_response, diagnose_rendered_dom};
use crate::report::{RunReportBuilder, SourceReport, SourceStatus};
use crate::stages::{expand_entrypoints, run_pipeline, PipelineArtifacts, PipelineContext};
use crate::storage::{
    write_items, write_json, write_links, write_raw_pages, Layout, WriterOptions,
};

pub use crate::report::RunStatus;

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub results_dir: PathBuf,
    /// Per-source detail-fetch parallelism.
    pub parallelism: usize,
    /// Global worker cap; the per-source value never exceeds it.
    pub max_workers: usize,
    pub only_sources: Option<Vec<String>>,
    pub items_format_override: Option<ItemsFormat>,
    pub dry_run: bool,
    pub strict: bool,
    pub run_id_override: Option<String>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
            parallelism: 16,
            max_workers: 16,
            only_sources: None,
            items_format_override: None,
            dry_run: false,
            strict: false,
            run_id_override: None,
        }
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub report_path: PathBuf,
    pub status: RunStatus,
}

pub struct Orchestrator {
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(options: OrchestratorOptions) -> Self {
        Self { options }
    }

    /// The URLs a run would fetch, per source, without touching the network.
    pub fn plan(&self, sources: &[SourceConfig]) -> Vec<(String, Vec<String>)> {
        self.select_sources(sources)
            .map(|source| {
                let urls = expand_entrypoints(source)
                    .into_iter()
                    .map(|t| t.url)
                    .collect();
                (source.source_id.clone(), urls)
            })
            .collect()
    }

    pub async fn run(&self, load: &LoadReport, cancel: CancelToken) -> Result<RunOutcome> {
        if !load.ok() {
            return Err(HarvestError::Config(load.errors.join("; ")));
        }

        let run_id = self
            .options
            .run_id_override
            .clone()
            .unwrap_or_else(make_run_id);
        let layout = Layout::new(&self.options.results_dir);
        let run_dir = layout.run_dir(&run_id);
        std::fs::create_dir_all(&run_dir)?;

        let run_log = FileLog::open(&layout.run_log_path(&run_id))?;
        run_log.line("INFO", &format!("run {run_id} started"));
        for warning in &load.warnings {
            run_log.line("WARN", warning);
            warn!(run_id = %run_id, warning, "config warning");
        }

        write_json(&layout.config_resolved_path(&run_id), &load.resolved)?;

        let mut report = RunReportBuilder::new(&run_id);
        report.meta.insert(
            "results_dir".to_string(),
            Value::String(self.options.results_dir.display().to_string()),
        );
        report
            .meta
            .insert("parallelism".to_string(), Value::from(self.options.parallelism as u64));
        report
            .meta
            .insert("dry_run".to_string(), Value::Bool(self.options.dry_run));

        write_json(&layout.run_meta_path(&run_id), &run_meta(&run_id))?;

        // One dedupe store for the whole run: cross-source repeats collapse.
        let dedupe_store: Arc<dyn DedupeStore> = Arc::new(InMemoryDedupeStore::new());
        let parallelism = self.options.parallelism.min(self.options.max_workers).max(1);

        let selected: Vec<&SourceConfig> = self.select_sources(&load.sources).collect();
        info!(run_id = %run_id, sources = selected.len(), "run starting");

        for source in selected {
            if cancel.is_cancelled() {
                run_log.line("WARN", "run cancelled; remaining sources skipped");
                break;
            }

            let source_id = source.source_id.clone();
            let source_log = FileLog::open(&layout.source_log_path(&run_id, &source_id))?;
            source_log.line("INFO", "source started");

            if let Err(e) = write_json(
                &layout.source_meta_path(&run_id, &source_id),
                &serde_json::to_value(source)?,
            ) {
                source_log.line("ERROR", &format!("failed writing source meta: {e}"));
            }

            let mut sr = SourceReport::new(&source_id);
            sr.schedule = source
                .schedule
                .as_ref()
                .and_then(|s| s.frequency.as_deref())
                .and_then(parse_frequency)
                .map(|s| s.summary());

            let started = Instant::now();

            if self.options.dry_run {
                let planned = expand_entrypoints(source).len();
                source_log.line("INFO", &format!("dry run: {planned} listing URLs planned"));
                sr.status = SourceStatus::Success;
                sr.elapsed_s = started.elapsed().as_secs_f64();
                report.add_source(sr);
                continue;
            }

            let engine = match build_engine(source) {
                Ok(engine) => engine,
                Err(e) => {
                    error!(source_id = %source_id, error = %e, "engine construction failed");
                    source_log.line("ERROR", &format!("engine construction failed: {e}"));
                    sr.status = SourceStatus::Failed;
                    sr.error = Some(e.to_string());
                    sr.elapsed_s = started.elapsed().as_secs_f64();
                    report.metrics.inc("source_failures", 1.0);
                    report.add_source(sr);
                    continue;
                }
            };

            let artifacts = run_pipeline(PipelineContext {
                source,
                engine: engine.as_ref(),
                parallelism,
                dedupe_store: dedupe_store.clone(),
                cancel: cancel.clone(),
            })
            .await;
            engine.close().await;

            let persist_errors =
                self.persist_artifacts(&layout, &run_id, source, &artifacts, &source_log);

            sr.stats = artifacts.stats.clone();
            sr.latency = crate::report::LatencySummary::from_samples(&artifacts.latencies_ms);
            sr.set_errors(collect_error_reasons(&artifacts));
            sr.diagnosis = representative_diagnosis(&artifacts);
            sr.elapsed_s = started.elapsed().as_secs_f64();

            // HARD_TARGETS=1 surfaces the block-detection diagnosis in the
            // source log for sites known to fight automation.
            if std::env::var("HARD_TARGETS").as_deref() == Ok("1") {
                if let Some(diagnosis) = &sr.diagnosis {
                    source_log.line(
                        "INFO",
                        &format!(
                            "diagnosis: {:?} ({}) — {}",
                            diagnosis.label, diagnosis.reason, diagnosis.recommendation
                        ),
                    );
                }
            }

            let ext = items_ext(self.effective_format(source));
            for name in ["items", "items_valid", "items_dropped"] {
                sr.artifacts.insert(
                    name.to_string(),
                    layout
                        .items_path(&run_id, &source_id, name, ext)
                        .display()
                        .to_string(),
                );
            }
            sr.artifacts.insert(
                "links".to_string(),
                layout.links_path(&run_id, &source_id).display().to_string(),
            );

            let attempted = artifacts.stats.pages_attempted + artifacts.stats.detail_attempted;
            let succeeded = artifacts.stats.pages_succeeded + artifacts.stats.detail_succeeded;
            sr.status = if attempted > 0 && succeeded == 0 {
                SourceStatus::Failed
            } else if cancel.is_cancelled() || artifacts.stats.errors > 0 || persist_errors > 0 {
                SourceStatus::Partial
            } else {
                SourceStatus::Success
            };

            report.metrics.inc(
                "pages_fetched",
                (artifacts.stats.pages_succeeded + artifacts.stats.detail_succeeded) as f64,
            );
            report
                .metrics
                .inc("items_saved", artifacts.stats.items_valid as f64);
            report
                .metrics
                .inc("hybrid_fallbacks", artifacts.stats.fallbacks as f64);
            for sample in &artifacts.latencies_ms {
                report.metrics.observe("fetch_ms", *sample);
            }

            source_log.line(
                "INFO",
                &format!(
                    "source done: {} parsed, {} valid, {} dropped",
                    artifacts.stats.items_parsed,
                    artifacts.stats.items_valid,
                    artifacts.stats.dropped_total()
                ),
            );
            report.add_source(sr);
        }

        if cancel.is_cancelled() {
            report.mark_cancelled();
        }

        let report_json = report.as_json();
        let report_path = layout.run_report_path(&run_id);
        write_json(&report_path, &report_json)?;
        run_log.line(
            "INFO",
            &format!("run finished with status {:?}", report.status()),
        );
        info!(run_id = %run_id, status = ?report.status(), "run finished");

        Ok(RunOutcome {
            run_id,
            run_dir,
            report_path,
            status: report.status(),
        })
    }

    fn select_sources<'a>(
        &'a self,
        sources: &'a [SourceConfig],
    ) -> impl Iterator<Item = &'a SourceConfig> {
        sources.iter().filter(move |source| {
            self.options
                .only_sources
                .as_ref()
                .map_or(true, |only| only.contains(&source.source_id))
        })
    }

    fn effective_format(&self, source: &SourceConfig) -> ItemsFormat {
        self.options
            .items_format_override
            .unwrap_or(source.storage.items_format)
    }

    /// Write every artifact for one source. Failures are logged and
    /// counted; they never abort the run.
    fn persist_artifacts(
        &self,
        layout: &Layout,
        run_id: &str,
        source: &SourceConfig,
        artifacts: &PipelineArtifacts,
        log: &FileLog,
    ) -> u32 {
        let mut failures = 0u32;
        let options = WriterOptions::new(self.options.strict);
        let source_id = &source.source_id;
        let format = self.effective_format(source);

        if source.storage.raw_pages {
            for (kind, pages) in [
                ("listing", &artifacts.listing_pages),
                ("detail", &artifacts.detail_pages),
            ] {
                if let Err(e) = write_raw_pages(layout, run_id, source_id, kind, pages, &options) {
                    failures += 1;
                    log.line("ERROR", &format!("raw {kind} write failed: {e}"));
                }
            }
        }

        if let Err(e) = write_links(layout, run_id, source_id, &artifacts.links) {
            failures += 1;
            log.line("ERROR", &format!("links write failed: {e}"));
        }

        for (name, items) in [
            ("items", &artifacts.items),
            ("items_valid", &artifacts.valid_items),
            ("items_dropped", &artifacts.dropped_items),
        ] {
            if let Err(e) = write_items(layout, run_id, source_id, name, items, format, &options) {
                failures += 1;
                log.line("ERROR", &format!("{name} write failed: {e}"));
            }
        }

        failures
    }
}

fn items_ext(format: ItemsFormat) -> &'static str {
    match format {
        // parquet degrades to jsonl in this binary
        ItemsFormat::Parquet | ItemsFormat::Jsonl => "jsonl",
        ItemsFormat::Csv => "csv",
    }
}

/// `<ts>_<short-id>`: readable, unique, filesystem safe.
fn make_run_id() -> String {
    let ts = Utc::now().format("%Y%m%d_%H%M%S");
    let short = Uuid::new_v4().simple().to_string();
    format!("{ts}_{}", &short[..6])
}

fn run_meta(run_id: &str) -> Value {
    serde_json::json!({
        "run_id": run_id,
        "started_at": Utc::now().to_rfc3339(),
        "host": std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "version": env!("CARGO_PKG_VERSION"),
    })
}

/// Error reasons for the top-K list: transport kinds and non-2xx statuses
/// from every fetch trace, plus drop reasons.
fn collect_error_reasons(artifacts: &PipelineArtifacts) -> Vec<String> {
    let mut reasons = Vec::new();
    for page in artifacts.listing_pages.iter().chain(&artifacts.detail_pages) {
        for entry in &page.fetch.trace {
            if let Some(kind) = entry.error {
                match entry.status {
                    Some(status) if status > 0 => reasons.push(format!("http_{status}")),
                    _ => reasons.push(kind.as_str().to_string()),
                }
            }
        }
    }
    for item in &artifacts.dropped_items {
        if let Some(reason) = item.drop_reason {
            reasons.push(format!("dropped_{}", reason.as_str()));
        }
    }
    reasons
}

/// Diagnose the first listing (or detail) response as a representative
/// signal for the whole source.
fn representative_diagnosis(
    artifacts: &PipelineArtifacts,
) -> Option<crate::diagnostics::Diagnosis> {
    let page = artifacts
        .listing_pages
        .first()
        .or_else(|| artifacts.detail_pages.first())?;
    let rendered = page.fetch.trace.iter().any(|t| t.engine == "browser");
    Some(if rendered {
        diagnose_rendered_dom(&page.fetch.body)
    } else {
        diagnose_http_response(page.fetch.status, &page.fetch.headers, &page.fetch.body)
    })
}

/// Line-oriented log file, one writer per file.
struct FileLog {
    file: Mutex<std::fs::File>,
}

impl FileLog {
    fn open(path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    fn line(&self, level: &str, message: &str) {
        let stamped = format!("{} {level} {message}\n", Utc::now().to_rfc3339());
        if let Ok(mut file) = self.file.lock() {
            let _ = file.write_all(stamped.as_bytes());
        }
    }
}
