//! `harvest` — run config-driven scrapes from the command line.
//!
//! Exit codes: `run` returns 0 when every source succeeded, 1 when any
//! source was partial or failed, 2 on fatal errors (bad config, engine
//! construction). `validate` returns 2 on an invalid config; `doctor`
//! returns 1 when a transport backend is missing.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use harvest_core::config::{load_sources, ItemsFormat};
use harvest_engine::{build_engine, find_chromium, CancelToken, Engine, FetchContext};
use harvest_pipeline::{Orchestrator, OrchestratorOptions, RunStatus};

#[derive(Parser)]
#[command(name = "harvest", about = "Config-driven scraping engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ItemsFormatArg {
    Jsonl,
    Csv,
    Parquet,
}

impl From<ItemsFormatArg> for ItemsFormat {
    fn from(arg: ItemsFormatArg) -> Self {
        match arg {
            ItemsFormatArg::Jsonl => ItemsFormat::Jsonl,
            ItemsFormatArg::Csv => ItemsFormat::Csv,
            ItemsFormatArg::Parquet => ItemsFormat::Parquet,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Check environment readiness: HTTP stack and browser backend.
    Doctor,
    /// Validate a config file; exit 0 when valid, 2 when invalid.
    Validate {
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Run the scraping pipeline for the configured sources.
    Run {
        #[arg(long, short)]
        config: PathBuf,
        /// Run only these source ids.
        #[arg(long)]
        only: Vec<String>,
        /// Validate and plan without fetching.
        #[arg(long)]
        dry_run: bool,
        /// Override the items output format for every source.
        #[arg(long, value_enum)]
        items_format: Option<ItemsFormatArg>,
        /// Results output directory.
        #[arg(long, default_value = "results")]
        results: PathBuf,
        /// Detail-fetch parallelism per source.
        #[arg(long, short, default_value_t = 16)]
        parallelism: usize,
        /// Fail on degraded writes instead of falling back.
        #[arg(long)]
        strict: bool,
        /// Run-level deadline in seconds; the run finalizes as partial.
        #[arg(long)]
        max_runtime_s: Option<u64>,
    },
    /// Describe the URLs a run would fetch, without fetching.
    Plan {
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Save an HTML fixture for tests.
    CaptureFixture {
        #[arg(long)]
        url: String,
        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("harvest=info")),
        )
        .init();

    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Doctor => doctor().await,
        Command::Validate { config } => validate(&config),
        Command::Run {
            config,
            only,
            dry_run,
            items_format,
            results,
            parallelism,
            strict,
            max_runtime_s,
        } => {
            run(
                &config,
                only,
                dry_run,
                items_format.map(Into::into),
                results,
                parallelism,
                strict,
                max_runtime_s,
            )
            .await
        }
        Command::Plan { config } => plan(&config),
        Command::CaptureFixture { url, out } => capture_fixture(&url, &out).await,
    }
}

/// Environment check: exit 0 when both transports are usable, 1 otherwise.
async fn doctor() -> Result<ExitCode> {
    let mut ok = true;
    let mut checks = serde_json::Map::new();

    let http = harvest_engine::HttpEngine::new(&Default::default());
    checks.insert(
        "http".to_string(),
        match &http {
            Ok(_) => serde_json::json!({"ok": true}),
            Err(e) => {
                ok = false;
                serde_json::json!({"ok": false, "error": e.to_string()})
            }
        },
    );

    match find_chromium() {
        Some(path) => {
            let launched = tokio::time::timeout(
                Duration::from_secs(10),
                tokio::process::Command::new(&path).arg("--version").output(),
            )
            .await;
            let version = match launched {
                Ok(Ok(output)) if output.status.success() => {
                    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
                }
                _ => None,
            };
            checks.insert(
                "chromium".to_string(),
                serde_json::json!({
                    "ok": version.is_some(),
                    "path": path.display().to_string(),
                    "version": version,
                    "hint": "browser and hybrid engines need a launchable Chromium",
                }),
            );
        }
        None => {
            checks.insert(
                "chromium".to_string(),
                serde_json::json!({
                    "ok": false,
                    "error": "no Chromium binary found",
                    "hint": "install chromium or set HARVEST_CHROMIUM; http engines still work",
                }),
            );
        }
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({"ok": ok, "checks": checks}))?
    );
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::from(1) })
}

fn validate(config: &PathBuf) -> Result<ExitCode> {
    let report = load_sources(config)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "ok": report.ok(),
            "sources": report.sources.iter().map(|s| s.source_id.clone()).collect::<Vec<_>>(),
            "errors": report.errors,
            "warnings": report.warnings,
            "migrations": report.migrations,
        }))?
    );
    Ok(if report.ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

#[allow(clippy::too_many_arguments)]
async fn run(
    config: &PathBuf,
    only: Vec<String>,
    dry_run: bool,
    items_format: Option<ItemsFormat>,
    results: PathBuf,
    parallelism: usize,
    strict: bool,
    max_runtime_s: Option<u64>,
) -> Result<ExitCode> {
    let load = load_sources(config)?;
    if !load.ok() {
        for error in &load.errors {
            eprintln!("config error: {error}");
        }
        return Ok(ExitCode::from(2));
    }

    let cancel = match max_runtime_s {
        Some(secs) => CancelToken::with_deadline(Duration::from_secs(secs)),
        None => CancelToken::new(),
    };

    // Ctrl-C flips the cancel flag; the run finalizes as partial.
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; finishing in-flight work");
            signal_cancel.cancel();
        }
    });

    let orchestrator = Orchestrator::new(OrchestratorOptions {
        results_dir: results,
        parallelism,
        only_sources: (!only.is_empty()).then_some(only),
        items_format_override: items_format,
        dry_run,
        strict,
        ..Default::default()
    });

    let outcome = orchestrator.run(&load, cancel).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "run_id": outcome.run_id,
            "run_dir": outcome.run_dir.display().to_string(),
            "run_report": outcome.report_path.display().to_string(),
            "status": match outcome.status {
                RunStatus::Success => "success",
                RunStatus::Partial => "partial",
                RunStatus::Failed => "failed",
            },
        }))?
    );

    Ok(match outcome.status {
        RunStatus::Success => ExitCode::SUCCESS,
        RunStatus::Partial | RunStatus::Failed => ExitCode::from(1),
    })
}

fn plan(config: &PathBuf) -> Result<ExitCode> {
    let load = load_sources(config)?;
    if !load.ok() {
        for error in &load.errors {
            eprintln!("config error: {error}");
        }
        return Ok(ExitCode::from(2));
    }

    let orchestrator = Orchestrator::new(OrchestratorOptions::default());
    let plan = orchestrator.plan(&load.sources);
    let json: serde_json::Map<String, serde_json::Value> = plan
        .into_iter()
        .map(|(source_id, urls)| (source_id, serde_json::json!(urls)))
        .collect();
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(ExitCode::SUCCESS)
}

/// Fetch one URL over plain HTTP and save the body as a test fixture.
async fn capture_fixture(url: &str, out: &PathBuf) -> Result<ExitCode> {
    let source: harvest_core::config::SourceConfig = serde_json::from_value(serde_json::json!({
        "source_id": "capture_fixture",
        "engine": {"type": "http"},
        "entrypoints": [{"url": url}],
    }))?;
    let engine = build_engine(&source).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let response = engine
        .get(url, &FetchContext::new(CancelToken::new()))
        .await;
    engine.close().await;

    if !response.ok() {
        eprintln!("fetch failed: {}", response.short_error());
        return Ok(ExitCode::from(1));
    }

    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(out, &response.body)
        .with_context(|| format!("failed writing fixture to {}", out.display()))?;
    println!("saved {} bytes to {}", response.body.len(), out.display());
    Ok(ExitCode::SUCCESS)
}
