//! End-to-end pipeline runs over fixture engines. No network.

use std::sync::Arc;

use harvest_core::config::SourceConfig;
use harvest_core::{BlockSignal, DropReason};
use harvest_engine::testing::{status_response, FixtureEngine};
use harvest_engine::{CancelToken, HybridEngine};
use harvest_pipeline::{run_pipeline, InMemoryDedupeStore, PipelineContext};

fn detail_body(title: &str, text: &str) -> String {
    format!(
        "<html><head><title>{title}</title></head><body><article><h1>{title}</h1><p>{text}</p></article></body></html>"
    )
}

fn listing_body(links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|href| format!(r#"<li><a href="{href}">job</a></li>"#))
        .collect();
    format!("<html><body><ul>{anchors}</ul></body></html>")
}

fn source(json: serde_json::Value) -> SourceConfig {
    serde_json::from_value(json).unwrap()
}

fn jobs_source() -> SourceConfig {
    source(serde_json::json!({
        "source_id": "fix_jobs",
        "engine": {"type": "http"},
        "entrypoints": [{
            "url": "https://fix.test/jobs?page={page}",
            "paging": {"mode": "page", "start": 1, "pages": 2, "step": 1}
        }],
        "discovery": {"link_extract": {
            "method": "regex",
            "pattern": "https://fix\\.test/jobs/\\d+"
        }},
        "validation": {"require_title": true, "require_text": true}
    }))
}

async fn run(source: &SourceConfig, engine: &dyn harvest_engine::Engine) -> harvest_pipeline::PipelineArtifacts {
    run_pipeline(PipelineContext {
        source,
        engine,
        parallelism: 4,
        dedupe_store: Arc::new(InMemoryDedupeStore::new()),
        cancel: CancelToken::new(),
    })
    .await
}

// ---------------------------------------------------------------------------
// Static HTML discovery over two listing pages
// ---------------------------------------------------------------------------

#[tokio::test]
async fn static_discovery_two_pages_five_items() {
    let text = "A long and descriptive posting body with plenty of detail about the role.";
    let mut engine = FixtureEngine::new("http")
        .with_page(
            "https://fix.test/jobs?page=1",
            &listing_body(&[
                "https://fix.test/jobs/1",
                "https://fix.test/jobs/2",
                "https://fix.test/jobs/3",
            ]),
        )
        .with_page(
            "https://fix.test/jobs?page=2",
            &listing_body(&["https://fix.test/jobs/4", "https://fix.test/jobs/5"]),
        );
    for i in 1..=5 {
        engine = engine.with_page(
            &format!("https://fix.test/jobs/{i}"),
            &detail_body(&format!("Job {i}"), text),
        );
    }

    let artifacts = run(&jobs_source(), &engine).await;

    assert_eq!(artifacts.stats.pages_attempted, 2);
    assert_eq!(artifacts.stats.pages_succeeded, 2);
    assert_eq!(artifacts.links.len(), 5);
    assert_eq!(artifacts.stats.detail_attempted, 5);
    assert_eq!(artifacts.stats.items_parsed, 5);
    assert_eq!(artifacts.valid_items.len(), 5);
    assert!(artifacts.dropped_items.is_empty());

    for item in &artifacts.valid_items {
        assert!(item.title.as_deref().is_some_and(|t| !t.is_empty()));
        assert!(!item.text.is_empty());
    }

    // listing pages fetched in pagination order
    assert_eq!(artifacts.listing_pages[0].url, "https://fix.test/jobs?page=1");
    assert_eq!(artifacts.listing_pages[1].url, "https://fix.test/jobs?page=2");
}

// ---------------------------------------------------------------------------
// Block page detection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn block_pages_drop_with_blocked_reason() {
    let engine = FixtureEngine::new("http")
        .with_page(
            "https://fix.test/jobs?page=1",
            &listing_body(&["https://fix.test/jobs/1", "https://fix.test/jobs/2"]),
        )
        .with_page(
            "https://fix.test/jobs/1",
            "<html><body>Please verify you are human</body></html>",
        )
        .with_page(
            "https://fix.test/jobs/2",
            "<html><body>Please verify you are human</body></html>",
        );

    let mut cfg = jobs_source();
    cfg.entrypoints[0].paging.as_mut().unwrap().pages = Some(1);
    cfg.quality.block_patterns = vec!["verify you are human".to_string()];
    cfg.validation.require_title = false;
    cfg.validation.require_text = false;

    let artifacts = run(&cfg, &engine).await;

    assert_eq!(artifacts.valid_items.len(), 0);
    assert_eq!(artifacts.dropped_items.len(), 2);
    for item in &artifacts.dropped_items {
        assert_eq!(item.drop_reason, Some(DropReason::Blocked));
        assert!(item
            .quality_issues
            .iter()
            .any(|i| i.starts_with("blocked_page")));
    }
    assert_eq!(artifacts.stats.dropped_blocked, 2);
}

// ---------------------------------------------------------------------------
// Dedupe across pages differing only in tracking params
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tracking_param_variants_dedupe_to_one_item() {
    let text = "Identical detail page listed from two pagination pages.";
    let engine = FixtureEngine::new("http")
        .with_page(
            "https://fix.test/jobs?page=1",
            &listing_body(&["https://fix.test/jobs/9?fbclid=page1"]),
        )
        .with_page(
            "https://fix.test/jobs?page=2",
            &listing_body(&["https://fix.test/jobs/9?fbclid=page2"]),
        )
        .with_page("https://fix.test/jobs/9", &detail_body("Job 9", text));

    // css extraction keeps the full href, tracking params included
    let mut cfg = jobs_source();
    cfg.discovery.link_extract = serde_json::from_value(serde_json::json!({
        "method": "css", "selector": "a"
    }))
    .unwrap();

    let artifacts = run(&cfg, &engine).await;

    // both raw occurrences survive extraction; both normalize to one URL
    assert_eq!(artifacts.links.len(), 2);
    assert_eq!(
        artifacts.links[0].url_normalized,
        artifacts.links[1].url_normalized
    );
    assert_ne!(artifacts.links[0].url_raw, artifacts.links[1].url_raw);

    assert_eq!(artifacts.valid_items.len(), 1);
    assert_eq!(artifacts.valid_items[0].url, "https://fix.test/jobs/9");
    assert_eq!(artifacts.dropped_items.len(), 1);
    assert_eq!(
        artifacts.dropped_items[0].drop_reason,
        Some(DropReason::Dedupe)
    );
    assert_eq!(artifacts.stats.dropped_dedupe, 1);
}

// ---------------------------------------------------------------------------
// Hybrid fallback on a thin HTTP body
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hybrid_fallback_recovers_full_content() {
    let full = detail_body(
        "Rendered Job",
        &"Full rendered content with every detail intact. ".repeat(10),
    );

    // listing body padded past the hybrid threshold so only the detail
    // page falls back
    let listing = format!(
        "{}<p>{}</p>",
        listing_body(&["https://fix.test/jobs/1"]),
        "listing filler ".repeat(20)
    );
    let http = FixtureEngine::new("http")
        .with_page("https://fix.test/jobs?page=1", &listing)
        .with_page("https://fix.test/jobs/1", "<div id=app></div>");
    let browser = FixtureEngine::new("browser").with_page("https://fix.test/jobs/1", &full);
    let hybrid = HybridEngine::new(Box::new(http), Box::new(browser), 200);

    let mut cfg = jobs_source();
    cfg.entrypoints[0].paging.as_mut().unwrap().pages = Some(1);
    cfg.engine.kind = harvest_core::config::EngineKind::Hybrid;

    let artifacts = run(&cfg, &hybrid).await;

    assert_eq!(artifacts.valid_items.len(), 1);
    assert!(artifacts.valid_items[0].text.contains("Full rendered content"));
    assert_eq!(artifacts.stats.fallbacks, 1);

    let detail = artifacts
        .detail_pages
        .iter()
        .find(|p| p.url == "https://fix.test/jobs/1")
        .unwrap();
    assert!(detail.fetch.trace.len() >= 2);
    assert_eq!(detail.fetch.trace.last().unwrap().engine, "browser");
}

// ---------------------------------------------------------------------------
// Failure routing and artifact-completeness invariants
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_detail_fetches_become_dropped_records() {
    let engine = FixtureEngine::new("http")
        .with_page(
            "https://fix.test/jobs?page=1",
            &listing_body(&["https://fix.test/jobs/1", "https://fix.test/jobs/404"]),
        )
        .with_page(
            "https://fix.test/jobs/1",
            &detail_body("Job 1", "A reasonable amount of text for the posting."),
        )
        .with_response(
            "https://fix.test/jobs/404",
            status_response("https://fix.test/jobs/404", 404, ""),
        );

    let mut cfg = jobs_source();
    cfg.entrypoints[0].paging.as_mut().unwrap().pages = Some(1);

    let artifacts = run(&cfg, &engine).await;

    assert_eq!(artifacts.valid_items.len(), 1);
    let fetch_dropped: Vec<_> = artifacts
        .dropped_items
        .iter()
        .filter(|i| i.drop_reason == Some(DropReason::Fetch))
        .collect();
    assert_eq!(fetch_dropped.len(), 1);
    assert_eq!(fetch_dropped[0].url, "https://fix.test/jobs/404");

    // every extracted link is accounted for exactly once
    assert_eq!(
        artifacts.links.len(),
        artifacts.valid_items.len() + artifacts.dropped_items.len()
    );
}

#[tokio::test]
async fn dedupe_exclusivity_invariant_holds() {
    // mixed outcomes: one valid, one blocked, one invalid, one duplicate
    // (the duplicate arrives from the second listing page with a tracking param)
    let good_text = "Plenty of descriptive text for a valid item to keep.";
    let engine = FixtureEngine::new("http")
        .with_page(
            "https://fix.test/jobs?page=1",
            &listing_body(&[
                "https://fix.test/jobs/1",
                "https://fix.test/jobs/2",
                "https://fix.test/jobs/3",
            ]),
        )
        .with_page(
            "https://fix.test/jobs?page=2",
            &listing_body(&["https://fix.test/jobs/1?utm_source=x"]),
        )
        .with_page("https://fix.test/jobs/1", &detail_body("Job 1", good_text))
        .with_page(
            "https://fix.test/jobs/2",
            "<html><body>Access denied - request blocked</body></html>",
        )
        .with_page("https://fix.test/jobs/3", "<html><body><p>ok</p></body></html>");

    let mut cfg = jobs_source();
    cfg.discovery.link_extract = serde_json::from_value(serde_json::json!({
        "method": "css", "selector": "a"
    }))
    .unwrap();
    cfg.quality.block_patterns = vec!["access denied".to_string()];
    cfg.validation.require_title = true;
    cfg.validation.min_text_len = 30;

    let artifacts = run(&cfg, &engine).await;

    let gated_drops = artifacts.stats.dropped_blocked
        + artifacts.stats.dropped_quality
        + artifacts.stats.dropped_validation
        + artifacts.stats.dropped_dedupe;
    assert_eq!(
        artifacts.stats.items_valid + gated_drops,
        artifacts.stats.items_parsed,
        "valid + gated drops must equal parsed"
    );
    assert_eq!(artifacts.stats.items_valid, 1);
    assert_eq!(artifacts.stats.dropped_blocked, 1);
    assert_eq!(artifacts.stats.dropped_dedupe, 1);
}

#[tokio::test]
async fn cancellation_stops_listing_fetches_cleanly() {
    let engine = FixtureEngine::new("http").with_page(
        "https://fix.test/jobs?page=1",
        &listing_body(&["https://fix.test/jobs/1"]),
    );

    let cancel = CancelToken::new();
    cancel.cancel();

    let artifacts = run_pipeline(PipelineContext {
        source: &jobs_source(),
        engine: &engine,
        parallelism: 2,
        dedupe_store: Arc::new(InMemoryDedupeStore::new()),
        cancel,
    })
    .await;

    assert_eq!(artifacts.stats.pages_attempted, 0);
    assert!(artifacts.valid_items.is_empty());
}

#[tokio::test]
async fn block_signal_rides_along_on_listing_fetches() {
    let engine = FixtureEngine::new("http").with_page(
        "https://fix.test/jobs?page=1",
        "<html>unusual traffic from your network</html>",
    );

    let mut cfg = jobs_source();
    cfg.entrypoints[0].paging.as_mut().unwrap().pages = Some(1);

    let artifacts = run(&cfg, &engine).await;
    assert_eq!(
        artifacts.listing_pages[0].fetch.block_signal,
        BlockSignal::LikelyBlocked
    );
    // a blocked listing still counts as fetched; extraction simply finds nothing
    assert_eq!(artifacts.links.len(), 0);
}
