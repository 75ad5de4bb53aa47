//! Pipeline stages, engine-agnostic and config-driven:
//! expand entrypoints → fetch listings → extract links → fetch details →
//! parse → quality → validate → dedupe.
//!
//! Listings are fetched sequentially in pagination order; details run with
//! bounded parallelism and are processed in completion order. First-seen
//! semantics come from the dedupe stage keying on normalized URLs, not
//! from completion order.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use harvest_core::config::{EngineKind, SourceConfig};
use harvest_core::{DropReason, ExtractedLink, FetchResponse, Item};
use harvest_engine::{CancelToken, Engine, FetchContext};

use crate::dedupe::{check_item, DedupeDecision, DedupeStore};
use crate::extract::{extract_links, html_to_structured, LinkExtractRequest};
use crate::quality::evaluate_quality;
use crate::validate::validate_item;

#[derive(Debug, Clone, Default, Serialize)]
pub struct StageStats {
    pub pages_attempted: u32,
    pub pages_succeeded: u32,
    pub detail_attempted: u32,
    pub detail_succeeded: u32,
    pub links_found: u32,
    pub items_parsed: u32,
    pub items_valid: u32,
    pub dropped_blocked: u32,
    pub dropped_quality: u32,
    pub dropped_validation: u32,
    pub dropped_dedupe: u32,
    pub dropped_fetch: u32,
    pub fallbacks: u32,
    pub errors: u32,
}

impl StageStats {
    pub fn dropped_total(&self) -> u32 {
        self.dropped_blocked
            + self.dropped_quality
            + self.dropped_validation
            + self.dropped_dedupe
            + self.dropped_fetch
    }
}

/// One listing URL to fetch, with its entrypoint's request decoration.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingTarget {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct PageRecord {
    pub url: String,
    pub fetch: FetchResponse,
}

#[derive(Debug, Default)]
pub struct PipelineArtifacts {
    pub listing_pages: Vec<PageRecord>,
    pub detail_pages: Vec<PageRecord>,
    pub links: Vec<ExtractedLink>,
    /// Every parsed item, pre-gates.
    pub items: Vec<Item>,
    pub valid_items: Vec<Item>,
    pub dropped_items: Vec<Item>,
    /// Fetch latencies (ms) for responses that reached the wire.
    pub latencies_ms: Vec<u64>,
    pub stats: StageStats,
}

/// Materialize `{page}` / `{offset}` templates. The sequence is
/// deterministic: same descriptor, same URLs, same order, every time.
pub fn expand_entrypoints(source: &SourceConfig) -> Vec<ListingTarget> {
    let mut seen = std::collections::HashSet::new();
    let mut targets = Vec::new();

    for entrypoint in &source.entrypoints {
        let template = entrypoint.url.trim();
        if template.is_empty() {
            continue;
        }

        let urls: Vec<String> = match &entrypoint.paging {
            None => vec![template.to_string()],
            Some(paging) => {
                let placeholder = match paging.mode {
                    harvest_core::config::PagingMode::Page => "{page}",
                    harvest_core::config::PagingMode::Offset => "{offset}",
                };
                (0..paging.pages())
                    .map(|i| {
                        let value = paging.start() + i as i64 * paging.step();
                        template.replace(placeholder, &value.to_string())
                    })
                    .collect()
            }
        };

        for url in urls {
            if seen.insert(url.clone()) {
                targets.push(ListingTarget {
                    url,
                    headers: entrypoint.headers.clone(),
                    cookies: entrypoint.cookies.clone(),
                });
            }
        }
    }

    targets
}

pub struct PipelineContext<'a> {
    pub source: &'a SourceConfig,
    pub engine: &'a dyn Engine,
    pub parallelism: usize,
    pub dedupe_store: Arc<dyn DedupeStore>,
    pub cancel: CancelToken,
}

pub async fn run_pipeline(ctx: PipelineContext<'_>) -> PipelineArtifacts {
    let mut artifacts = PipelineArtifacts::default();
    let source = ctx.source;
    let engine_kind = source.engine.kind;

    // 1) entrypoint expansion
    let targets = expand_entrypoints(source);
    debug!(
        source_id = %source.source_id,
        listing_urls = targets.len(),
        "entrypoints expanded"
    );

    // 2) listing fetches, sequential in pagination order
    for target in &targets {
        if ctx.cancel.is_cancelled() {
            info!(source_id = %source.source_id, "cancelled during listing fetch");
            break;
        }

        let fetch_ctx = FetchContext::new(ctx.cancel.clone())
            .with_headers(target.headers.clone())
            .with_cookies(target.cookies.clone());

        let response = match engine_kind {
            EngineKind::Browser => {
                ctx.engine
                    .get_rendered(
                        &target.url,
                        &fetch_ctx,
                        &source.actions,
                        source.discovery.wait_for.as_deref(),
                    )
                    .await
            }
            _ => ctx.engine.get(&target.url, &fetch_ctx).await,
        };

        artifacts.stats.pages_attempted += 1;
        record_fetch(&response, &mut artifacts.stats, &mut artifacts.latencies_ms);
        if response.ok() && !response.body.is_empty() {
            artifacts.stats.pages_succeeded += 1;
        } else {
            artifacts.stats.errors += 1;
            warn!(
                source_id = %source.source_id,
                url = %target.url,
                error = %response.short_error(),
                "listing fetch failed"
            );
        }

        artifacts.listing_pages.push(PageRecord {
            url: target.url.clone(),
            fetch: response,
        });
    }

    // 3) link extraction; unique per page, raw repeats collapsed across pages
    let mut seen_raw = std::collections::HashSet::new();
    for page in &artifacts.listing_pages {
        if !page.fetch.ok() || page.fetch.body.is_empty() {
            continue;
        }
        let links = extract_links(&LinkExtractRequest {
            html: &page.fetch.body,
            base_url: &page.url,
            config: &source.discovery.link_extract,
        });
        for link in links {
            if seen_raw.insert(link.url_raw.clone()) {
                artifacts.links.push(link);
            }
        }
    }
    artifacts.stats.links_found = artifacts.links.len() as u32;
    info!(
        source_id = %source.source_id,
        links = artifacts.stats.links_found,
        "links extracted"
    );

    // 4) detail fetches, bounded parallelism, processed in completion order
    let semaphore = Arc::new(Semaphore::new(ctx.parallelism.max(1)));
    let mut detail_futures = FuturesUnordered::new();
    for (index, link) in artifacts.links.iter().enumerate() {
        let url = link.url_normalized.clone();
        let semaphore = semaphore.clone();
        let cancel = ctx.cancel.clone();
        let engine = ctx.engine;
        let actions = &source.actions;
        detail_futures.push(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore open");
            let fetch_ctx = FetchContext::new(cancel);
            let response = match engine_kind {
                EngineKind::Browser => engine.get_rendered(&url, &fetch_ctx, actions, None).await,
                _ => engine.get(&url, &fetch_ctx).await,
            };
            (index, url, response)
        });
    }

    let mut detail_results: Vec<(usize, String, FetchResponse)> = Vec::new();
    while let Some(result) = detail_futures.next().await {
        detail_results.push(result);
    }
    drop(detail_futures);

    // 5..8) parse, quality, validate, dedupe — in completion order
    let content_fields = &source.discovery.dedupe.content_fields;
    for (index, url, response) in detail_results {
        let link = &artifacts.links[index];
        artifacts.stats.detail_attempted += 1;
        record_fetch(&response, &mut artifacts.stats, &mut artifacts.latencies_ms);

        let ok = response.ok() && !response.body.is_empty();
        if !ok {
            artifacts.stats.errors += 1;
            artifacts.stats.dropped_fetch += 1;
            let mut dropped = Item::new(link.url_normalized.clone(), None, "");
            dropped.drop_reason = Some(DropReason::Fetch);
            dropped.meta.insert(
                "fetch_error".to_string(),
                Value::String(response.short_error()),
            );
            dropped
                .meta
                .insert("status".to_string(), Value::from(response.status));
            artifacts.dropped_items.push(dropped);
            artifacts.detail_pages.push(PageRecord { url, fetch: response });
            continue;
        }
        artifacts.stats.detail_succeeded += 1;

        let doc = html_to_structured(&response.body, Some(&response.final_url), &source.parse);
        let mut item = Item::new(link.url_normalized.clone(), doc.title, doc.text);
        item.meta = doc.meta;
        item.meta
            .insert("final_url".to_string(), Value::String(response.final_url.clone()));
        item.meta
            .insert("status".to_string(), Value::from(response.status));
        item.meta.insert(
            "fetched_at".to_string(),
            Value::String(response.fetched_at.to_rfc3339()),
        );

        artifacts.stats.items_parsed += 1;
        artifacts.items.push(item.clone());

        // quality gates run against both the extracted text and the raw body
        let quality = evaluate_quality(&item, &response.body, &source.quality);
        if !quality.keep() {
            item.quality_issues = quality.issues;
            item.drop_reason = Some(if quality.blocked {
                artifacts.stats.dropped_blocked += 1;
                DropReason::Blocked
            } else {
                artifacts.stats.dropped_quality += 1;
                DropReason::Quality
            });
            artifacts.dropped_items.push(item);
            artifacts.detail_pages.push(PageRecord { url, fetch: response });
            continue;
        }

        let validation_errors = validate_item(&item, &source.validation);
        if !validation_errors.is_empty() {
            item.validation_errors = validation_errors;
            item.drop_reason = Some(DropReason::Validation);
            artifacts.stats.dropped_validation += 1;
            artifacts.dropped_items.push(item);
            artifacts.detail_pages.push(PageRecord { url, fetch: response });
            continue;
        }

        match check_item(ctx.dedupe_store.as_ref(), &item, content_fields) {
            DedupeDecision::Keep => {
                artifacts.stats.items_valid += 1;
                artifacts.valid_items.push(item);
            }
            decision => {
                item.drop_reason = Some(DropReason::Dedupe);
                item.meta.insert(
                    "dedupe_kind".to_string(),
                    Value::String(
                        match decision {
                            DedupeDecision::DuplicateUrl => "url",
                            _ => "content",
                        }
                        .to_string(),
                    ),
                );
                artifacts.stats.dropped_dedupe += 1;
                artifacts.dropped_items.push(item);
            }
        }

        artifacts.detail_pages.push(PageRecord { url, fetch: response });
    }

    info!(
        source_id = %source.source_id,
        parsed = artifacts.stats.items_parsed,
        valid = artifacts.stats.items_valid,
        dropped = artifacts.stats.dropped_total(),
        "pipeline finished"
    );

    artifacts
}

fn record_fetch(response: &FetchResponse, stats: &mut StageStats, latencies: &mut Vec<u64>) {
    if response.status > 0 {
        latencies.push(response.elapsed_ms);
    }
    let fallback_fired = response
        .trace
        .iter()
        .any(|t| t.engine == "hybrid" && t.note.as_deref().is_some_and(|n| n.contains("fallback")));
    if fallback_fired {
        stats.fallbacks += 1;
    }
}
