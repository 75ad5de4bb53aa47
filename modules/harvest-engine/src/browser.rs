//! Headless-browser engine over CDP (chromiumoxide).
//!
//! One Chromium process per engine, one fresh page per request. A page that
//! errors is discarded, never reused; a browser that dies is relaunched on
//! the next request. Concurrent pages are capped because each tab is heavy.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetBlockedUrLsParams;
use chromiumoxide::page::Page;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use harvest_core::config::{Action, EngineConfig};
use harvest_core::{
    classify_block, EngineError, ErrorKind, FetchResponse, HarvestError, TraceEntry,
};

use crate::actions::{run_actions, wait_for_selector};
use crate::cancel::CancelToken;
use crate::engine::{Engine, FetchContext};
use crate::limiter::HostLimiters;
use crate::retry::RetryPolicy;

/// Max concurrent pages per browser instance. Each tab is ~100MB+ RSS.
const MAX_CONCURRENT_PAGES: usize = 2;

/// Render and wait timeouts are surfaced once and retried at most once.
const MAX_RENDER_RETRIES: u32 = 1;

const IMAGE_URL_PATTERNS: &[&str] = &["*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.ico"];
const FONT_URL_PATTERNS: &[&str] = &["*.woff", "*.woff2", "*.ttf", "*.otf", "*.eot"];

/// Locate a Chromium binary: explicit override first, then PATH.
pub fn find_chromium() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("HARVEST_CHROMIUM") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    for name in ["chromium", "chromium-browser", "google-chrome", "chrome"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

struct ActionNote {
    summary: String,
    aborted: bool,
}

struct BrowserHandle {
    browser: Browser,
    handler_task: JoinHandle<()>,
    // Profile dir must outlive the process.
    _profile_dir: tempfile::TempDir,
}

pub struct BrowserEngine {
    chrome_path: PathBuf,
    headless: bool,
    user_agent: Option<String>,
    nav_timeout: Duration,
    render_timeout: Duration,
    block_images: bool,
    block_fonts: bool,
    limiters: HostLimiters,
    retry: RetryPolicy,
    handle: Mutex<Option<BrowserHandle>>,
    pages: Semaphore,
}

impl BrowserEngine {
    pub fn new(config: &EngineConfig) -> Result<Self, HarvestError> {
        let chrome_path = find_chromium().ok_or_else(|| {
            HarvestError::Engine(
                "no Chromium binary found; install chromium or set HARVEST_CHROMIUM".to_string(),
            )
        })?;

        Ok(Self {
            chrome_path,
            headless: config.browser.headless,
            user_agent: config.user_agent.clone(),
            nav_timeout: Duration::from_secs_f64(config.browser.nav_timeout_s),
            render_timeout: Duration::from_secs_f64(config.browser.render_timeout_s),
            block_images: config.browser.block_images,
            block_fonts: config.browser.block_fonts,
            limiters: HostLimiters::new(config.rate_limit.clone()),
            retry: RetryPolicy::from_config(&config.retry),
            handle: Mutex::new(None),
            pages: Semaphore::new(MAX_CONCURRENT_PAGES),
        })
    }

    async fn ensure_started(&self) -> Result<(), EngineError> {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return Ok(());
        }

        let profile_dir = tempfile::tempdir().map_err(|e| EngineError {
            kind: ErrorKind::Transport,
            message: format!("failed to create profile dir: {e}"),
            retryable: false,
        })?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(&self.chrome_path)
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg(format!("--user-data-dir={}", profile_dir.path().display()));
        if self.headless {
            builder = builder.arg("--headless=new");
        } else {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(|e| EngineError {
            kind: ErrorKind::Transport,
            message: format!("failed to build browser config: {e}"),
            retryable: false,
        })?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(|e| EngineError {
            kind: ErrorKind::Transport,
            message: format!("failed to launch Chromium: {e}"),
            retryable: true,
        })?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        info!(chrome = %self.chrome_path.display(), "browser launched");
        *handle = Some(BrowserHandle {
            browser,
            handler_task,
            _profile_dir: profile_dir,
        });
        Ok(())
    }

    /// Drop the browser so the next request relaunches from scratch.
    async fn discard_browser(&self) {
        let mut handle = self.handle.lock().await;
        if let Some(mut h) = handle.take() {
            let _ = h.browser.close().await;
            h.handler_task.abort();
            warn!("browser discarded after failure");
        }
    }

    async fn new_page(&self) -> Result<Page, EngineError> {
        self.ensure_started().await?;
        let handle = self.handle.lock().await;
        let browser = &handle.as_ref().expect("browser started above").browser;
        browser.new_page("about:blank").await.map_err(|e| EngineError {
            kind: ErrorKind::Transport,
            message: format!("failed to open page: {e}"),
            retryable: true,
        })
    }

    async fn render_once(
        &self,
        url: &str,
        cancel: &CancelToken,
        actions: &[Action],
        wait_for: Option<&str>,
    ) -> Result<(FetchResponse, Option<ActionNote>), EngineError> {
        let start = Instant::now();
        let page = self.new_page().await?;

        let result = self
            .drive_page(&page, url, cancel, actions, wait_for, start)
            .await;
        let _ = page.close().await;
        result
    }

    async fn drive_page(
        &self,
        page: &Page,
        url: &str,
        cancel: &CancelToken,
        actions: &[Action],
        wait_for: Option<&str>,
        start: Instant,
    ) -> Result<(FetchResponse, Option<ActionNote>), EngineError> {
        if let Some(ua) = &self.user_agent {
            page.set_user_agent(ua.as_str()).await.map_err(|e| EngineError {
                kind: ErrorKind::Transport,
                message: format!("set_user_agent failed: {e}"),
                retryable: true,
            })?;
        }

        let mut blocked: Vec<String> = Vec::new();
        if self.block_images {
            blocked.extend(IMAGE_URL_PATTERNS.iter().map(|p| p.to_string()));
        }
        if self.block_fonts {
            blocked.extend(FONT_URL_PATTERNS.iter().map(|p| p.to_string()));
        }
        if !blocked.is_empty() {
            page.execute(SetBlockedUrLsParams::new(blocked))
                .await
                .map_err(|e| EngineError {
                    kind: ErrorKind::Transport,
                    message: format!("failed to block resources: {e}"),
                    retryable: true,
                })?;
        }

        match tokio::time::timeout(self.nav_timeout, page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(EngineError {
                    kind: ErrorKind::Transport,
                    message: format!("navigation failed: {e}"),
                    retryable: true,
                })
            }
            Err(_) => {
                return Err(EngineError {
                    kind: ErrorKind::RenderTimeout,
                    message: format!("navigation timed out after {:?}", self.nav_timeout),
                    retryable: true,
                })
            }
        }
        let _ = page.wait_for_navigation().await;

        if let Some(selector) = wait_for {
            wait_for_selector(page, selector, self.render_timeout, cancel)
                .await
                .map_err(|message| EngineError {
                    kind: ErrorKind::WaitTimeout,
                    message,
                    retryable: true,
                })?;
        }

        let mut action_note = None;
        if !actions.is_empty() {
            let run = run_actions(page, actions, cancel).await;
            debug!(url, summary = %run.summary(), "action sequence finished");
            action_note = Some(ActionNote {
                summary: run.summary(),
                aborted: run.aborted,
            });
        }

        let html = match page.content().await {
            Ok(html) => html,
            Err(_) => page
                .evaluate("document.documentElement.outerHTML")
                .await
                .ok()
                .and_then(|v| v.into_value::<String>().ok())
                .unwrap_or_default(),
        };

        let final_url = page
            .url()
            .await
            .ok()
            .flatten()
            .map(|u| u.to_string())
            .unwrap_or_else(|| url.to_string());

        let block_signal = classify_block(&html);
        let response = FetchResponse {
            final_url,
            // CDP does not surface the HTTP status of the main document
            // cheaply; a completed navigation reports as 200.
            status: 200,
            headers: BTreeMap::new(),
            body: html,
            fetched_at: Utc::now(),
            elapsed_ms: start.elapsed().as_millis() as u64,
            trace: Vec::new(),
            block_signal,
            error: None,
        };
        Ok((response, action_note))
    }

    async fn rendered_fetch(
        &self,
        url: &str,
        ctx: &FetchContext,
        actions: &[Action],
        wait_for: Option<&str>,
    ) -> FetchResponse {
        let _permit = match self.pages.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return FetchResponse::failure(
                    url,
                    EngineError {
                        kind: ErrorKind::Transport,
                        message: "page semaphore closed".to_string(),
                        retryable: false,
                    },
                    Vec::new(),
                )
            }
        };

        let limiter = self.limiters.limiter_for(url).await;
        let mut trace: Vec<TraceEntry> = Vec::new();
        let mut render_retries = 0u32;
        let mut attempt = 0u32;

        loop {
            if !limiter.acquire(&ctx.cancel).await {
                return FetchResponse::failure(url, cancelled_error(), trace);
            }

            let started = Instant::now();
            match self.render_once(url, &ctx.cancel, actions, wait_for).await {
                Ok((mut response, action_note)) => {
                    let mut entry = TraceEntry::new(self.name(), attempt)
                        .status(response.status)
                        .elapsed_ms(response.elapsed_ms);
                    if let Some(note) = action_note {
                        // a strict action abort is surfaced, never retried
                        if note.aborted {
                            entry = entry.error(ErrorKind::ActionFailure);
                        }
                        entry = entry.note(note.summary);
                    }
                    trace.push(entry);
                    response.trace = trace;
                    return response;
                }
                Err(error) => {
                    warn!(url, attempt, kind = error.kind.as_str(), "render failed");
                    trace.push(
                        TraceEntry::new(self.name(), attempt)
                            .error(error.kind)
                            .elapsed_ms(started.elapsed().as_millis() as u64),
                    );
                    self.discard_browser().await;

                    let may_retry = match error.kind {
                        ErrorKind::RenderTimeout | ErrorKind::WaitTimeout => {
                            render_retries += 1;
                            render_retries <= MAX_RENDER_RETRIES
                        }
                        _ => error.retryable && attempt < self.retry.max_retries,
                    };

                    if may_retry {
                        let delay = self.retry.backoff(attempt + 1);
                        if !ctx.cancel.sleep(delay).await {
                            return FetchResponse::failure(url, cancelled_error(), trace);
                        }
                        attempt += 1;
                        continue;
                    }

                    return FetchResponse::failure(url, error, trace);
                }
            }
        }
    }
}

#[async_trait]
impl Engine for BrowserEngine {
    /// Plain get on the browser engine renders without actions.
    async fn get(&self, url: &str, ctx: &FetchContext) -> FetchResponse {
        self.rendered_fetch(url, ctx, &[], None).await
    }

    async fn get_rendered(
        &self,
        url: &str,
        ctx: &FetchContext,
        actions: &[Action],
        wait_for: Option<&str>,
    ) -> FetchResponse {
        self.rendered_fetch(url, ctx, actions, wait_for).await
    }

    async fn close(&self) {
        let mut handle = self.handle.lock().await;
        if let Some(mut h) = handle.take() {
            let _ = h.browser.close().await;
            h.handler_task.abort();
            info!("browser closed");
        }
    }

    fn name(&self) -> &str {
        "browser"
    }
}

fn cancelled_error() -> EngineError {
    EngineError {
        kind: ErrorKind::Cancelled,
        message: "run cancelled".to_string(),
        retryable: false,
    }
}
