//! Hybrid engine: fast HTTP first, browser as a measured fallback.

use async_trait::async_trait;
use tracing::info;

use harvest_core::config::Action;
use harvest_core::{BlockSignal, FetchResponse, TraceEntry};

use crate::engine::{Engine, FetchContext};

pub struct HybridEngine {
    http: Box<dyn Engine>,
    browser: Box<dyn Engine>,
    /// HTTP bodies shorter than this are assumed to be JS shells.
    min_text_len: usize,
}

impl HybridEngine {
    pub fn new(http: Box<dyn Engine>, browser: Box<dyn Engine>, min_text_len: usize) -> Self {
        Self {
            http,
            browser,
            min_text_len,
        }
    }

    /// Why the HTTP response is not good enough, if it isn't.
    fn fallback_reason(&self, response: &FetchResponse) -> Option<String> {
        if !response.ok() {
            return Some(format!("http not ok ({})", response.short_error()));
        }
        if response.block_signal != BlockSignal::None {
            return Some(format!("block signal {:?}", response.block_signal));
        }
        if response.body.len() < self.min_text_len {
            return Some(format!(
                "body {} chars < min_text_len {}",
                response.body.len(),
                self.min_text_len
            ));
        }
        None
    }
}

#[async_trait]
impl Engine for HybridEngine {
    async fn get(&self, url: &str, ctx: &FetchContext) -> FetchResponse {
        let http_response = self.http.get(url, ctx).await;

        let Some(reason) = self.fallback_reason(&http_response) else {
            return http_response;
        };

        if ctx.cancel.is_cancelled() {
            return http_response;
        }

        info!(url, reason, "hybrid fallback to browser");

        // Merged trace: HTTP attempts, the fallback decision, then the
        // browser attempts. The final entry is always the browser attempt.
        let mut trace = http_response.trace;
        trace.push(TraceEntry::new("hybrid", 0).note(format!("fallback: {reason}")));

        let mut browser_response = self.browser.get(url, ctx).await;
        trace.extend(browser_response.trace);
        browser_response.trace = trace;
        browser_response
    }

    /// Rendering always needs the browser side.
    async fn get_rendered(
        &self,
        url: &str,
        ctx: &FetchContext,
        actions: &[Action],
        wait_for: Option<&str>,
    ) -> FetchResponse {
        self.browser.get_rendered(url, ctx, actions, wait_for).await
    }

    async fn close(&self) {
        self.http.close().await;
        self.browser.close().await;
    }

    fn name(&self) -> &str {
        "hybrid"
    }
}
