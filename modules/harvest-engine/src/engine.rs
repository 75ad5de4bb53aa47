//! The capability every transport exposes: `get`, `get_rendered`, `close`.
//!
//! Engines never return `Result` from fetches — a failed fetch is still a
//! `FetchResponse`, with `status = 0`, an error record, and the trace of
//! attempts, so error routing stays visible at the call site.

use std::collections::BTreeMap;

use async_trait::async_trait;

use harvest_core::config::{Action, EngineKind, SourceConfig};
use harvest_core::{FetchResponse, HarvestError};

use crate::browser::BrowserEngine;
use crate::cancel::CancelToken;
use crate::http::HttpEngine;
use crate::hybrid::HybridEngine;

/// Per-request context: entrypoint headers/cookies plus the run's cancel
/// token. Transport knobs (timeouts, UA, pool sizing) are fixed at engine
/// construction from the source descriptor.
#[derive(Clone, Debug, Default)]
pub struct FetchContext {
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    pub cancel: CancelToken,
}

impl FetchContext {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            headers: BTreeMap::new(),
            cookies: BTreeMap::new(),
            cancel,
        }
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_cookies(mut self, cookies: BTreeMap<String, String>) -> Self {
        self.cookies = cookies;
        self
    }
}

#[async_trait]
pub trait Engine: Send + Sync {
    /// Plain fetch. Browser-backed engines render without actions.
    async fn get(&self, url: &str, ctx: &FetchContext) -> FetchResponse;

    /// Rendered fetch with an action sequence and an optional selector to
    /// wait for. Engines without a renderer degrade to `get`.
    async fn get_rendered(
        &self,
        url: &str,
        ctx: &FetchContext,
        actions: &[Action],
        wait_for: Option<&str>,
    ) -> FetchResponse;

    /// Release transport resources. Safe to call more than once.
    async fn close(&self);

    fn name(&self) -> &str;
}

/// Construct the engine a source descriptor asks for. A failure here is
/// fatal for the source (never silently downgraded to another transport).
pub fn build_engine(source: &SourceConfig) -> Result<Box<dyn Engine>, HarvestError> {
    match source.engine.kind {
        EngineKind::Http => Ok(Box::new(HttpEngine::new(&source.engine)?)),
        EngineKind::Browser => Ok(Box::new(BrowserEngine::new(&source.engine)?)),
        EngineKind::Hybrid => {
            let http = HttpEngine::new(&source.engine)?;
            let browser = BrowserEngine::new(&source.engine)?;
            Ok(Box::new(HybridEngine::new(
                Box::new(http),
                Box::new(browser),
                source.engine.min_text_len,
            )))
        }
    }
}
