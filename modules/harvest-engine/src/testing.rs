//! Fixture engines for exercising the pipeline without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use harvest_core::config::Action;
use harvest_core::{classify_block, EngineError, ErrorKind, FetchResponse, TraceEntry};

use crate::engine::{Engine, FetchContext};

/// A 200 response for a fixture body, with block classification applied the
/// way real engines do it.
pub fn page_response(url: &str, body: &str) -> FetchResponse {
    let mut response = status_response(url, 200, body);
    response.block_signal = classify_block(body);
    response
}

/// A response with an arbitrary status and body.
pub fn status_response(url: &str, status: u16, body: &str) -> FetchResponse {
    FetchResponse {
        final_url: url.to_string(),
        status,
        headers: Default::default(),
        body: body.to_string(),
        fetched_at: Utc::now(),
        elapsed_ms: 1,
        trace: Vec::new(),
        block_signal: harvest_core::BlockSignal::None,
        error: None,
    }
}

/// A transport failure with `status = 0`.
pub fn failure_response(url: &str, kind: ErrorKind) -> FetchResponse {
    FetchResponse::failure(
        url,
        EngineError {
            kind,
            message: format!("scripted {}", kind.as_str()),
            retryable: false,
        },
        Vec::new(),
    )
}

/// Serves canned responses by URL. Each URL holds a queue: the responses
/// are popped in order, and the last one repeats — so `with_sequence` can
/// script 503, 503, 200 while `with_page` keeps serving the same body.
pub struct FixtureEngine {
    name: &'static str,
    responses: Mutex<HashMap<String, VecDeque<FetchResponse>>>,
    calls: Arc<Mutex<Vec<String>>>,
    rendered_calls: Arc<Mutex<Vec<String>>>,
}

impl FixtureEngine {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            responses: Mutex::new(HashMap::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
            rendered_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_page(self, url: &str, body: &str) -> Self {
        self.with_response(url, page_response(url, body))
    }

    pub fn with_response(self, url: &str, response: FetchResponse) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn with_sequence(self, url: &str, responses: Vec<FetchResponse>) -> Self {
        {
            let mut map = self.responses.lock().unwrap();
            let queue = map.entry(url.to_string()).or_default();
            queue.extend(responses);
        }
        self
    }

    /// Shared handle to the list of fetched URLs, for assertions.
    pub fn call_log(&self) -> Arc<Mutex<Vec<String>>> {
        self.calls.clone()
    }

    pub fn rendered_call_log(&self) -> Arc<Mutex<Vec<String>>> {
        self.rendered_calls.clone()
    }

    fn serve(&self, url: &str) -> FetchResponse {
        let mut map = self.responses.lock().unwrap();
        let mut response = match map.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().expect("non-empty queue"),
            Some(queue) => queue.front().expect("non-empty queue").clone(),
            None => status_response(url, 404, ""),
        };
        response.trace.push(
            TraceEntry::new(self.name, 0)
                .status(response.status)
                .elapsed_ms(1),
        );
        response
    }
}

#[async_trait]
impl Engine for FixtureEngine {
    async fn get(&self, url: &str, _ctx: &FetchContext) -> FetchResponse {
        self.calls.lock().unwrap().push(url.to_string());
        self.serve(url)
    }

    async fn get_rendered(
        &self,
        url: &str,
        _ctx: &FetchContext,
        _actions: &[Action],
        _wait_for: Option<&str>,
    ) -> FetchResponse {
        self.rendered_calls.lock().unwrap().push(url.to_string());
        self.calls.lock().unwrap().push(url.to_string());
        self.serve(url)
    }

    async fn close(&self) {}

    fn name(&self) -> &str {
        self.name
    }
}
