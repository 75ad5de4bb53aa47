//! Pure-HTTP engine over a pooled reqwest client.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, warn};

use harvest_core::config::{Action, EngineConfig};
use harvest_core::{
    classify_block, EngineError, ErrorKind, FetchResponse, HarvestError, TraceEntry,
};

use crate::engine::{Engine, FetchContext};
use crate::limiter::HostLimiters;
use crate::retry::RetryPolicy;

const DEFAULT_USER_AGENT: &str = concat!("harvest/", env!("CARGO_PKG_VERSION"));

pub struct HttpEngine {
    client: reqwest::Client,
    limiters: HostLimiters,
    retry: RetryPolicy,
    user_agent: String,
}

impl HttpEngine {
    pub fn new(config: &EngineConfig) -> Result<Self, HarvestError> {
        let timeout = Duration::from_secs_f64(config.timeout_s);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .timeout(timeout)
            .pool_max_idle_per_host(config.pool_maxsize)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| HarvestError::Engine(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            limiters: HostLimiters::new(config.rate_limit.clone()),
            retry: RetryPolicy::from_config(&config.retry),
            user_agent: config
                .user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        })
    }

    async fn fetch_once(
        &self,
        url: &str,
        ctx: &FetchContext,
        attempt: u32,
    ) -> Result<FetchResponse, EngineError> {
        let start = Instant::now();

        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, &self.user_agent);
        for (key, value) in &ctx.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if !ctx.cookies.is_empty() {
            let cookie_line = ctx
                .cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            request = request.header(reqwest::header::COOKIE, cookie_line);
        }

        let response = request.send().await.map_err(|e| classify_reqwest(&e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();

        let body = response.text().await.map_err(|e| classify_reqwest(&e))?;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        debug!(url, status, attempt, elapsed_ms, "HTTP fetch");

        let block_signal = classify_block(&body);
        Ok(FetchResponse {
            final_url,
            status,
            headers,
            body,
            fetched_at: Utc::now(),
            elapsed_ms,
            trace: Vec::new(),
            block_signal,
            error: None,
        })
    }
}

#[async_trait]
impl Engine for HttpEngine {
    async fn get(&self, url: &str, ctx: &FetchContext) -> FetchResponse {
        let limiter = self.limiters.limiter_for(url).await;
        let mut trace: Vec<TraceEntry> = Vec::new();

        for attempt in 0..=self.retry.max_retries {
            if !limiter.acquire(&ctx.cancel).await {
                return FetchResponse::failure(url, cancelled_error(), trace);
            }

            let started = Instant::now();
            match self.fetch_once(url, ctx, attempt).await {
                Ok(mut response) => {
                    let entry = TraceEntry::new(self.name(), attempt)
                        .status(response.status)
                        .elapsed_ms(response.elapsed_ms);

                    if response.ok() {
                        trace.push(entry);
                        response.trace = trace;
                        return response;
                    }

                    let retryable = self.retry.should_retry_status(response.status);
                    trace.push(entry.error(if retryable {
                        ErrorKind::RetryableStatus
                    } else {
                        ErrorKind::TerminalStatus
                    }));

                    if retryable && attempt < self.retry.max_retries {
                        let delay = self.retry.backoff(attempt + 1);
                        if !ctx.cancel.sleep(delay).await {
                            return FetchResponse::failure(url, cancelled_error(), trace);
                        }
                        continue;
                    }

                    // Terminal status (or retries exhausted on a retryable
                    // one): the response itself is the answer.
                    response.trace = trace;
                    return response;
                }
                Err(error) => {
                    warn!(url, attempt, kind = error.kind.as_str(), "HTTP fetch error");
                    trace.push(
                        TraceEntry::new(self.name(), attempt)
                            .error(error.kind)
                            .elapsed_ms(started.elapsed().as_millis() as u64),
                    );

                    if error.retryable && attempt < self.retry.max_retries {
                        let delay = self.retry.backoff(attempt + 1);
                        if !ctx.cancel.sleep(delay).await {
                            return FetchResponse::failure(url, cancelled_error(), trace);
                        }
                        continue;
                    }

                    return FetchResponse::failure(url, error, trace);
                }
            }
        }

        FetchResponse::failure(
            url,
            EngineError {
                kind: ErrorKind::Transport,
                message: "retries exhausted".to_string(),
                retryable: false,
            },
            trace,
        )
    }

    /// HTTP cannot render; actions are ignored by contract, not by accident.
    async fn get_rendered(
        &self,
        url: &str,
        ctx: &FetchContext,
        actions: &[Action],
        _wait_for: Option<&str>,
    ) -> FetchResponse {
        if !actions.is_empty() {
            debug!(url, count = actions.len(), "http engine ignores actions");
        }
        self.get(url, ctx).await
    }

    async fn close(&self) {}

    fn name(&self) -> &str {
        "http"
    }
}

fn cancelled_error() -> EngineError {
    EngineError {
        kind: ErrorKind::Cancelled,
        message: "run cancelled".to_string(),
        retryable: false,
    }
}

/// Map a reqwest failure onto the engine's error kinds. Connect and read
/// timeouts stay distinct so traces show where a fetch died.
fn classify_reqwest(error: &reqwest::Error) -> EngineError {
    let kind = if error.is_connect() {
        if error.is_timeout() {
            ErrorKind::ConnectTimeout
        } else {
            ErrorKind::Transport
        }
    } else if error.is_timeout() {
        ErrorKind::ReadTimeout
    } else {
        ErrorKind::Transport
    };
    EngineError {
        kind,
        message: error.to_string(),
        retryable: true,
    }
}
