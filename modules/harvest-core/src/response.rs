//! The uniform response contract shared by every fetch engine.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Classification of a response as blocked, challenged, or fine.
/// Surfaced as a fact for the pipeline; never acted on by blind retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlockSignal {
    #[default]
    None,
    LikelyBlocked,
    CaptchaPresent,
    LoginRequired,
    Unknown,
}

/// Error kinds an engine distinguishes. Timeouts at different layers stay
/// distinct so the trace tells you where a fetch died.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConnectTimeout,
    ReadTimeout,
    RenderTimeout,
    WaitTimeout,
    Transport,
    RetryableStatus,
    TerminalStatus,
    ActionFailure,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ConnectTimeout => "connect_timeout",
            ErrorKind::ReadTimeout => "read_timeout",
            ErrorKind::RenderTimeout => "render_timeout",
            ErrorKind::WaitTimeout => "wait_timeout",
            ErrorKind::Transport => "transport",
            ErrorKind::RetryableStatus => "retryable_status",
            ErrorKind::TerminalStatus => "terminal_status",
            ErrorKind::ActionFailure => "action_failure",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

/// A transport-level failure attached to a `FetchResponse`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

/// One attempt record in the engine trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub engine: String,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub elapsed_ms: u64,
}

impl TraceEntry {
    pub fn new(engine: &str, attempt: u32) -> Self {
        Self {
            engine: engine.to_string(),
            attempt,
            status: None,
            error: None,
            note: None,
            elapsed_ms: 0,
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn error(mut self, kind: ErrorKind) -> Self {
        self.error = Some(kind);
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn elapsed_ms(mut self, ms: u64) -> Self {
        self.elapsed_ms = ms;
        self
    }
}

/// Stable response contract produced by every engine.
/// `status == 0` means no HTTP response was obtained (transport failure
/// after exhausting retries); the trace records each attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResponse {
    pub final_url: String,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub trace: Vec<TraceEntry>,
    pub block_signal: BlockSignal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EngineError>,
}

impl FetchResponse {
    /// A response that never reached the wire.
    pub fn failure(url: &str, error: EngineError, trace: Vec<TraceEntry>) -> Self {
        Self {
            final_url: url.to_string(),
            status: 0,
            headers: BTreeMap::new(),
            body: String::new(),
            fetched_at: Utc::now(),
            elapsed_ms: 0,
            trace,
            block_signal: BlockSignal::None,
            error: Some(error),
        }
    }

    pub fn ok(&self) -> bool {
        self.error.is_none() && (200..400).contains(&self.status)
    }

    /// Whether this outcome is retryable under the given status list.
    pub fn retryable(&self, retry_on_status: &[u16]) -> bool {
        if let Some(err) = &self.error {
            return err.retryable;
        }
        retry_on_status.contains(&self.status)
    }

    pub fn short_error(&self) -> String {
        if self.ok() {
            return String::new();
        }
        if let Some(err) = &self.error {
            return format!("{}: {}", err.kind.as_str(), err.message);
        }
        if self.status > 0 {
            return format!("HTTP {}", self.status);
        }
        "unknown error".to_string()
    }
}

static CAPTCHA_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\bcaptcha\b",
        r"\bverify you are human\b",
        r"\bcloudflare\b",
        r"\bcf-turnstile\b",
    ])
});

static LOGIN_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\blogin required\b",
        r"\bsign in to continue\b",
        r"\bplease log ?in\b",
    ])
});

static BLOCKED_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\baccess denied\b",
        r"\bunusual traffic\b",
        r"\byou have been blocked\b",
        r"\brequest blocked\b",
    ])
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
}

/// Classify a response body for block/challenge/login walls.
/// Captcha outranks login outranks generic block; most pages return `None`.
pub fn classify_block(body: &str) -> BlockSignal {
    if body.is_empty() {
        return BlockSignal::None;
    }
    let lower = body.to_lowercase();

    if CAPTCHA_RES.iter().any(|re| re.is_match(&lower)) {
        return BlockSignal::CaptchaPresent;
    }
    if LOGIN_RES.iter().any(|re| re.is_match(&lower)) {
        return BlockSignal::LoginRequired;
    }
    if BLOCKED_RES.iter().any(|re| re.is_match(&lower)) {
        return BlockSignal::LikelyBlocked;
    }
    BlockSignal::None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_captcha() {
        assert_eq!(
            classify_block("Please verify you are human to continue"),
            BlockSignal::CaptchaPresent
        );
    }

    #[test]
    fn classifies_login_wall() {
        assert_eq!(
            classify_block("Login required to view this page"),
            BlockSignal::LoginRequired
        );
    }

    #[test]
    fn classifies_access_denied() {
        assert_eq!(
            classify_block("Access Denied - your IP has been flagged"),
            BlockSignal::LikelyBlocked
        );
    }

    #[test]
    fn captcha_outranks_login() {
        let body = "login required — first solve this captcha";
        assert_eq!(classify_block(body), BlockSignal::CaptchaPresent);
    }

    #[test]
    fn normal_page_is_clean() {
        assert_eq!(
            classify_block("<html><body>Tech conference in Berlin</body></html>"),
            BlockSignal::None
        );
        assert_eq!(classify_block(""), BlockSignal::None);
    }

    #[test]
    fn status_zero_means_no_response() {
        let resp = FetchResponse::failure(
            "https://example.com",
            EngineError {
                kind: ErrorKind::ConnectTimeout,
                message: "connect timed out".into(),
                retryable: true,
            },
            vec![],
        );
        assert_eq!(resp.status, 0);
        assert!(!resp.ok());
        assert!(resp.retryable(&[429, 500]));
    }

    #[test]
    fn retryable_follows_status_list() {
        let mut resp = FetchResponse::failure(
            "https://example.com",
            EngineError {
                kind: ErrorKind::RetryableStatus,
                message: "503".into(),
                retryable: true,
            },
            vec![],
        );
        resp.error = None;
        resp.status = 503;
        assert!(resp.retryable(&[429, 500, 502, 503, 504]));
        resp.status = 404;
        assert!(!resp.retryable(&[429, 500, 502, 503, 504]));
    }
}
