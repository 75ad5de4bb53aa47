//! The typed source descriptor. One descriptor fully describes one scraping
//! target; everything else in the workspace is driven from it.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    #[default]
    Http,
    Browser,
    Hybrid,
}

impl EngineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Http => "http",
            EngineKind::Browser => "browser",
            EngineKind::Hybrid => "hybrid",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffMode {
    #[default]
    Exp,
    Fixed,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LinkExtractMethod {
    #[default]
    Regex,
    Css,
    Xpath,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PagingMode {
    #[default]
    Page,
    Offset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemsFormat {
    #[default]
    Jsonl,
    Csv,
    Parquet,
}

impl ItemsFormat {
    pub fn ext(self) -> &'static str {
        match self {
            ItemsFormat::Jsonl => "jsonl",
            ItemsFormat::Csv => "csv",
            ItemsFormat::Parquet => "parquet",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepPreset {
    Short,
    Medium,
    Long,
}

// ---------------------------------------------------------------------------
// Action DSL
// ---------------------------------------------------------------------------

/// One step of the declarative interaction sequence the browser engine
/// evaluates. Unknown `type` values are a deserialization error by design.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    WaitFor {
        selector: String,
        #[serde(default = "default_wait_timeout_s")]
        timeout_s: f64,
    },
    Click {
        selector: String,
        #[serde(default = "default_one")]
        repeat: u32,
        #[serde(default)]
        pause_s: f64,
        #[serde(default)]
        strict: bool,
    },
    Hover {
        selector: String,
    },
    Type {
        selector: String,
        text: String,
        #[serde(default = "default_true")]
        clear: bool,
    },
    ClosePopup {
        selector: String,
    },
    Scroll {
        #[serde(default = "default_scroll_repeat")]
        repeat: u32,
        #[serde(default = "default_scroll_min_px")]
        min_px: u32,
        #[serde(default = "default_scroll_max_px")]
        max_px: u32,
        #[serde(default)]
        pause_s: f64,
    },
    Sleep {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preset: Option<SleepPreset>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seconds: Option<f64>,
    },
    MouseDrift {},
}

fn default_wait_timeout_s() -> f64 {
    20.0
}
fn default_one() -> u32 {
    1
}
fn default_scroll_repeat() -> u32 {
    5
}
fn default_scroll_min_px() -> u32 {
    250
}
fn default_scroll_max_px() -> u32 {
    600
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RateLimitPolicy {
    pub rps: Option<f64>,
    pub burst: Option<u32>,
    pub min_delay_s: Option<f64>,
    pub jitter_s: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    #[serde(alias = "backoff")]
    pub backoff_mode: BackoffMode,
    pub base_delay_s: f64,
    pub max_delay_s: f64,
    pub retry_on_status: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_mode: BackoffMode::Exp,
            base_delay_s: 0.5,
            max_delay_s: 30.0,
            retry_on_status: vec![429, 500, 502, 503, 504],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserOptions {
    /// chromium | firefox | webkit. Only chromium is driven natively; the
    /// others are accepted for forward compatibility and warn at validate.
    pub browser_name: String,
    pub headless: bool,
    pub nav_timeout_s: f64,
    pub render_timeout_s: f64,
    pub block_images: bool,
    pub block_fonts: bool,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            browser_name: "chromium".to_string(),
            headless: true,
            nav_timeout_s: 30.0,
            render_timeout_s: 20.0,
            block_images: false,
            block_fonts: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    #[serde(rename = "type")]
    pub kind: EngineKind,
    pub timeout_s: f64,
    pub verify_ssl: bool,
    pub user_agent: Option<String>,
    pub pool_connections: usize,
    pub pool_maxsize: usize,
    pub browser: BrowserOptions,
    #[serde(alias = "rate_limit_policy")]
    pub rate_limit: RateLimitPolicy,
    #[serde(alias = "retry_policy")]
    pub retry: RetryConfig,
    /// Hybrid fallback threshold: HTTP responses with less body text than
    /// this are retried under the browser.
    pub min_text_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::Http,
            timeout_s: 15.0,
            verify_ssl: true,
            user_agent: None,
            pool_connections: 10,
            pool_maxsize: 20,
            browser: BrowserOptions::default(),
            rate_limit: RateLimitPolicy::default(),
            retry: RetryConfig::default(),
            min_text_len: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PagingConfig {
    pub mode: PagingMode,
    pub start: Option<i64>,
    pub pages: Option<u32>,
    pub step: Option<i64>,
}

impl PagingConfig {
    pub fn start(&self) -> i64 {
        self.start.unwrap_or(match self.mode {
            PagingMode::Page => 1,
            PagingMode::Offset => 0,
        })
    }

    pub fn pages(&self) -> u32 {
        self.pages.unwrap_or(1).max(1)
    }

    pub fn step(&self) -> i64 {
        self.step.unwrap_or(match self.mode {
            PagingMode::Page => 1,
            PagingMode::Offset => 10,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPoint {
    /// URL template; may contain `{page}` or `{offset}`.
    pub url: String,
    #[serde(default)]
    pub paging: Option<PagingConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cookies: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LinkExtractConfig {
    pub method: LinkExtractMethod,
    pub pattern: Option<String>,
    pub selector: Option<String>,
    /// Substring every candidate URL must contain.
    pub identifier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupeConfig {
    /// Fields hashed into the content fingerprint. Absent fields hash as
    /// empty strings, with field names included, so presence changes the
    /// fingerprint.
    pub content_fields: Vec<String>,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            content_fields: vec!["title".to_string(), "text".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub link_extract: LinkExtractConfig,
    /// CSS selector waited for before listing HTML is captured (browser).
    pub wait_for: Option<String>,
    pub dedupe: DedupeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ParseConfig {
    pub title_selector: Option<String>,
    pub text_selector: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ValidationConfig {
    pub min_text_len: usize,
    pub require_title: bool,
    pub require_text: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct QualityConfig {
    /// Regexes that signal a block page; any match drops the item as blocked.
    pub block_patterns: Vec<String>,
    pub min_text_len: usize,
    pub max_boilerplate_ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub items_format: ItemsFormat,
    pub raw_pages: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            items_format: ItemsFormat::Jsonl,
            raw_pages: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScheduleConfig {
    pub frequency: Option<String>,
    pub timezone: Option<String>,
    pub priority: Option<u8>,
}

// ---------------------------------------------------------------------------
// Source descriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_version")]
    pub config_version: u32,
    pub source_id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleConfig>,
    #[serde(default)]
    pub entrypoints: Vec<EntryPoint>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub parse: ParseConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_version() -> u32 {
    super::migration::CURRENT_CONFIG_VERSION
}

fn default_true() -> bool {
    true
}

/// Regex patterns that match essentially anything; a discovery pattern this
/// broad will happily collect off-domain links.
const BROAD_PATTERNS: &[&str] = &[".*", ".+", ".*?", ".+?", "http.*", "https.*"];

/// Validate a descriptor's hard invariants and collect soft warnings.
/// Hard failures mean the run must not start for this source.
pub fn validate_source(source: &SourceConfig) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let sid = &source.source_id;

    if sid.trim().is_empty() {
        errors.push("source_id must be non-empty".to_string());
    } else if sid.contains(char::is_whitespace) {
        errors.push(format!("source_id '{sid}' must not contain whitespace"));
    } else if sid.contains(['/', '\\']) {
        errors.push(format!("source_id '{sid}' must be filesystem safe"));
    }

    if source.engine.timeout_s <= 0.0 {
        errors.push(format!("{sid}: engine.timeout_s must be > 0"));
    }

    let rate = &source.engine.rate_limit;
    if rate.rps.is_some_and(|v| v < 0.0) {
        errors.push(format!("{sid}: engine.rate_limit.rps must be >= 0"));
    }
    if rate.min_delay_s.is_some_and(|v| v < 0.0) {
        errors.push(format!("{sid}: engine.rate_limit.min_delay_s must be >= 0"));
    }
    if rate.jitter_s.is_some_and(|v| v < 0.0) {
        errors.push(format!("{sid}: engine.rate_limit.jitter_s must be >= 0"));
    }
    if rate.burst == Some(0) {
        errors.push(format!("{sid}: engine.rate_limit.burst must be >= 1"));
    }

    if source.engine.retry.max_retries > 20 {
        errors.push(format!("{sid}: engine.retry.max_retries must be <= 20"));
    }

    if source.entrypoints.is_empty() {
        errors.push(format!("{sid}: at least one entrypoint is required"));
    }
    for (i, ep) in source.entrypoints.iter().enumerate() {
        if ep.url.trim().is_empty() {
            errors.push(format!("{sid}: entrypoints[{i}].url must be non-empty"));
        }
        if let Some(paging) = &ep.paging {
            if paging.step() < 1 {
                errors.push(format!("{sid}: entrypoints[{i}].paging.step must be >= 1"));
            }
            let placeholder = match paging.mode {
                PagingMode::Page => "{page}",
                PagingMode::Offset => "{offset}",
            };
            if paging.pages() > 1 && !ep.url.contains(placeholder) {
                warnings.push(format!(
                    "{sid}: entrypoints[{i}] pages > 1 but url has no {placeholder} placeholder; every page expands to the same URL"
                ));
            }
        }
    }

    let link = &source.discovery.link_extract;
    match link.method {
        LinkExtractMethod::Regex => match &link.pattern {
            None => errors.push(format!(
                "{sid}: discovery.link_extract.pattern is required when method=regex"
            )),
            Some(pattern) => {
                if let Err(e) = Regex::new(pattern) {
                    errors.push(format!("{sid}: link_extract pattern does not compile: {e}"));
                } else if BROAD_PATTERNS.contains(&pattern.trim()) {
                    warnings.push(format!(
                        "{sid}: link_extract pattern '{pattern}' is broad enough to match off-domain links"
                    ));
                }
            }
        },
        LinkExtractMethod::Css | LinkExtractMethod::Xpath => {
            if link.selector.is_none() {
                errors.push(format!(
                    "{sid}: discovery.link_extract.selector is required when method={:?}",
                    link.method
                ));
            }
        }
    }

    for pattern in &source.quality.block_patterns {
        if let Err(e) = Regex::new(pattern) {
            errors.push(format!(
                "{sid}: quality.block_patterns '{pattern}' does not compile: {e}"
            ));
        }
    }
    if let Some(ratio) = source.quality.max_boilerplate_ratio {
        if !(0.0..=1.0).contains(&ratio) {
            errors.push(format!(
                "{sid}: quality.max_boilerplate_ratio must be within 0..=1"
            ));
        }
    }

    if let Some(schedule) = &source.schedule {
        if let Some(freq) = &schedule.frequency {
            if crate::schedule::parse_frequency(freq).is_none() {
                warnings.push(format!("{sid}: schedule.frequency '{freq}' not understood"));
            }
        }
    }

    if !source.engine.verify_ssl {
        warnings.push(format!("{sid}: verify_ssl is disabled; this is discouraged"));
    }

    if source.engine.kind != EngineKind::Http && source.engine.browser.browser_name != "chromium" {
        warnings.push(format!(
            "{sid}: browser_name '{}' is not driven natively; chromium will be used",
            source.engine.browser.browser_name
        ));
    }

    (errors, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(source_id: &str) -> SourceConfig {
        serde_json::from_value(serde_json::json!({
            "source_id": source_id,
            "entrypoints": [{"url": "https://example.com/jobs?page={page}"}],
            "discovery": {"link_extract": {"method": "regex", "pattern": "https://example\\.com/jobs/\\d+"}}
        }))
        .unwrap()
    }

    #[test]
    fn defaults_are_injected() {
        let source = minimal("acme_jobs");
        assert_eq!(source.engine.kind, EngineKind::Http);
        assert_eq!(source.engine.timeout_s, 15.0);
        assert!(source.engine.verify_ssl);
        assert_eq!(source.engine.retry.max_retries, 3);
        assert_eq!(source.engine.retry.retry_on_status, vec![429, 500, 502, 503, 504]);
        assert_eq!(source.storage.items_format, ItemsFormat::Jsonl);
        assert_eq!(
            source.discovery.dedupe.content_fields,
            vec!["title".to_string(), "text".to_string()]
        );
    }

    #[test]
    fn config_round_trips_modulo_defaults() {
        let source = minimal("acme_jobs");
        let serialized = serde_json::to_string(&source).unwrap();
        let reloaded: SourceConfig = serde_json::from_str(&serialized).unwrap();
        assert_eq!(source, reloaded);
    }

    #[test]
    fn action_dsl_parses_tagged_records() {
        let actions: Vec<Action> = serde_json::from_value(serde_json::json!([
            {"type": "close_popup", "selector": "button.cookie-close"},
            {"type": "scroll", "repeat": 6, "min_px": 250, "max_px": 600},
            {"type": "click", "selector": "button.load-more", "repeat": 2},
            {"type": "wait_for", "selector": ".results", "timeout_s": 10},
            {"type": "sleep", "preset": "short"},
            {"type": "mouse_drift"}
        ]))
        .unwrap();
        assert_eq!(actions.len(), 6);
        assert!(matches!(actions[1], Action::Scroll { repeat: 6, .. }));
        assert!(matches!(
            actions[2],
            Action::Click { repeat: 2, strict: false, .. }
        ));
    }

    #[test]
    fn unknown_action_type_is_rejected() {
        let result: Result<Vec<Action>, _> =
            serde_json::from_value(serde_json::json!([{"type": "teleport"}]));
        assert!(result.is_err());
    }

    #[test]
    fn regex_method_requires_pattern() {
        let mut source = minimal("acme_jobs");
        source.discovery.link_extract.pattern = None;
        let (errors, _) = validate_source(&source);
        assert!(errors.iter().any(|e| e.contains("pattern is required")));
    }

    #[test]
    fn broad_pattern_warns_but_passes() {
        let mut source = minimal("acme_jobs");
        source.discovery.link_extract.pattern = Some(".*".to_string());
        let (errors, warnings) = validate_source(&source);
        assert!(errors.is_empty());
        assert!(warnings.iter().any(|w| w.contains("broad")));
    }

    #[test]
    fn ssl_off_warns() {
        let mut source = minimal("acme_jobs");
        source.engine.verify_ssl = false;
        let (errors, warnings) = validate_source(&source);
        assert!(errors.is_empty());
        assert!(warnings.iter().any(|w| w.contains("verify_ssl")));
    }

    #[test]
    fn bad_block_pattern_is_an_error() {
        let mut source = minimal("acme_jobs");
        source.quality.block_patterns = vec!["[unclosed".to_string()];
        let (errors, _) = validate_source(&source);
        assert!(errors.iter().any(|e| e.contains("does not compile")));
    }

    #[test]
    fn source_id_invariants() {
        let mut source = minimal("has space");
        let (errors, _) = validate_source(&source);
        assert!(errors.iter().any(|e| e.contains("whitespace")));

        source.source_id = "a/b".into();
        let (errors, _) = validate_source(&source);
        assert!(errors.iter().any(|e| e.contains("filesystem")));
    }

    #[test]
    fn paging_defaults_depend_on_mode() {
        let page = PagingConfig { mode: PagingMode::Page, ..Default::default() };
        assert_eq!((page.start(), page.step()), (1, 1));
        let offset = PagingConfig { mode: PagingMode::Offset, ..Default::default() };
        assert_eq!((offset.start(), offset.step()), (0, 10));
    }
}
