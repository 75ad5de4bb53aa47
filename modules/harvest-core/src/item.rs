//! Items and links as they travel through the pipeline and into artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Map;

/// Why an item was routed to `items_dropped.jsonl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// A block pattern matched the page body.
    Blocked,
    /// Short text, boilerplate, or empty extraction.
    Quality,
    /// Required field missing or malformed.
    Validation,
    /// First occurrence already emitted (URL or content fingerprint).
    Dedupe,
    /// The detail fetch itself failed; no parse was possible.
    Fetch,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::Blocked => "blocked",
            DropReason::Quality => "quality",
            DropReason::Validation => "validation",
            DropReason::Dedupe => "dedupe",
            DropReason::Fetch => "fetch",
        }
    }
}

/// A link discovered on a listing page, before and after normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedLink {
    pub url_raw: String,
    pub url_normalized: String,
    pub source_page_url: String,
    pub discovered_at: DateTime<Utc>,
}

/// A structured document parsed from a detail page.
///
/// Serialized field names are the artifact contract: additions are allowed,
/// removals and renames are breaking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, serde_json::Value>,
    #[serde(
        rename = "_quality_issues",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub quality_issues: Vec<String>,
    #[serde(
        rename = "_validation_errors",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub validation_errors: Vec<String>,
    #[serde(rename = "_drop_reason", skip_serializing_if = "Option::is_none")]
    pub drop_reason: Option<DropReason>,
}

impl Item {
    pub fn new(url: impl Into<String>, title: Option<String>, text: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title,
            text: text.into(),
            meta: Map::new(),
            quality_issues: Vec::new(),
            validation_errors: Vec::new(),
            drop_reason: None,
        }
    }

    pub fn with_meta(mut self, key: &str, value: serde_json::Value) -> Self {
        self.meta.insert(key.to_string(), value);
        self
    }

    /// Whether the item passed every gate so far.
    pub fn clean(&self) -> bool {
        self.quality_issues.is_empty()
            && self.validation_errors.is_empty()
            && self.drop_reason.is_none()
    }
}
