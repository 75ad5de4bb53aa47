use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Collapse runs of whitespace to single spaces and trim the ends.
pub fn normalize_ws(text: &str) -> String {
    WS_RE.replace_all(text.trim(), " ").into_owned()
}

/// Stable content hash used for dedupe fingerprints and raw-page identity.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Trim a value to `None` when it is empty after trimming.
pub fn strip_or_none(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}
