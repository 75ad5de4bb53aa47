//! URL and content-fingerprint deduplication.
//!
//! First-seen wins, keyed on the normalized URL first and a content
//! fingerprint second. The store is pluggable so earlier runs' state can
//! suppress repeats; the default is process-local.

use std::collections::HashSet;
use std::sync::Mutex;

use harvest_core::{content_hash, normalize_ws, Item};

/// State shared across the dedupe stage. `seen`/`add` take `&self` so one
/// store can back every source of a run.
pub trait DedupeStore: Send + Sync {
    fn seen(&self, key: &str) -> bool;
    fn add(&self, key: &str);
}

#[derive(Default)]
pub struct InMemoryDedupeStore {
    keys: Mutex<HashSet<String>>,
}

impl InMemoryDedupeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DedupeStore for InMemoryDedupeStore {
    fn seen(&self, key: &str) -> bool {
        self.keys.lock().expect("dedupe store lock").contains(key)
    }

    fn add(&self, key: &str) {
        self.keys
            .lock()
            .expect("dedupe store lock")
            .insert(key.to_string());
    }
}

/// Why an item was kept or suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupeDecision {
    Keep,
    DuplicateUrl,
    DuplicateContent,
}

/// Stable fingerprint over the configured content fields.
///
/// Field names are folded into the hash and absent fields contribute an
/// empty value, so an item missing `title` fingerprints differently from
/// one whose `title` equals its `text`.
pub fn fingerprint_item(item: &Item, fields: &[String]) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(fields.len());
    for field in fields {
        let value = match field.as_str() {
            "url" => item.url.clone(),
            "title" => item.title.clone().unwrap_or_default(),
            "text" => item.text.clone(),
            other => item
                .meta
                .get(other)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        };
        parts.push(format!("{field}={}", normalize_ws(&value)));
    }
    content_hash(&parts.join("|"))
}

/// Check one item against the store, recording it when kept.
pub fn check_item(store: &dyn DedupeStore, item: &Item, content_fields: &[String]) -> DedupeDecision {
    let url_key = format!("url:{}", item.url);
    if store.seen(&url_key) {
        return DedupeDecision::DuplicateUrl;
    }
    store.add(&url_key);

    if !content_fields.is_empty() {
        let content_key = format!("content:{}", fingerprint_item(item, content_fields));
        if store.seen(&content_key) {
            return DedupeDecision::DuplicateContent;
        }
        store.add(&content_key);
    }

    DedupeDecision::Keep
}
