//! Detail-page HTML → structured document conversion.
//!
//! Strategy order: explicit per-source selectors, then Readability
//! main-content extraction, then a plain-text fallback. Whichever strategy
//! produced the text is recorded on the document for debugging.

use std::collections::HashMap;

use scraper::{Html, Selector};
use serde_json::{Map, Value};
use spider_transformations::transformation::content::{
    transform_content_input, ReturnFormat, TransformConfig, TransformInput,
};

use harvest_core::config::ParseConfig;
use harvest_core::normalize_ws;

#[derive(Debug, Clone)]
pub struct StructuredDoc {
    pub title: Option<String>,
    pub text: String,
    pub meta: Map<String, Value>,
    pub extractor: &'static str,
}

impl StructuredDoc {
    pub fn ok(&self) -> bool {
        !self.text.is_empty()
    }
}

/// Convert a detail page body into `{title, text, meta}`.
pub fn html_to_structured(html: &str, url: Option<&str>, parse: &ParseConfig) -> StructuredDoc {
    let mut meta = Map::new();
    if html.trim().is_empty() {
        meta.insert("error".to_string(), Value::String("empty_html".to_string()));
        return StructuredDoc {
            title: None,
            text: String::new(),
            meta,
            extractor: "none",
        };
    }

    let document = Html::parse_document(html);

    // 1) explicit selectors for known layouts
    let selector_title = parse
        .title_selector
        .as_deref()
        .and_then(|sel| select_text(&document, sel));
    let selector_text = parse
        .text_selector
        .as_deref()
        .and_then(|sel| select_text(&document, sel));

    if let Some(text) = selector_text.filter(|t| !t.is_empty()) {
        let title = selector_title.or_else(|| fallback_title(&document));
        meta.insert("extractor".into(), Value::String("selector".into()));
        return StructuredDoc {
            title,
            text,
            meta,
            extractor: "selector",
        };
    }

    // 2) Readability main-content extraction
    let readable = normalize_ws(&readability_text(html, url));
    if !readable.is_empty() {
        let title = selector_title.or_else(|| fallback_title(&document));
        meta.insert("extractor".into(), Value::String("readability".into()));
        return StructuredDoc {
            title,
            text: readable,
            meta,
            extractor: "readability",
        };
    }

    // 3) plain-text fallback
    let plain = normalize_ws(&html2text::from_read(html.as_bytes(), 80));
    let title = selector_title.or_else(|| fallback_title(&document));
    meta.insert("extractor".into(), Value::String("plain".into()));
    if plain.is_empty() {
        meta.insert(
            "error".to_string(),
            Value::String("no_text_extracted".to_string()),
        );
    }
    StructuredDoc {
        title,
        text: plain,
        meta,
        extractor: "plain",
    }
}

/// Main-content markdown via Readability.
fn readability_text(html: &str, url: Option<&str>) -> String {
    let parsed_url = url.and_then(|u| url::Url::parse(u).ok());
    let config = TransformConfig {
        readability: true,
        main_content: true,
        return_format: ReturnFormat::Markdown,
        filter_images: true,
        filter_svg: true,
        clean_html: true,
    };
    let input = TransformInput {
        url: parsed_url.as_ref(),
        content: html.as_bytes(),
        screenshot_bytes: None,
        encoding: None,
        selector_config: None,
        ignore_tags: None,
    };
    transform_content_input(input, &config)
}

fn select_text(document: &Html, selector: &str) -> Option<String> {
    let parsed = Selector::parse(selector).ok()?;
    let joined: Vec<String> = document
        .select(&parsed)
        .map(|el| el.text().collect::<Vec<_>>().join(" "))
        .collect();
    let text = normalize_ws(&joined.join(" "));
    (!text.is_empty()).then_some(text)
}

fn fallback_title(document: &Html) -> Option<String> {
    for selector in ["title", "h1"] {
        if let Some(title) = select_text(document, selector) {
            return Some(title);
        }
    }
    None
}

/// Heuristic share of boilerplate in a text, 0..=1.
///
/// Blend of low lexical variety and repeated-token share. Very short texts
/// score 0 here; the length gate catches those separately.
pub fn boilerplate_ratio(text: &str) -> f64 {
    if text.is_empty() {
        return 1.0;
    }

    let tokens: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect();
    if tokens.len() < 30 {
        return 0.0;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for token in &tokens {
        *counts.entry(token.as_str()).or_default() += 1;
    }

    let variety = counts.len() as f64 / tokens.len() as f64;
    let repeats = counts.values().filter(|c| **c >= 5).count();
    let repeat_share = repeats as f64 / counts.len().max(1) as f64;

    ((1.0 - variety) * 0.65 + repeat_share * 0.35).clamp(0.0, 1.0)
}
