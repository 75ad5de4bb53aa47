//! Link discovery on listing HTML: regex, CSS selector, or XPath subset.

use std::sync::LazyLock;

use chrono::Utc;
use regex::{Regex, RegexBuilder};
use scraper::{Html, Selector};
use tracing::warn;
use url::Url;

use harvest_core::config::{LinkExtractConfig, LinkExtractMethod};
use harvest_core::{normalize_url, ExtractedLink};

use super::xpath::xpath_to_css;

pub struct LinkExtractRequest<'a> {
    pub html: &'a str,
    /// The listing page URL, for relative→absolute resolution.
    pub base_url: &'a str,
    pub config: &'a LinkExtractConfig,
}

/// Extract, resolve, filter, and normalize candidate links.
///
/// The output preserves first-seen order and is unique by normalized URL
/// within this page.
pub fn extract_links(req: &LinkExtractRequest<'_>) -> Vec<ExtractedLink> {
    if req.html.is_empty() {
        return Vec::new();
    }

    let raw: Vec<String> = match req.config.method {
        LinkExtractMethod::Regex => match &req.config.pattern {
            Some(pattern) => extract_regex(req.html, pattern),
            None => {
                warn!("regex link extraction without a pattern");
                Vec::new()
            }
        },
        LinkExtractMethod::Css => match &req.config.selector {
            Some(selector) => extract_css(req.html, selector),
            None => {
                warn!("css link extraction without a selector");
                Vec::new()
            }
        },
        LinkExtractMethod::Xpath => match &req.config.selector {
            Some(selector) => match xpath_to_css(selector) {
                Some(selection) => {
                    let css = match &selection.attr {
                        Some(attr) => format!("{}::attr({})", selection.selector, attr),
                        None => selection.selector.clone(),
                    };
                    extract_css(req.html, &css)
                }
                None => {
                    warn!(xpath = selector, "xpath expression outside the supported subset");
                    Vec::new()
                }
            },
            None => {
                warn!("xpath link extraction without a selector");
                Vec::new()
            }
        },
    };

    let base = Url::parse(req.base_url).ok();
    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();

    for candidate in raw {
        let candidate = candidate.trim();
        if candidate.is_empty()
            || candidate.starts_with('#')
            || candidate.starts_with("javascript:")
            || candidate.starts_with("mailto:")
            || candidate.starts_with("tel:")
            || candidate.starts_with("data:")
        {
            continue;
        }

        let resolved = if candidate.starts_with("http://") || candidate.starts_with("https://") {
            match Url::parse(candidate) {
                Ok(u) => u,
                Err(_) => continue,
            }
        } else if let Some(base) = &base {
            match base.join(candidate) {
                Ok(u) => u,
                Err(_) => continue,
            }
        } else {
            continue;
        };

        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }

        if let Some(identifier) = &req.config.identifier {
            if !resolved.as_str().contains(identifier.as_str()) {
                continue;
            }
        }

        let Ok(normalized) = normalize_url(resolved.as_str()) else {
            continue;
        };

        if seen.insert(normalized.clone()) {
            links.push(ExtractedLink {
                url_raw: resolved.into(),
                url_normalized: normalized,
                source_page_url: req.base_url.to_string(),
                discovered_at: Utc::now(),
            });
        }
    }

    links
}

/// Regex extraction. A capturing group takes precedence over the whole
/// match, so patterns like `href="([^"]+)"` work as expected.
fn extract_regex(html: &str, pattern: &str) -> Vec<String> {
    let regex = match RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .build()
    {
        Ok(re) => re,
        Err(e) => {
            warn!(pattern, error = %e, "link pattern does not compile");
            return Vec::new();
        }
    };

    regex
        .captures_iter(html)
        .filter_map(|caps| {
            let m = if caps.len() > 1 { caps.get(1) } else { caps.get(0) };
            m.map(|m| m.as_str().to_string())
        })
        .collect()
}

static ATTR_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"::attr\(([^)]+)\)\s*$").expect("valid regex"));

/// CSS extraction. A `::attr(name)` suffix selects a specific attribute;
/// without it, `href` is preferred and `src` is the fallback.
fn extract_css(html: &str, selector: &str) -> Vec<String> {
    let trimmed = selector.trim();
    let (css, attr) = match ATTR_SUFFIX_RE.captures(trimmed) {
        Some(caps) => (
            trimmed[..caps.get(0).expect("matched").start()]
                .trim()
                .to_string(),
            Some(caps[1].trim().to_string()),
        ),
        None => (trimmed.to_string(), None),
    };

    let parsed = match Selector::parse(&css) {
        Ok(sel) => sel,
        Err(e) => {
            warn!(selector = %css, error = %e, "css selector does not parse");
            return Vec::new();
        }
    };

    let document = Html::parse_document(html);
    document
        .select(&parsed)
        .filter_map(|element| match &attr {
            Some(attr) => element.value().attr(attr).map(String::from),
            None => element
                .value()
                .attr("href")
                .or_else(|| element.value().attr("src"))
                .map(String::from),
        })
        .collect()
}
