//! Rule-based quality gates. Most scraping failures aren't transport
//! failures; they are login walls, JS shells, and anti-bot pages that
//! return 200 with garbage. This stage catches those.

use regex::RegexBuilder;
use tracing::warn;

use harvest_core::config::QualityConfig;
use harvest_core::{normalize_ws, Item};

use crate::extract::boilerplate_ratio;

#[derive(Debug, Clone, Default)]
pub struct QualityOutcome {
    pub issues: Vec<String>,
    /// A block pattern matched; routed to drop reason `blocked` rather
    /// than generic `quality`.
    pub blocked: bool,
}

impl QualityOutcome {
    pub fn keep(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Evaluate an item against the source's quality rules. `body` is the raw
/// response body (block patterns match pre-extraction markup too).
pub fn evaluate_quality(item: &Item, body: &str, config: &QualityConfig) -> QualityOutcome {
    let mut outcome = QualityOutcome::default();
    let text = normalize_ws(&item.text);

    for pattern in &config.block_patterns {
        let regex = match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(re) => re,
            Err(e) => {
                // validation rejects these up front; double safety here
                warn!(pattern, error = %e, "skipping malformed block pattern");
                continue;
            }
        };
        if regex.is_match(body) || regex.is_match(&text) {
            outcome.issues.push(format!("blocked_page: matched '{pattern}'"));
            outcome.blocked = true;
            break;
        }
    }

    if text.is_empty() {
        outcome.issues.push("empty_extraction".to_string());
    } else if config.min_text_len > 0 && text.chars().count() < config.min_text_len {
        outcome.issues.push(format!(
            "short_text: {} < {}",
            text.chars().count(),
            config.min_text_len
        ));
    }

    if let Some(max_ratio) = config.max_boilerplate_ratio {
        let ratio = boilerplate_ratio(&text);
        if ratio > max_ratio {
            outcome
                .issues
                .push(format!("boilerplate: {ratio:.3} > {max_ratio:.3}"));
        }
    }

    outcome
}
