//! Field-level validation of parsed items.

use url::Url;

use harvest_core::config::ValidationConfig;
use harvest_core::{normalize_ws, Item};

/// Validate one item against the source's rules. Returned codes land in
/// the item's `_validation_errors` array.
pub fn validate_item(item: &Item, config: &ValidationConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if item.url.trim().is_empty() {
        errors.push("missing_url".to_string());
    } else if !looks_like_url(&item.url) {
        errors.push("bad_url".to_string());
    }

    if config.require_title && item.title.as_deref().map_or(true, |t| t.trim().is_empty()) {
        errors.push("missing_title".to_string());
    }

    let text = normalize_ws(&item.text);
    if config.require_text && text.is_empty() {
        errors.push("missing_text".to_string());
    } else if config.min_text_len > 0 && !text.is_empty() && text.chars().count() < config.min_text_len
    {
        errors.push(format!(
            "short_text: {} < {}",
            text.chars().count(),
            config.min_text_len
        ));
    }

    errors
}

fn looks_like_url(candidate: &str) -> bool {
    Url::parse(candidate)
        .map(|u| u.has_host() && (u.scheme() == "http" || u.scheme() == "https"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(require_title: bool, require_text: bool, min_text_len: usize) -> ValidationConfig {
        ValidationConfig {
            min_text_len,
            require_title,
            require_text,
        }
    }

    #[test]
    fn valid_item_has_no_errors() {
        let item = Item::new(
            "https://fix.test/jobs/1",
            Some("Backend Engineer".into()),
            "We are hiring a backend engineer for the platform team.",
        );
        assert!(validate_item(&item, &rules(true, true, 10)).is_empty());
    }

    #[test]
    fn missing_url_is_an_error() {
        let item = Item::new("", None, "text");
        assert!(validate_item(&item, &ValidationConfig::default())
            .contains(&"missing_url".to_string()));
    }

    #[test]
    fn non_http_url_is_bad() {
        let item = Item::new("ftp://fix.test/file", None, "text");
        assert!(validate_item(&item, &ValidationConfig::default())
            .contains(&"bad_url".to_string()));
        let item = Item::new("not a url", None, "text");
        assert!(validate_item(&item, &ValidationConfig::default())
            .contains(&"bad_url".to_string()));
    }

    #[test]
    fn required_fields_enforced_only_when_asked() {
        let item = Item::new("https://fix.test/1", None, "");
        assert!(validate_item(&item, &ValidationConfig::default()).is_empty());

        let errors = validate_item(&item, &rules(true, true, 0));
        assert!(errors.contains(&"missing_title".to_string()));
        assert!(errors.contains(&"missing_text".to_string()));
    }

    #[test]
    fn min_text_len_applies_to_nonempty_text() {
        let item = Item::new("https://fix.test/1", None, "short");
        let errors = validate_item(&item, &rules(false, false, 50));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("short_text"));
    }
}
