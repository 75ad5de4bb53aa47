//! URL canonicalization for stable dedupe keys.

use url::Url;

/// Query parameters that only exist for ad attribution. Dropped during
/// normalization so the same article shared via two campaigns dedupes.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "gclid",
    "fbclid",
    "mc_cid",
    "mc_eid",
];

/// Normalize a URL for deduplication:
/// - lowercase scheme and host
/// - remove default ports
/// - strip the fragment
/// - drop tracking parameters (utm_*, gclid, fbclid, mc_*)
/// - sort remaining query pairs
/// - remove a trailing slash (unless the path is just "/")
///
/// Idempotent: `normalize_url(normalize_url(u)) == normalize_url(u)`.
pub fn normalize_url(raw: &str) -> Result<String, url::ParseError> {
    let mut parsed = Url::parse(raw.trim())?;

    parsed.set_fragment(None);

    if parsed.port() == Some(80) && parsed.scheme() == "http"
        || parsed.port() == Some(443) && parsed.scheme() == "https"
    {
        let _ = parsed.set_port(None);
    }

    if let Some(query) = parsed.query() {
        if query.is_empty() {
            parsed.set_query(None);
        } else {
            let mut pairs: Vec<(String, String)> = parsed
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.to_lowercase().as_str()))
                .collect();
            pairs.sort();
            if pairs.is_empty() {
                parsed.set_query(None);
            } else {
                let sorted: Vec<String> = pairs
                    .iter()
                    .map(|(k, v)| {
                        if v.is_empty() {
                            k.clone()
                        } else {
                            format!("{k}={v}")
                        }
                    })
                    .collect();
                parsed.set_query(Some(&sorted.join("&")));
            }
        }
    }

    let mut result = parsed.to_string();
    if result.ends_with('/') && parsed.path() != "/" {
        result.pop();
    }

    Ok(result)
}
