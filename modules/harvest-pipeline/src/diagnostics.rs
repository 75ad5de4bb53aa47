//! Heuristic classification of why a source is not yielding content, with
//! a recommended next step. One representative response per source is
//! diagnosed and the result lands in the run report.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisLabel {
    Ok,
    JsRequiredOrMissingContent,
    RateLimited,
    RequiresAuth,
    ChallengeDetected,
    BlockedOrDenied,
    UnknownError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStep {
    Proceed,
    TryHttpTuning,
    SwitchToBrowser,
    StopForHuman,
    UseAuth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnosis {
    pub label: DiagnosisLabel,
    pub reason: String,
    pub next_step: NextStep,
    pub recommendation: String,
}

const CHALLENGE_PATTERNS: &[&str] = &[
    "captcha",
    "recaptcha",
    "turnstile",
    "cf-turnstile",
    "verify you are human",
    "unusual traffic",
];

const AUTH_PATTERNS: &[&str] = &["login required", "sign in to continue", "password required"];

/// Classify a raw HTTP response.
pub fn diagnose_http_response(
    status: u16,
    headers: &BTreeMap<String, String>,
    body: &str,
) -> Diagnosis {
    let text = body.to_lowercase();
    let has_retry_after = headers.keys().any(|k| k.eq_ignore_ascii_case("retry-after"));

    if status == 429 || has_retry_after {
        return diagnosis(
            DiagnosisLabel::RateLimited,
            "received 429 or a Retry-After header",
            NextStep::TryHttpTuning,
        );
    }

    if let Some(pattern) = CHALLENGE_PATTERNS.iter().find(|p| text.contains(**p)) {
        return diagnosis(
            DiagnosisLabel::ChallengeDetected,
            format!("found challenge pattern: {pattern}"),
            NextStep::StopForHuman,
        );
    }

    if status == 401 || AUTH_PATTERNS.iter().any(|p| text.contains(*p)) {
        return diagnosis(
            DiagnosisLabel::RequiresAuth,
            "auth-required signals detected",
            NextStep::UseAuth,
        );
    }

    if status == 403 {
        return diagnosis(
            DiagnosisLabel::BlockedOrDenied,
            "received 403 Forbidden",
            NextStep::TryHttpTuning,
        );
    }

    if status == 200
        && (text.len() < 500
            || text.contains("javascript is required")
            || text.contains("enable javascript"))
    {
        return diagnosis(
            DiagnosisLabel::JsRequiredOrMissingContent,
            format!("body is {} chars or demands JavaScript", text.len()),
            NextStep::SwitchToBrowser,
        );
    }

    if (200..300).contains(&status) {
        return diagnosis(DiagnosisLabel::Ok, "status 2xx", NextStep::Proceed);
    }

    diagnosis(
        DiagnosisLabel::UnknownError,
        format!("unhandled status {status}"),
        NextStep::TryHttpTuning,
    )
}

/// Classify a DOM the browser already rendered.
pub fn diagnose_rendered_dom(body: &str) -> Diagnosis {
    let text = body.to_lowercase();

    if let Some(pattern) = CHALLENGE_PATTERNS.iter().find(|p| text.contains(**p)) {
        return diagnosis(
            DiagnosisLabel::ChallengeDetected,
            format!("challenge pattern in rendered DOM: {pattern}"),
            NextStep::StopForHuman,
        );
    }

    if AUTH_PATTERNS.iter().any(|p| text.contains(*p)) {
        return diagnosis(
            DiagnosisLabel::RequiresAuth,
            "auth-required signals in rendered DOM",
            NextStep::UseAuth,
        );
    }

    if text.len() < 200 {
        return diagnosis(
            DiagnosisLabel::JsRequiredOrMissingContent,
            "rendered DOM is suspiciously short",
            NextStep::TryHttpTuning,
        );
    }

    diagnosis(DiagnosisLabel::Ok, "rendered content looks fine", NextStep::Proceed)
}

fn diagnosis(
    label: DiagnosisLabel,
    reason: impl Into<String>,
    next_step: NextStep,
) -> Diagnosis {
    let recommendation = match next_step {
        NextStep::Proceed => "Continue with extraction.",
        NextStep::TryHttpTuning => "Try adjusting the user agent, delays, or rate limits.",
        NextStep::SwitchToBrowser => "The site needs JavaScript; switch to the browser engine.",
        NextStep::StopForHuman => "Automated challenge detected; stop and review artifacts.",
        NextStep::UseAuth => "Login required; provide session cookies.",
    };
    Diagnosis {
        label,
        reason: reason.into(),
        next_step,
        recommendation: recommendation.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_headers() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn rate_limit_by_status_or_header() {
        let d = diagnose_http_response(429, &no_headers(), "");
        assert_eq!(d.label, DiagnosisLabel::RateLimited);

        let mut headers = no_headers();
        headers.insert("Retry-After".into(), "30".into());
        let d = diagnose_http_response(200, &headers, &"x".repeat(600));
        assert_eq!(d.label, DiagnosisLabel::RateLimited);
    }

    #[test]
    fn challenge_outranks_auth() {
        let d = diagnose_http_response(200, &no_headers(), "login required after this CAPTCHA");
        assert_eq!(d.label, DiagnosisLabel::ChallengeDetected);
        assert_eq!(d.next_step, NextStep::StopForHuman);
    }

    #[test]
    fn short_200_suggests_browser() {
        let d = diagnose_http_response(200, &no_headers(), "<div id=app></div>");
        assert_eq!(d.label, DiagnosisLabel::JsRequiredOrMissingContent);
        assert_eq!(d.next_step, NextStep::SwitchToBrowser);
    }

    #[test]
    fn healthy_200_proceeds() {
        let d = diagnose_http_response(200, &no_headers(), &"content ".repeat(100));
        assert_eq!(d.label, DiagnosisLabel::Ok);
    }

    #[test]
    fn rendered_dom_short_is_flagged() {
        let d = diagnose_rendered_dom("almost nothing");
        assert_eq!(d.label, DiagnosisLabel::JsRequiredOrMissingContent);
        // already rendered: more browser won't help
        assert_eq!(d.next_step, NextStep::TryHttpTuning);
    }

    #[test]
    fn forbidden_is_blocked() {
        let d = diagnose_http_response(403, &no_headers(), "");
        assert_eq!(d.label, DiagnosisLabel::BlockedOrDenied);
    }
}
