//! Interpreter for the declarative action DSL.
//!
//! Actions run strictly in order against a live page. A failed action is
//! recorded and the sequence continues, except for a `click` marked
//! `strict: true`, which aborts the sequence; the page is then captured in
//! whatever state it reached. Action failures never cause fetch retries.

use std::time::Duration;

use chromiumoxide::page::Page;
use rand::Rng;
use tokio::time::Instant;
use tracing::debug;

use harvest_core::config::{Action, SleepPreset};

use crate::cancel::CancelToken;

/// Result of one interpreted action.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub action: &'static str,
    pub ok: bool,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

/// Result of interpreting a whole sequence.
#[derive(Debug, Clone, Default)]
pub struct ActionRun {
    pub outcomes: Vec<ActionOutcome>,
    pub aborted: bool,
}

impl ActionRun {
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.ok).count()
    }

    pub fn summary(&self) -> String {
        let ok = self.outcomes.len() - self.failures();
        let mut s = format!("actions: {ok}/{} ok", self.outcomes.len());
        if self.aborted {
            s.push_str(", aborted by strict failure");
        }
        s
    }
}

pub async fn run_actions(page: &Page, actions: &[Action], cancel: &CancelToken) -> ActionRun {
    let mut run = ActionRun::default();

    for action in actions {
        if cancel.is_cancelled() {
            run.aborted = true;
            break;
        }

        let started = Instant::now();
        let (name, result, strict) = interpret(page, action, cancel).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => run.outcomes.push(ActionOutcome {
                action: name,
                ok: true,
                elapsed_ms,
                error: None,
            }),
            Err(error) => {
                debug!(action = name, %error, "action failed");
                run.outcomes.push(ActionOutcome {
                    action: name,
                    ok: false,
                    elapsed_ms,
                    error: Some(error),
                });
                if strict {
                    run.aborted = true;
                    break;
                }
            }
        }
    }

    run
}

async fn interpret(
    page: &Page,
    action: &Action,
    cancel: &CancelToken,
) -> (&'static str, Result<(), String>, bool) {
    match action {
        Action::WaitFor { selector, timeout_s } => (
            "wait_for",
            wait_for_selector(page, selector, Duration::from_secs_f64(*timeout_s), cancel).await,
            false,
        ),
        Action::Click { selector, repeat, pause_s, strict } => (
            "click",
            click(page, selector, *repeat, *pause_s, cancel).await,
            *strict,
        ),
        Action::Hover { selector } => ("hover", hover(page, selector).await, false),
        Action::Type { selector, text, clear } => {
            ("type", type_text(page, selector, text, *clear).await, false)
        }
        Action::ClosePopup { selector } => ("close_popup", close_popup(page, selector).await, false),
        Action::Scroll { repeat, min_px, max_px, pause_s } => (
            "scroll",
            scroll(page, *repeat, *min_px, *max_px, *pause_s, cancel).await,
            false,
        ),
        Action::Sleep { preset, seconds } => (
            "sleep",
            sleep(*preset, *seconds, cancel).await,
            false,
        ),
        Action::MouseDrift {} => ("mouse_drift", mouse_drift(page).await, false),
    }
}

/// Poll for a selector until present or the timeout elapses.
pub async fn wait_for_selector(
    page: &Page,
    selector: &str,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<(), String> {
    let deadline = Instant::now() + timeout;
    loop {
        if page.find_element(selector).await.is_ok() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(format!("wait_for '{selector}' timed out after {timeout:?}"));
        }
        if !cancel.sleep(Duration::from_millis(100)).await {
            return Err("cancelled".to_string());
        }
    }
}

async fn click(
    page: &Page,
    selector: &str,
    repeat: u32,
    pause_s: f64,
    cancel: &CancelToken,
) -> Result<(), String> {
    for _ in 0..repeat.max(1) {
        micro_pause(cancel).await;
        let element = page
            .find_element(selector)
            .await
            .map_err(|e| format!("click '{selector}': {e}"))?;
        element
            .click()
            .await
            .map_err(|e| format!("click '{selector}': {e}"))?;
        if pause_s > 0.0 {
            cancel.sleep(jittered(pause_s)).await;
        }
    }
    Ok(())
}

async fn hover(page: &Page, selector: &str) -> Result<(), String> {
    let js = format!(
        r#"(() => {{
            const el = document.querySelector({sel});
            if (!el) return false;
            const r = el.getBoundingClientRect();
            const ev = new MouseEvent('mouseover', {{
                bubbles: true,
                clientX: r.left + r.width / 2,
                clientY: r.top + r.height / 2,
            }});
            el.dispatchEvent(ev);
            return true;
        }})()"#,
        sel = js_string(selector)
    );
    let found: bool = page
        .evaluate(js)
        .await
        .map_err(|e| format!("hover '{selector}': {e}"))?
        .into_value()
        .unwrap_or(false);
    if found {
        Ok(())
    } else {
        Err(format!("hover '{selector}': element not found"))
    }
}

async fn type_text(page: &Page, selector: &str, text: &str, clear: bool) -> Result<(), String> {
    let element = page
        .find_element(selector)
        .await
        .map_err(|e| format!("type '{selector}': {e}"))?;
    element
        .click()
        .await
        .map_err(|e| format!("type '{selector}': focus failed: {e}"))?;
    if clear {
        let js = format!(
            "(() => {{ const el = document.querySelector({sel}); if (el) el.value = ''; }})()",
            sel = js_string(selector)
        );
        page.evaluate(js)
            .await
            .map_err(|e| format!("type '{selector}': clear failed: {e}"))?;
    }
    element
        .type_str(text)
        .await
        .map_err(|e| format!("type '{selector}': {e}"))?;
    Ok(())
}

/// Click-if-present. Absence is the common case and not a failure.
async fn close_popup(page: &Page, selector: &str) -> Result<(), String> {
    if let Ok(element) = page.find_element(selector).await {
        let _ = element.click().await;
    }
    Ok(())
}

async fn scroll(
    page: &Page,
    repeat: u32,
    min_px: u32,
    max_px: u32,
    pause_s: f64,
    cancel: &CancelToken,
) -> Result<(), String> {
    let (lo, hi) = (min_px.min(max_px), min_px.max(max_px));
    for _ in 0..repeat.max(1) {
        let delta = if lo == hi {
            lo
        } else {
            rand::rng().random_range(lo..=hi)
        };
        page.evaluate(format!("window.scrollBy(0, {delta})"))
            .await
            .map_err(|e| format!("scroll: {e}"))?;
        let pause = if pause_s > 0.0 {
            jittered(pause_s)
        } else {
            Duration::from_millis(rand::rng().random_range(60..180))
        };
        if !cancel.sleep(pause).await {
            return Err("cancelled".to_string());
        }
    }
    Ok(())
}

async fn sleep(
    preset: Option<SleepPreset>,
    seconds: Option<f64>,
    cancel: &CancelToken,
) -> Result<(), String> {
    let base = match (preset, seconds) {
        (Some(SleepPreset::Short), _) => 0.5,
        (Some(SleepPreset::Medium), _) => 1.5,
        (Some(SleepPreset::Long), _) => 4.0,
        (None, Some(s)) => s,
        (None, None) => 0.0,
    };
    if base > 0.0 && !cancel.sleep(jittered(base)).await {
        return Err("cancelled".to_string());
    }
    Ok(())
}

async fn mouse_drift(page: &Page) -> Result<(), String> {
    let x: u32 = rand::rng().random_range(10..800);
    let y: u32 = rand::rng().random_range(10..500);
    let js = format!(
        "document.dispatchEvent(new MouseEvent('mousemove', {{bubbles: true, clientX: {x}, clientY: {y}}}))"
    );
    page.evaluate(js)
        .await
        .map_err(|e| format!("mouse_drift: {e}"))?;
    Ok(())
}

async fn micro_pause(cancel: &CancelToken) {
    let millis = rand::rng().random_range(40..120);
    cancel.sleep(Duration::from_millis(millis)).await;
}

/// ±25 % jitter around a base duration in seconds.
fn jittered(base_s: f64) -> Duration {
    let factor = 1.0 + rand::rng().random_range(-0.25..0.25);
    Duration::from_secs_f64((base_s * factor).max(0.0))
}

/// Quote a string for safe embedding in a JS expression.
fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_string_escapes_quotes() {
        assert_eq!(js_string("a'b\"c"), r#""a'b\"c""#);
    }

    #[test]
    fn jitter_stays_in_band() {
        for _ in 0..100 {
            let d = jittered(1.0).as_secs_f64();
            assert!((0.74..=1.26).contains(&d));
        }
    }

    #[test]
    fn summary_reports_aborts() {
        let run = ActionRun {
            outcomes: vec![
                ActionOutcome { action: "click", ok: true, elapsed_ms: 5, error: None },
                ActionOutcome {
                    action: "click",
                    ok: false,
                    elapsed_ms: 5,
                    error: Some("missing".into()),
                },
            ],
            aborted: true,
        };
        assert_eq!(run.failures(), 1);
        assert!(run.summary().contains("aborted"));
    }
}
