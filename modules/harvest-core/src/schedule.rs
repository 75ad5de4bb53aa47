//! Schedule hints attached to sources. The orchestrator does not run a
//! daemon; schedules are parsed, validated, and surfaced in reports so an
//! external scheduler can act on them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum Schedule {
    /// Fixed interval in seconds.
    Interval(u64),
    /// A five-field cron expression, passed through verbatim.
    Cron(String),
}

impl Schedule {
    pub fn summary(&self) -> String {
        match self {
            Schedule::Interval(secs) => format!("interval: {secs}s"),
            Schedule::Cron(expr) => format!("cron: {expr}"),
        }
    }
}

/// Parse a frequency hint: "15m", "2h", "30s", "daily", a bare number of
/// seconds, or a five-field cron expression. Anything else is `None`.
pub fn parse_frequency(freq: &str) -> Option<Schedule> {
    let s = freq.trim();
    if s.is_empty() {
        return None;
    }

    match s {
        "daily" => return Some(Schedule::Interval(86_400)),
        "hourly" => return Some(Schedule::Interval(3_600)),
        _ => {}
    }

    if let Some(num) = s.strip_suffix('h') {
        if let Ok(n) = num.parse::<u64>() {
            return Some(Schedule::Interval(n * 3_600));
        }
    }
    if let Some(num) = s.strip_suffix('m') {
        if let Ok(n) = num.parse::<u64>() {
            return Some(Schedule::Interval(n * 60));
        }
    }
    if let Some(num) = s.strip_suffix('s') {
        if let Ok(n) = num.parse::<u64>() {
            return Some(Schedule::Interval(n));
        }
    }
    if let Ok(n) = s.parse::<u64>() {
        return Some(Schedule::Interval(n));
    }

    if s.split_whitespace().count() == 5 {
        return Some(Schedule::Cron(s.to_string()));
    }

    None
}
