//! Config migration. Older descriptors — including the legacy job-scraper
//! shape — are rewritten into the current schema before validation.
//! Running a migrated document through migration again is a no-op.

use serde_json::{json, Map, Value};

pub const CURRENT_CONFIG_VERSION: u32 = 1;

/// Keys that only exist in the legacy job-scraper config shape.
const LEGACY_KEYS: &[&str] = &[
    "base_url",
    "pattern",
    "max_pages",
    "unsequential",
    "step_page",
    "action_scrolling",
    "action_click",
];

/// Outcome of migrating one document.
pub struct Migration {
    pub value: Value,
    pub migrated: bool,
    pub notes: Vec<String>,
}

/// Migrate a config document (single source, array, or `{sources: [...]}`)
/// to the current version.
pub fn migrate_config(doc: Value) -> Migration {
    match doc {
        Value::Object(mut map) if map.get("sources").is_some_and(Value::is_array) => {
            let mut migrated = false;
            let mut notes = Vec::new();
            let sources = map
                .remove("sources")
                .and_then(|v| match v {
                    Value::Array(items) => Some(items),
                    _ => None,
                })
                .unwrap_or_default();
            let new_sources: Vec<Value> = sources
                .into_iter()
                .map(|s| {
                    let m = migrate_source(s);
                    migrated |= m.migrated;
                    notes.extend(m.notes);
                    m.value
                })
                .collect();
            map.insert("sources".to_string(), Value::Array(new_sources));
            Migration { value: Value::Object(map), migrated, notes }
        }
        Value::Array(items) => {
            let mut migrated = false;
            let mut notes = Vec::new();
            let new_items: Vec<Value> = items
                .into_iter()
                .map(|s| {
                    let m = migrate_source(s);
                    migrated |= m.migrated;
                    notes.extend(m.notes);
                    m.value
                })
                .collect();
            Migration { value: Value::Array(new_items), migrated, notes }
        }
        other => migrate_source(other),
    }
}

fn migrate_source(source: Value) -> Migration {
    let Value::Object(mut map) = source else {
        return Migration { value: source, migrated: false, notes: Vec::new() };
    };

    let version = map
        .get("config_version")
        .and_then(parse_version)
        .unwrap_or(0);
    let has_legacy = LEGACY_KEYS.iter().any(|k| map.contains_key(*k));

    if version >= CURRENT_CONFIG_VERSION && !has_legacy {
        return Migration { value: Value::Object(map), migrated: false, notes: Vec::new() };
    }

    let mut notes = Vec::new();
    let sid = map
        .get("source_id")
        .and_then(Value::as_str)
        .unwrap_or("<no source_id>")
        .to_string();

    if has_legacy {
        migrate_legacy_job_scraper(&mut map, &sid, &mut notes);
    }

    // Older nested storage shape: storage.items.format -> storage.items_format
    if let Some(Value::Object(storage)) = map.get_mut("storage") {
        let nested_format = storage
            .get("items")
            .and_then(|items| items.get("format"))
            .cloned();
        if let Some(format) = nested_format {
            storage.remove("items");
            storage.entry("items_format").or_insert(format);
        }
    }

    // Ensure engine.type exists so validation has something to check.
    match map.get_mut("engine") {
        None => {
            map.insert("engine".to_string(), json!({"type": "http"}));
        }
        Some(Value::Object(engine)) => {
            engine
                .entry("type")
                .or_insert_with(|| Value::String("http".to_string()));
        }
        Some(_) => {}
    }

    map.insert(
        "config_version".to_string(),
        Value::Number(CURRENT_CONFIG_VERSION.into()),
    );

    Migration { value: Value::Object(map), migrated: true, notes }
}

/// Rewrite the legacy job-scraper keys into the current schema:
/// `base_url` + `max_pages` become an entrypoint with paging,
/// `unsequential` + `step_page` select offset paging, `pattern` becomes the
/// regex link extractor, and `action_scrolling` / `action_click` become
/// browser actions.
fn migrate_legacy_job_scraper(map: &mut Map<String, Value>, sid: &str, notes: &mut Vec<String>) {
    let base_url = map.remove("base_url").and_then(|v| match v {
        Value::String(s) => Some(s),
        _ => None,
    });
    let pattern = map.remove("pattern").and_then(|v| match v {
        Value::String(s) => Some(s),
        _ => None,
    });
    let max_pages = map.remove("max_pages").and_then(|v| v.as_u64());
    let unsequential = map
        .remove("unsequential")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let step_page = map.remove("step_page").and_then(|v| v.as_i64());
    let action_scrolling = map.remove("action_scrolling").and_then(|v| v.as_u64());
    let action_click = map.remove("action_click").and_then(|v| match v {
        Value::String(s) => Some(s),
        _ => None,
    });

    if let Some(url) = base_url {
        let mode = if unsequential { "offset" } else { "page" };
        if unsequential && step_page.is_none() {
            notes.push(format!(
                "{sid}: legacy unsequential=true without step_page; offset step falls back to 10"
            ));
        }
        let mut paging = serde_json::Map::new();
        paging.insert("mode".to_string(), Value::String(mode.to_string()));
        if let Some(pages) = max_pages {
            paging.insert("pages".to_string(), json!(pages));
        }
        if let Some(step) = step_page {
            paging.insert("step".to_string(), json!(step));
        }

        let placeholder = if unsequential { "{offset}" } else { "{page}" };
        if max_pages.unwrap_or(1) > 1 && !url.contains(placeholder) {
            notes.push(format!(
                "{sid}: legacy base_url has no {placeholder} placeholder; paging will refetch the same URL"
            ));
        }

        map.entry("entrypoints").or_insert_with(|| {
            json!([{ "url": url, "paging": Value::Object(paging) }])
        });
    }

    if let Some(pattern) = pattern {
        map.entry("discovery").or_insert_with(|| {
            json!({ "link_extract": { "method": "regex", "pattern": pattern } })
        });
    }

    let mut actions: Vec<Value> = map
        .remove("actions")
        .and_then(|v| match v {
            Value::Array(a) => Some(a),
            _ => None,
        })
        .unwrap_or_default();
    if let Some(repeat) = action_scrolling {
        actions.push(json!({"type": "scroll", "repeat": repeat}));
    }
    if let Some(selector) = action_click {
        actions.push(json!({"type": "click", "selector": selector}));
    }
    if !actions.is_empty() {
        map.insert("actions".to_string(), Value::Array(actions));
    }
}

fn parse_version(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().map(|v| v as u32),
        // "1.0"-style strings from the oldest configs
        Value::String(s) => s.parse::<f64>().ok().map(|v| v as u32),
        _ => None,
    }
}
