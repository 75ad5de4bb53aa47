//! Load JSON or YAML source descriptors from disk.
//!
//! A config file may hold a single source object, an array of sources, or
//! `{"sources": [...]}`. All three surfaces map to the same descriptors.
//! `${ENV_VAR}` references in string fields are expanded from the process
//! environment before parsing.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::{HarvestError, Result};

use super::migration::migrate_config;
use super::schema::{validate_source, SourceConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

/// Everything the loader learned: parsed sources plus the warnings and
/// errors collected along the way. `errors` non-empty means the config is
/// unusable; warnings alone do not stop a run.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub sources: Vec<SourceConfig>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub migrations: Vec<String>,
    /// The migrated document, for the `config_resolved.json` snapshot.
    pub resolved: Value,
}

impl LoadReport {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Load and validate source descriptors from a file path.
pub fn load_sources(path: &Path) -> Result<LoadReport> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| HarvestError::Config(format!("cannot read {}: {e}", path.display())))?;
    let format = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => ConfigFormat::Yaml,
        _ => ConfigFormat::Json,
    };
    load_sources_from_str(&raw, format)
}

/// Load and validate source descriptors from an in-memory document.
pub fn load_sources_from_str(raw: &str, format: ConfigFormat) -> Result<LoadReport> {
    let doc: Value = match format {
        ConfigFormat::Json => serde_json::from_str(raw)
            .map_err(|e| HarvestError::Config(format!("invalid JSON: {e}")))?,
        ConfigFormat::Yaml => serde_yaml::from_str(raw)
            .map_err(|e| HarvestError::Config(format!("invalid YAML: {e}")))?,
    };

    let mut report = LoadReport::default();

    let doc = expand_env(doc, &mut report.warnings);

    let migration = migrate_config(doc);
    if migration.migrated {
        report.migrations.push("config migrated to current version".to_string());
    }
    report.warnings.extend(migration.notes);
    report.resolved = migration.value.clone();

    let raw_sources: Vec<Value> = match migration.value {
        Value::Object(mut map) if map.contains_key("sources") => {
            match map.remove("sources").expect("key checked above") {
                Value::Array(items) => items,
                other => {
                    report
                        .errors
                        .push(format!("'sources' must be an array, got {}", kind_of(&other)));
                    Vec::new()
                }
            }
        }
        object @ Value::Object(_) => vec![object],
        Value::Array(items) => items,
        other => {
            report.errors.push(format!(
                "config root must be an object or array, got {}",
                kind_of(&other)
            ));
            Vec::new()
        }
    };

    let mut seen_ids: Vec<String> = Vec::new();
    for (i, raw_source) in raw_sources.into_iter().enumerate() {
        if raw_source
            .get("enabled")
            .and_then(Value::as_bool)
            .is_some_and(|enabled| !enabled)
        {
            debug!(index = i, "skipping disabled source");
            continue;
        }

        let source: SourceConfig = match serde_json::from_value(raw_source) {
            Ok(s) => s,
            Err(e) => {
                report.errors.push(format!("sources[{i}]: {e}"));
                continue;
            }
        };

        if seen_ids.contains(&source.source_id) {
            report
                .errors
                .push(format!("duplicate source_id: {}", source.source_id));
            continue;
        }
        seen_ids.push(source.source_id.clone());

        let (errors, warnings) = validate_source(&source);
        report.errors.extend(errors);
        report.warnings.extend(warnings);
        report.sources.push(source);
    }

    if report.sources.is_empty() && report.errors.is_empty() {
        report
            .errors
            .push("config contains no enabled sources".to_string());
    }

    Ok(report)
}

static ENV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

/// Expand `${VAR}` in every string field. Unset variables are left verbatim
/// and reported as warnings so a typo'd name is visible.
fn expand_env(value: Value, warnings: &mut Vec<String>) -> Value {
    match value {
        Value::String(s) => {
            if !ENV_RE.is_match(&s) {
                return Value::String(s);
            }
            let expanded = ENV_RE.replace_all(&s, |caps: &regex::Captures<'_>| {
                let name = &caps[1];
                match std::env::var(name) {
                    Ok(v) => v,
                    Err(_) => {
                        warnings.push(format!("environment variable {name} is not set"));
                        caps[0].to_string()
                    }
                }
            });
            Value::String(expanded.into_owned())
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| expand_env(v, warnings))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, expand_env(v, warnings)))
                .collect(),
        ),
        other => other,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE: &str = r#"{
        "source_id": "acme_jobs",
        "entrypoints": [{"url": "https://acme.test/jobs?page={page}",
                         "paging": {"mode": "page", "start": 1, "pages": 2}}],
        "discovery": {"link_extract": {"method": "regex",
                                       "pattern": "https://acme\\.test/jobs/\\d+"}}
    }"#;

    #[test]
    fn loads_single_object() {
        let report = load_sources_from_str(SINGLE, ConfigFormat::Json).unwrap();
        assert!(report.ok(), "errors: {:?}", report.errors);
        assert_eq!(report.sources.len(), 1);
        assert_eq!(report.sources[0].source_id, "acme_jobs");
    }

    #[test]
    fn loads_sources_wrapper() {
        let raw = format!(r#"{{"sources": [{SINGLE}]}}"#);
        let report = load_sources_from_str(&raw, ConfigFormat::Json).unwrap();
        assert!(report.ok());
        assert_eq!(report.sources.len(), 1);
    }

    #[test]
    fn loads_top_level_array() {
        let raw = format!("[{SINGLE}]");
        let report = load_sources_from_str(&raw, ConfigFormat::Json).unwrap();
        assert!(report.ok());
        assert_eq!(report.sources.len(), 1);
    }

    #[test]
    fn yaml_surface_is_equivalent() {
        let yaml = r#"
source_id: acme_jobs
entrypoints:
  - url: "https://acme.test/jobs?page={page}"
    paging: {mode: page, start: 1, pages: 2}
discovery:
  link_extract:
    method: regex
    pattern: 'https://acme\.test/jobs/\d+'
"#;
        let from_yaml = load_sources_from_str(yaml, ConfigFormat::Yaml).unwrap();
        let from_json = load_sources_from_str(SINGLE, ConfigFormat::Json).unwrap();
        assert_eq!(from_yaml.sources, from_json.sources);
    }

    #[test]
    fn disabled_sources_are_filtered() {
        let raw = r#"{"sources": [
            {"source_id": "off", "enabled": false,
             "entrypoints": [{"url": "https://x.test"}]},
            {"source_id": "on",
             "entrypoints": [{"url": "https://y.test"}],
             "discovery": {"link_extract": {"method": "regex", "pattern": "https://y\\.test/\\d+"}}}
        ]}"#;
        let report = load_sources_from_str(raw, ConfigFormat::Json).unwrap();
        assert_eq!(report.sources.len(), 1);
        assert_eq!(report.sources[0].source_id, "on");
    }

    #[test]
    fn duplicate_ids_are_an_error() {
        let raw = format!(r#"{{"sources": [{SINGLE}, {SINGLE}]}}"#);
        let report = load_sources_from_str(&raw, ConfigFormat::Json).unwrap();
        assert!(report.errors.iter().any(|e| e.contains("duplicate source_id")));
    }

    #[test]
    fn env_expansion_applies_to_string_fields() {
        std::env::set_var("HARVEST_TEST_HOST", "env.test");
        let raw = r#"{
            "source_id": "envy",
            "entrypoints": [{"url": "https://${HARVEST_TEST_HOST}/list"}],
            "discovery": {"link_extract": {"method": "regex", "pattern": "https://env\\.test/\\d+"}}
        }"#;
        let report = load_sources_from_str(raw, ConfigFormat::Json).unwrap();
        assert_eq!(report.sources[0].entrypoints[0].url, "https://env.test/list");
    }

    #[test]
    fn unset_env_var_warns_and_keeps_placeholder() {
        let raw = r#"{
            "source_id": "envy",
            "entrypoints": [{"url": "https://${HARVEST_UNSET_VAR_XYZ}/list"}],
            "discovery": {"link_extract": {"method": "regex", "pattern": "https://x/\\d+"}}
        }"#;
        let report = load_sources_from_str(raw, ConfigFormat::Json).unwrap();
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("HARVEST_UNSET_VAR_XYZ")));
        assert!(report.sources[0].entrypoints[0]
            .url
            .contains("${HARVEST_UNSET_VAR_XYZ}"));
    }

    #[test]
    fn empty_config_is_an_error() {
        let report = load_sources_from_str(r#"{"sources": []}"#, ConfigFormat::Json).unwrap();
        assert!(!report.ok());
    }

    #[test]
    fn legacy_config_loads_after_migration() {
        let raw = r#"{
            "source_id": "legacy_jobs",
            "base_url": "https://jobs.test/list?page={page}",
            "pattern": "https://jobs\\.test/post/\\d+",
            "max_pages": 3
        }"#;
        let report = load_sources_from_str(raw, ConfigFormat::Json).unwrap();
        assert!(report.ok(), "errors: {:?}", report.errors);
        let source = &report.sources[0];
        assert_eq!(source.entrypoints[0].paging.as_ref().unwrap().pages(), 3);
        assert_eq!(
            source.discovery.link_extract.pattern.as_deref(),
            Some("https://jobs\\.test/post/\\d+")
        );
    }
}
