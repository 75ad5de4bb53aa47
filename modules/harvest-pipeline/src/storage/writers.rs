//! Artifact writers: JSONL (append-only, newline-terminated, UTF-8),
//! CSV, and a parquet slot that degrades to JSONL.
//!
//! The degradation mirrors how persistence failures are treated overall:
//! in normal mode they are logged and counted, never fatal; strict mode
//! turns them into `PersistError`.

use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::warn;

use harvest_core::config::ItemsFormat;
use harvest_core::{HarvestError, Item, Result};

use super::layout::{ensure_parent, Layout};
use crate::stages::PageRecord;

#[derive(Debug, Clone, Copy, Default)]
pub struct WriterOptions {
    /// Fail instead of degrading when a requested format cannot be written.
    pub strict: bool,
    /// Raw-page part files roll over at this many records.
    pub chunk_size: usize,
}

impl WriterOptions {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            chunk_size: 5000,
        }
    }
}

/// Append rows to a JSONL file, one record per line.
pub fn append_jsonl(path: &Path, rows: &[Value]) -> Result<()> {
    ensure_parent(path)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for row in rows {
        let line = serde_json::to_string(row)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
    }
    Ok(())
}

/// Write a pretty JSON document, replacing any previous content.
pub fn write_json(path: &Path, value: &Value) -> Result<()> {
    ensure_parent(path)?;
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

/// Serialize a fetch into the raw-page record shape. Bodies are stored
/// verbatim; downstream consumers must not depend on anything beyond the
/// record's existence.
pub fn fetch_to_raw_record(record: &PageRecord) -> Value {
    serde_json::json!({
        "url": record.url,
        "ok": record.fetch.ok(),
        "final_url": record.fetch.final_url,
        "status": record.fetch.status,
        "headers": record.fetch.headers,
        "body": record.fetch.body,
        "fetched_at": record.fetch.fetched_at.to_rfc3339(),
        "elapsed_ms": record.fetch.elapsed_ms,
        "block_signal": record.fetch.block_signal,
        "trace": record.fetch.trace,
        "error": record.fetch.error,
    })
}

/// Write raw pages chunked into part files. Returns the paths written.
pub fn write_raw_pages(
    layout: &Layout,
    run_id: &str,
    source_id: &str,
    kind: &str,
    pages: &[PageRecord],
    options: &WriterOptions,
) -> Result<Vec<PathBuf>> {
    let chunk_size = options.chunk_size.max(1);
    let mut paths = Vec::new();
    for (part, chunk) in pages.chunks(chunk_size).enumerate() {
        let path = layout.raw_page_part(run_id, source_id, kind, part);
        let rows: Vec<Value> = chunk.iter().map(fetch_to_raw_record).collect();
        append_jsonl(&path, &rows)?;
        paths.push(path);
    }
    Ok(paths)
}

/// Write the extracted-links artifact.
pub fn write_links(
    layout: &Layout,
    run_id: &str,
    source_id: &str,
    links: &[harvest_core::ExtractedLink],
) -> Result<PathBuf> {
    let path = layout.links_path(run_id, source_id);
    let rows: Vec<Value> = links
        .iter()
        .map(|link| serde_json::to_value(link))
        .collect::<std::result::Result<_, _>>()?;
    append_jsonl(&path, &rows)?;
    Ok(path)
}

/// Write an items artifact in the requested format. Parquet degrades to
/// JSONL with a warning unless strict mode is on.
pub fn write_items(
    layout: &Layout,
    run_id: &str,
    source_id: &str,
    name: &str,
    items: &[Item],
    format: ItemsFormat,
    options: &WriterOptions,
) -> Result<PathBuf> {
    match format {
        ItemsFormat::Jsonl => {
            let path = layout.items_path(run_id, source_id, name, "jsonl");
            let rows: Vec<Value> = items
                .iter()
                .map(serde_json::to_value)
                .collect::<std::result::Result<_, _>>()?;
            append_jsonl(&path, &rows)?;
            Ok(path)
        }
        ItemsFormat::Csv => {
            let path = layout.items_path(run_id, source_id, name, "csv");
            write_csv(&path, items)?;
            Ok(path)
        }
        ItemsFormat::Parquet => {
            if options.strict {
                return Err(HarvestError::Persist(format!(
                    "{source_id}/{name}: parquet output is not built into this binary"
                )));
            }
            warn!(source_id, name, "parquet not available; writing jsonl instead");
            write_items(layout, run_id, source_id, name, items, ItemsFormat::Jsonl, options)
        }
    }
}

/// CSV needs stable columns: the union of top-level keys, sorted, with
/// nested values embedded as JSON strings.
fn write_csv(path: &Path, items: &[Item]) -> Result<()> {
    ensure_parent(path)?;

    let rows: Vec<Value> = items
        .iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<_, _>>()?;

    let mut columns: BTreeSet<String> = BTreeSet::new();
    for row in &rows {
        if let Value::Object(map) = row {
            columns.extend(map.keys().cloned());
        }
    }
    let columns: Vec<String> = columns.into_iter().collect();

    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| HarvestError::Persist(format!("csv open failed: {e}")))?;
    writer
        .write_record(&columns)
        .map_err(|e| HarvestError::Persist(format!("csv header failed: {e}")))?;

    for row in &rows {
        let record: Vec<String> = columns
            .iter()
            .map(|col| match row.get(col) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            })
            .collect();
        writer
            .write_record(&record)
            .map_err(|e| HarvestError::Persist(format!("csv row failed: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| HarvestError::Persist(format!("csv flush failed: {e}")))?;
    Ok(())
}
