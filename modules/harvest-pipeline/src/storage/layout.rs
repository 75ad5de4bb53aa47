//! On-disk layout of a run. This shape is the compatibility contract:
//!
//! ```text
//! results/run_<ts>_<id>/
//!   run.log
//!   run_meta.json
//!   config_resolved.json
//!   run_report.json
//!   sources/<source_id>/
//!     source.log
//!     meta.json
//!     raw_pages/{listing,detail}/part-NNNNN.jsonl
//!     links/extracted_links.jsonl
//!     items/{items,items_valid,items_dropped}.<ext>
//! ```

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(format!("run_{run_id}"))
    }

    pub fn run_log_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("run.log")
    }

    pub fn run_meta_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("run_meta.json")
    }

    pub fn config_resolved_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("config_resolved.json")
    }

    pub fn run_report_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("run_report.json")
    }

    pub fn source_dir(&self, run_id: &str, source_id: &str) -> PathBuf {
        self.run_dir(run_id).join("sources").join(safe_name(source_id))
    }

    pub fn source_log_path(&self, run_id: &str, source_id: &str) -> PathBuf {
        self.source_dir(run_id, source_id).join("source.log")
    }

    pub fn source_meta_path(&self, run_id: &str, source_id: &str) -> PathBuf {
        self.source_dir(run_id, source_id).join("meta.json")
    }

    pub fn raw_pages_dir(&self, run_id: &str, source_id: &str, kind: &str) -> PathBuf {
        self.source_dir(run_id, source_id).join("raw_pages").join(kind)
    }

    pub fn raw_page_part(&self, run_id: &str, source_id: &str, kind: &str, part: usize) -> PathBuf {
        self.raw_pages_dir(run_id, source_id, kind)
            .join(format!("part-{part:05}.jsonl"))
    }

    pub fn links_path(&self, run_id: &str, source_id: &str) -> PathBuf {
        self.source_dir(run_id, source_id)
            .join("links")
            .join("extracted_links.jsonl")
    }

    pub fn items_path(&self, run_id: &str, source_id: &str, name: &str, ext: &str) -> PathBuf {
        self.source_dir(run_id, source_id)
            .join("items")
            .join(format!("{name}.{ext}"))
    }
}

pub fn ensure_parent(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Source ids become directory names; anything unsafe is replaced.
pub fn safe_name(source_id: &str) -> String {
    let trimmed = source_id.trim();
    if trimmed.is_empty() {
        return "unknown_source".to_string();
    }
    trimmed
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .take(120)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_match_the_contract() {
        let layout = Layout::new("results");
        let run = "20260801_120000_ab12cd";
        assert_eq!(
            layout.run_report_path(run),
            PathBuf::from("results/run_20260801_120000_ab12cd/run_report.json")
        );
        assert_eq!(
            layout.links_path(run, "acme_jobs"),
            PathBuf::from(
                "results/run_20260801_120000_ab12cd/sources/acme_jobs/links/extracted_links.jsonl"
            )
        );
        assert_eq!(
            layout.raw_page_part(run, "acme_jobs", "listing", 0),
            PathBuf::from(
                "results/run_20260801_120000_ab12cd/sources/acme_jobs/raw_pages/listing/part-00000.jsonl"
            )
        );
        assert_eq!(
            layout.items_path(run, "acme_jobs", "items_valid", "jsonl"),
            PathBuf::from(
                "results/run_20260801_120000_ab12cd/sources/acme_jobs/items/items_valid.jsonl"
            )
        );
    }

    #[test]
    fn safe_name_sanitizes() {
        assert_eq!(safe_name("acme jobs/v1"), "acme_jobs_v1");
        assert_eq!(safe_name("ok-id_1.2"), "ok-id_1.2");
        assert_eq!(safe_name("  "), "unknown_source");
    }
}
