pub mod dedupe;
pub mod diagnostics;
pub mod extract;
pub mod orchestrator;
pub mod quality;
pub mod report;
pub mod stages;
pub mod storage;
pub mod validate;

pub use dedupe::{DedupeStore, InMemoryDedupeStore};
pub use orchestrator::{Orchestrator, OrchestratorOptions, RunOutcome, RunStatus};
pub use stages::{expand_entrypoints, run_pipeline, PipelineArtifacts, PipelineContext, StageStats};
