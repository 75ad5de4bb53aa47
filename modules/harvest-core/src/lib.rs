pub mod config;
pub mod error;
pub mod item;
pub mod response;
pub mod schedule;
pub mod text;
pub mod urlnorm;

pub use config::{
    load_sources, migrate_config, validate_source, Action, EngineKind, EngineConfig, EntryPoint,
    LinkExtractMethod, LoadReport, PagingConfig, PagingMode, SourceConfig,
};
pub use error::{HarvestError, Result};
pub use item::{DropReason, ExtractedLink, Item};
pub use response::{classify_block, BlockSignal, EngineError, ErrorKind, FetchResponse, TraceEntry};
pub use text::{content_hash, normalize_ws};
pub use urlnorm::normalize_url;
