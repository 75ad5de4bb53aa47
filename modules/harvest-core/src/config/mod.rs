mod loader;
mod migration;
mod schema;

pub use loader::{load_sources, load_sources_from_str, ConfigFormat, LoadReport};
pub use migration::{migrate_config, CURRENT_CONFIG_VERSION};
pub use schema::{
    validate_source, Action, BackoffMode, BrowserOptions, DedupeConfig, DiscoveryConfig,
    EngineConfig, EngineKind, EntryPoint, ItemsFormat, LinkExtractConfig, LinkExtractMethod,
    PagingConfig, PagingMode, ParseConfig, QualityConfig, RateLimitPolicy, RetryConfig,
    ScheduleConfig, SleepPreset, SourceConfig, StorageConfig, ValidationConfig,
};
