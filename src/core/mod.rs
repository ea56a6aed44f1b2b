pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{CacheError, ConfigError, TranslationError};
pub use types::{
    ApiTier, BubbleType, JobSource, MangaContext, ModelKind, OcrOutput, PipelineProgress,
    PipelineStage, TextRegion, TranslatedRegion, TranslationJob, TranslationOutcome,
};
