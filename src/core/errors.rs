// Custom error types for better error handling and debugging
//
// Using thiserror for ergonomic error definitions with:
// - Context preservation
// - Type-safe error matching
// - Automatic Display/Error trait implementations

use thiserror::Error;

/// Errors a translation job can terminate with.
///
/// Rate-limit denial is deliberately absent: it is internal scheduler state
/// that only delays a dispatch and is never surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslationError {
    #[error("no text detected in source")]
    NoTextFound,

    #[error("translation provider failed: {0}")]
    Provider(String),

    #[error("translation request cancelled before dispatch")]
    Cancelled,
}

/// Cache storage errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to load cache from {path}: {source}")]
    LoadFailed {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to save cache to {path}: {source}")]
    SaveFailed {
        path: String,
        source: std::io::Error,
    },

    #[error("cache deserialization failed: {0}")]
    DeserializationFailed(#[from] serde_json::Error),

    #[error("cache directory creation failed: {0}")]
    DirectoryCreationFailed(std::io::Error),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no API key configured (set GEMINI_API_KEY environment variable)")]
    NoApiKey,

    #[error("unknown API tier '{0}' (expected 'free' or 'paid')")]
    UnknownTier(String),

    #[error("batch size must be > 0, got {0}")]
    InvalidBatchSize(usize),

    #[error("batch wait must be > 0 ms, got {0}")]
    InvalidBatchWait(u64),

    #[error("invalid cache path: {0}")]
    InvalidCachePath(String),

    #[error("invalid rate limit config: {0}")]
    InvalidRateLimitConfig(String),
}

// Convenience type aliases for Results
pub type TranslationResult<T> = Result<T, TranslationError>;
pub type CacheResult<T> = Result<T, CacheError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
