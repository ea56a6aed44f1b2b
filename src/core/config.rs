use crate::core::errors::{ConfigError, ConfigResult};
use crate::core::types::ApiTier;
use std::env;
use std::path::Path;
use tracing::Level;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
}

/// Translation provider configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_key: String,
    /// Model used for short, non-CJK text.
    pub fast_model: String,
    /// Model used for long or script-dense text, and as the fallback.
    pub quality_model: String,
    pub max_retries: u32,
    pub request_timeout_secs: u64,
}

/// Request batching configuration
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum number of text regions per provider call.
    pub max_batch_size: usize,
    /// Maximum time a partial batch may wait before flushing.
    pub max_wait_ms: u64,
    /// Optional pause between dispatches to avoid bursty traffic (0 = none).
    pub dispatch_interval_ms: u64,
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub cache_dir: String,
    pub max_entries: usize,
    pub save_interval_secs: u64,
}

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub tier: ApiTier,
    /// Re-check interval when the daily quota is exhausted.
    pub recheck_interval_secs: u64,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub api: ApiConfig,
    pub batch: BatchConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
}

impl Config {
    pub fn new() -> ConfigResult<Self> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> ConfigResult<Self> {
        // Parse log level
        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        let tier = match env::var("API_TIER")
            .unwrap_or_else(|_| "free".to_string())
            .to_lowercase()
            .as_str()
        {
            "free" => ApiTier::free(),
            "paid" => ApiTier::paid(),
            other => return Err(ConfigError::UnknownTier(other.to_string())),
        };

        Ok(Self {
            server: ServerConfig {
                port: env::var("SERVER_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1420),
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                log_level,
            },
            api: ApiConfig {
                api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
                fast_model: env::var("FAST_MODEL")
                    .unwrap_or_else(|_| "gemini-2.5-flash".to_string()),
                quality_model: env::var("QUALITY_MODEL")
                    .unwrap_or_else(|_| "gemini-2.5-pro".to_string()),
                max_retries: env::var("MAX_RETRIES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3),
                request_timeout_secs: env::var("API_TIMEOUT_SECONDS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            },
            batch: BatchConfig {
                max_batch_size: env::var("MAX_BATCH_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
                max_wait_ms: env::var("MAX_BATCH_WAIT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(200),
                dispatch_interval_ms: env::var("DISPATCH_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0),
            },
            cache: CacheConfig {
                cache_dir: env::var("CACHE_DIR").unwrap_or_else(|_| ".cache".to_string()),
                max_entries: env::var("CACHE_MAX_ENTRIES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10_000),
                save_interval_secs: env::var("CACHE_SAVE_INTERVAL_SECONDS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            },
            rate_limit: RateLimitConfig {
                tier,
                recheck_interval_secs: env::var("RATE_LIMIT_RECHECK_SECONDS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1),
            },
        })
    }

    fn validate(&self) -> ConfigResult<()> {
        // API key presence is checked at the binary entry point, so the
        // library can be constructed with mock collaborators in tests.

        if self.batch.max_batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(self.batch.max_batch_size));
        }
        if self.batch.max_wait_ms == 0 {
            return Err(ConfigError::InvalidBatchWait(self.batch.max_wait_ms));
        }

        // Validate cache directory parent exists
        let cache_path = Path::new(&self.cache.cache_dir);
        if let Some(parent) = cache_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(ConfigError::InvalidCachePath(format!(
                    "parent directory does not exist: {}",
                    parent.display()
                )));
            }
        }

        if self.rate_limit.tier.requests_per_minute == 0 {
            return Err(ConfigError::InvalidRateLimitConfig(
                "requests_per_minute must be > 0".to_string(),
            ));
        }
        if self.rate_limit.tier.requests_per_day == 0 {
            return Err(ConfigError::InvalidRateLimitConfig(
                "requests_per_day must be > 0".to_string(),
            ));
        }
        if self.rate_limit.recheck_interval_secs == 0 {
            return Err(ConfigError::InvalidRateLimitConfig(
                "recheck_interval_secs must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn api_key(&self) -> &str {
        &self.api.api_key
    }

    pub fn fast_model(&self) -> &str {
        &self.api.fast_model
    }

    pub fn quality_model(&self) -> &str {
        &self.api.quality_model
    }

    pub fn max_retries(&self) -> u32 {
        self.api.max_retries
    }

    pub fn max_batch_size(&self) -> usize {
        self.batch.max_batch_size
    }

    pub fn cache_dir(&self) -> &str {
        &self.cache.cache_dir
    }

    pub fn tier(&self) -> &ApiTier {
        &self.rate_limit.tier
    }
}

// Note: No Default implementation because Config::new() can fail
// Users should explicitly call Config::new()? and handle errors
